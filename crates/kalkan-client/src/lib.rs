// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Session facade over the signing engine: serialized engine access, buffer
// sizing, error translation, lifecycle management and background CRL refresh.

pub mod fetch;
#[cfg(feature = "tokio")]
pub mod nonblocking;
pub mod ops;
pub mod refresher;
pub mod serializer;
pub mod session;
pub mod sizing;
pub mod translate;

pub use fetch::{HttpFetcher, SourceFetcher};
#[cfg(feature = "tokio")]
pub use nonblocking::AsyncSession;
pub use refresher::RefreshStatus;
pub use session::{Session, SessionState};

pub use kalkan_core::*;
pub use kalkan_engine::{Engine, Fault, NativeEngine, SoftEngine, SoftOp, load_engine};
