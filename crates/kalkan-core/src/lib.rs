// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core types, engine return codes, configuration and the error
// taxonomy shared by the engine binding, the session facade and the CLI.

pub mod codes;
pub mod config;
pub mod error;
pub mod types;

pub use config::{CertSource, ClientConfig, EngineKind, ProxySettings};
pub use error::{KalkanError, Result};
pub use types::*;
