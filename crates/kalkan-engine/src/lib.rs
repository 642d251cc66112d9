// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine call table abstraction.
//
// `Engine` mirrors the vendor function table. `NativeEngine` forwards to the
// shared library; `SoftEngine` is an in-process implementation for CI and
// tests. Neither is safe for concurrent use; the session facade serializes
// every call.

pub mod buffer;
pub mod native;
pub mod soft;
pub mod traits;

use kalkan_core::{ClientConfig, EngineKind, Result};

pub use buffer::OutputBuffer;
pub use native::NativeEngine;
pub use soft::{Fault, SoftEngine, SoftOp};
pub use traits::Engine;

/// Construct the engine backend a configuration asks for.
pub fn load_engine(config: &ClientConfig) -> Result<Box<dyn Engine>> {
    match config.engine {
        EngineKind::Native => Ok(Box::new(NativeEngine::load(config.library_path.as_deref())?)),
        EngineKind::Soft => Ok(Box::new(SoftEngine::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_engine_from_config() {
        let config = ClientConfig::default().with_engine(EngineKind::Soft);
        let engine = load_engine(&config).unwrap();
        assert_eq!(engine.name(), "soft");
        assert!(!engine.is_process_global());
    }

    #[test]
    fn native_engine_reports_missing_library() {
        let config = ClientConfig::default().with_library_path("/nonexistent/libkalkancrypt.so");
        assert!(matches!(
            load_engine(&config),
            Err(kalkan_core::KalkanError::LibraryLoad(_))
        ));
    }
}
