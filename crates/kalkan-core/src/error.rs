// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the Kalkan session facade.

use thiserror::Error;

use crate::codes::{self, RawCode};

/// Top-level error type for every Kalkan operation.
#[derive(Debug, Error)]
pub enum KalkanError {
    // -- Lifecycle --
    #[error("engine is not initialized")]
    NotInitialized,

    #[error("session is already closed")]
    AlreadyClosed,

    #[error("another session already owns the process-wide engine")]
    AlreadyInitialized,

    #[error("failed to load engine library: {0}")]
    LibraryLoad(String),

    // -- Engine calls --
    #[error(
        "engine call failed with code {code:#010x} ({}): {}",
        codes::describe(.code),
        .message.as_deref().unwrap_or("no details reported")
    )]
    EngineFailure { code: RawCode, message: Option<String> },

    #[error("internal fault during engine call: {message}")]
    InternalFault {
        message: String,
        #[source]
        source: Option<Box<KalkanError>>,
    },

    #[error("invalid engine output: {0}")]
    InvalidOutput(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // -- Configuration and transport --
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KalkanError {
    /// The engine return code carried by this error, looking through an
    /// `InternalFault` to the failure it wraps.
    pub fn code(&self) -> Option<RawCode> {
        match self {
            Self::EngineFailure { code, .. } => Some(*code),
            Self::InternalFault {
                source: Some(inner),
                ..
            } => inner.code(),
            _ => None,
        }
    }

    /// Whether the error came from a session that has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::AlreadyClosed)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KalkanError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn engine_failure_display_names_known_codes() {
        let err = KalkanError::EngineFailure {
            code: codes::KCR_INVALIDPASSWORD,
            message: Some("wrong password".into()),
        };
        let text = err.to_string();
        assert!(text.contains("0x08f00008"), "{text}");
        assert!(text.contains("KCR_INVALIDPASSWORD"), "{text}");
        assert!(text.contains("wrong password"), "{text}");
    }

    #[test]
    fn engine_failure_without_message() {
        let err = KalkanError::EngineFailure {
            code: 0x1234,
            message: None,
        };
        assert!(err.to_string().contains("no details reported"));
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn internal_fault_exposes_wrapped_failure() {
        let inner = KalkanError::EngineFailure {
            code: codes::KCR_SIGN_ERROR,
            message: None,
        };
        let err = KalkanError::InternalFault {
            message: "panicked".into(),
            source: Some(Box::new(inner)),
        };
        assert_eq!(err.code(), Some(codes::KCR_SIGN_ERROR));
        assert!(err.source().is_some());
    }

    #[test]
    fn closed_predicate() {
        assert!(KalkanError::AlreadyClosed.is_closed());
        assert!(!KalkanError::NotInitialized.is_closed());
        assert_eq!(KalkanError::NotInitialized.code(), None);
    }
}
