// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Translation of engine results into typed errors and values.

use std::any::Any;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use kalkan_core::codes::{self, RawCode};
use kalkan_core::{KalkanError, Result};
use kalkan_engine::OutputBuffer;

/// Map a return code to `Ok(())` or an `EngineFailure` carrying `message`.
pub fn check(code: RawCode, message: impl FnOnce() -> Option<String>) -> Result<()> {
    if code == codes::KCR_OK {
        Ok(())
    } else {
        Err(failure(code, message()))
    }
}

pub fn failure(code: RawCode, message: Option<String>) -> KalkanError {
    KalkanError::EngineFailure { code, message }
}

/// Text carried by a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// Error for a panic captured during `op`. When the call had already
/// produced an engine failure, the fault wraps it.
pub fn fault(op: &str, payload: &(dyn Any + Send), produced: Option<KalkanError>) -> KalkanError {
    KalkanError::InternalFault {
        message: format!("{op}: {}", panic_message(payload)),
        source: produced.map(Box::new),
    }
}

/// The reported bytes of `buf`, rejecting lengths beyond its capacity.
pub fn read_bytes(buf: &OutputBuffer, what: &str) -> Result<Vec<u8>> {
    buf.filled().map(<[u8]>::to_vec).ok_or_else(|| {
        KalkanError::InvalidOutput(format!(
            "{what}: engine reported {} bytes for a {}-byte buffer",
            buf.reported_len(),
            buf.capacity()
        ))
    })
}

/// The reported text of `buf`, cut at the first NUL.
pub fn read_text(buf: &OutputBuffer, what: &str) -> Result<String> {
    let bytes = read_bytes(buf, what)?;
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let mut bytes = bytes;
    bytes.truncate(end);
    String::from_utf8(bytes)
        .map_err(|e| KalkanError::InvalidOutput(format!("{what}: output is not UTF-8: {e}")))
}

/// Decode base64 text produced by the engine.
pub fn decode_base64(text: &str, what: &str) -> Result<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    B64.decode(compact)
        .map_err(|e| KalkanError::InvalidOutput(format!("{what}: invalid base64 output: {e}")))
}

/// Reject strings the engine would silently truncate.
pub fn text_arg<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    if value.contains('\0') {
        return Err(KalkanError::InvalidInput(format!("{what} contains a NUL byte")));
    }
    Ok(value)
}
