// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Exclusive access to the engine.
//
// The engine is owned by a single mutex together with the session state, so
// the readiness check and the call happen under the same lock. Each call runs
// inside `catch_unwind`; the guard is held outside it, so a panic never
// poisons the lock and never leaves the engine held.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, trace};

use kalkan_core::codes::RawCode;
use kalkan_core::{KalkanError, Result};
use kalkan_engine::{Engine, OutputBuffer};

use crate::session::SessionState;
use crate::sizing::{self, OperationKind};
use crate::translate;

/// The engine and the lifecycle state guarding access to it.
pub(crate) struct EngineSlot {
    pub engine: Box<dyn Engine>,
    pub state: SessionState,
    /// Whether `init` succeeded and `finalize` is still owed.
    pub initialized: bool,
}

/// A single engine invocation in progress, handed to operation closures.
pub struct EngineCall<'a> {
    engine: &'a mut dyn Engine,
    produced: Option<(RawCode, Option<String>)>,
}

impl<'a> EngineCall<'a> {
    fn new(engine: &'a mut dyn Engine) -> Self {
        Self {
            engine,
            produced: None,
        }
    }

    pub fn engine(&mut self) -> &mut dyn Engine {
        &mut *self.engine
    }

    /// The engine's description of its most recent failure.
    pub fn last_error(&mut self) -> Option<String> {
        let mut out = OutputBuffer::zeroed(sizing::capacity(OperationKind::LastError, 0));
        if self.engine.last_error_string(&mut out) != kalkan_core::codes::KCR_OK {
            return None;
        }
        translate::read_bytes(&out, "last error")
            .ok()
            .map(|bytes| {
                let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                String::from_utf8_lossy(&bytes[..end]).trim().to_string()
            })
            .filter(|message| !message.is_empty())
    }

    /// Translate a return code, fetching the error text while the lock is
    /// still held.
    pub fn check(&mut self, code: RawCode) -> Result<()> {
        let message = (code != kalkan_core::codes::KCR_OK).then(|| self.last_error()).flatten();
        if code != kalkan_core::codes::KCR_OK {
            self.produced = Some((code, message.clone()));
        }
        translate::check(code, || message)
    }
}

/// Serializes every engine call behind one mutex.
pub struct CallSerializer {
    slot: Mutex<EngineSlot>,
    closed: AtomicBool,
}

impl CallSerializer {
    pub(crate) fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            slot: Mutex::new(EngineSlot {
                engine,
                state: SessionState::Uninitialized,
                initialized: false,
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Lock the slot. A poisoned lock is recovered: the guarded value is the
    /// engine handle, and the engine's own consistency is not ours to judge.
    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineSlot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the serializer closed so new calls fail fast. Returns `false` if
    /// it was already closed.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Run `f` with exclusive access to a ready engine.
    pub fn call<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut EngineCall<'_>) -> Result<T>,
    ) -> Result<T> {
        if self.is_closed() {
            return Err(KalkanError::AlreadyClosed);
        }
        let mut slot = self.lock();
        match slot.state {
            SessionState::Ready => {}
            SessionState::Closed => return Err(KalkanError::AlreadyClosed),
            _ => return Err(KalkanError::NotInitialized),
        }
        Self::contained(op, slot.engine.as_mut(), f)
    }

    /// Run `f` under the lock regardless of state. Used by the lifecycle
    /// manager for init and teardown.
    pub(crate) fn with_slot<T>(&self, f: impl FnOnce(&mut EngineSlot) -> T) -> T {
        let mut slot = self.lock();
        f(&mut slot)
    }

    /// Invoke `f` on `engine`, converting a panic into `InternalFault`.
    pub(crate) fn contained<T>(
        op: &'static str,
        engine: &mut dyn Engine,
        f: impl FnOnce(&mut EngineCall<'_>) -> Result<T>,
    ) -> Result<T> {
        let started = Instant::now();
        let mut call = EngineCall::new(engine);
        trace!(op, "Engine call started");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&mut call)));
        let elapsed_us = started.elapsed().as_micros() as u64;
        match outcome {
            Ok(result) => {
                debug!(op, elapsed_us, ok = result.is_ok(), "Engine call finished");
                result
            }
            Err(payload) => {
                let produced = call
                    .produced
                    .take()
                    .map(|(code, message)| translate::failure(code, message));
                let err = translate::fault(op, payload.as_ref(), produced);
                debug!(op, elapsed_us, error = %err, "Engine call panicked");
                Err(err)
            }
        }
    }
}
