// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Background reload of revocation data.
//
// A dedicated thread wakes on a fixed interval, downloads every CRL source
// without holding the engine lock, then hands each list to the engine through
// the serializer. Failures are logged and counted; the thread keeps going
// until the session stops it.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use kalkan_core::{KalkanError, Result, SessionId};

use crate::fetch::SourceFetcher;
use crate::serializer::CallSerializer;

/// Heartbeat of the refresher, readable at any time (also after close).
#[derive(Debug, Clone, Default)]
pub struct RefreshStatus {
    /// Ticks started.
    pub ticks: u64,
    /// Ticks in which every source was fetched and loaded.
    pub successes: u64,
    pub failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Fetch every source and load it into the engine. All sources are tried;
/// the first error is returned.
pub fn refresh_once(
    serializer: &CallSerializer,
    fetcher: &dyn SourceFetcher,
    sources: &[String],
) -> Result<()> {
    let mut first_error = None;
    for source in sources {
        let loaded = fetcher.fetch(source).and_then(|crl| {
            serializer.call("load_crl", |call| {
                let rc = call.engine().load_crl(source, &crl);
                call.check(rc)
            })
        });
        if let Err(e) = loaded {
            if matches!(e, KalkanError::AlreadyClosed) {
                return Err(e);
            }
            warn!(source = %source, error = %e, "Revocation list not loaded");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Handle to the running refresher thread.
pub struct Refresher {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Refresher {
    pub fn spawn(
        session: SessionId,
        interval: Duration,
        sources: Vec<String>,
        serializer: Arc<CallSerializer>,
        fetcher: Arc<dyn SourceFetcher>,
        status: Arc<Mutex<RefreshStatus>>,
    ) -> Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("kalkan-crl-refresh".into())
            .spawn(move || {
                info!(session = %session, interval_secs = interval.as_secs_f64(), sources = sources.len(), "CRL refresher started");
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    record_tick(&status);
                    let outcome = refresh_once(&serializer, fetcher.as_ref(), &sources);
                    // Cut short by close: not a refresh failure.
                    if matches!(outcome, Err(KalkanError::AlreadyClosed)) {
                        break;
                    }
                    record(&status, outcome);
                }
                debug!(session = %session, "CRL refresher stopped");
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for any in-flight tick to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("CRL refresher thread panicked");
            }
        }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_status(status: &Mutex<RefreshStatus>) -> std::sync::MutexGuard<'_, RefreshStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record_tick(status: &Mutex<RefreshStatus>) {
    lock_status(status).ticks += 1;
}

fn record(status: &Mutex<RefreshStatus>, outcome: Result<()>) {
    let mut status = lock_status(status);
    match outcome {
        Ok(()) => {
            status.successes += 1;
            status.last_success = Some(Utc::now());
            debug!(ticks = status.ticks, "Revocation data refreshed");
        }
        Err(e) => {
            status.failures += 1;
            status.last_error = Some(e.to_string());
        }
    }
}

/// Read the current heartbeat.
pub fn snapshot(status: &Mutex<RefreshStatus>) -> RefreshStatus {
    lock_status(status).clone()
}
