// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared fixtures for the session integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kalkan_client::{
    CertProp, ClientConfig, KalkanError, Result, Session, SoftEngine, SourceFetcher,
};

pub const PASSWORD: &str = "Qwerty12";
pub const SUBJECT: &str = "TEST USER";

/// In-memory source fetcher. Unknown locations fail like an unreachable host.
#[derive(Default)]
pub struct MapFetcher {
    sources: Mutex<HashMap<String, Vec<u8>>>,
    delay: Mutex<Duration>,
}

impl MapFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, location: &str, bytes: Vec<u8>) {
        self.sources.lock().unwrap().insert(location.to_string(), bytes);
    }

    /// Make every fetch take `delay`, like a slow download.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

impl SourceFetcher for MapFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.sources
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| KalkanError::TransportError(format!("{location}: not found")))
    }
}

/// Config that touches no network and runs no preloads.
pub fn offline_config() -> ClientConfig {
    ClientConfig::default()
}

pub fn open(engine: &SoftEngine) -> Session {
    open_with(engine, offline_config(), MapFetcher::new())
}

pub fn open_with(engine: &SoftEngine, config: ClientConfig, fetcher: Arc<MapFetcher>) -> Session {
    Session::open_with_fetcher(config, Box::new(engine.clone()), fetcher).unwrap()
}

/// A ready session with a freshly generated key store loaded.
pub fn session_with_key(engine: &SoftEngine) -> Session {
    let session = open(engine);
    let store = SoftEngine::generate_key_store(SUBJECT, PASSWORD).unwrap();
    session.load_key_store_bytes(&store, PASSWORD).unwrap();
    session
}

pub fn serial_of(session: &Session, pem: &str) -> String {
    session
        .certificate_property(pem, CertProp::CertSerialNumber)
        .unwrap()
}
