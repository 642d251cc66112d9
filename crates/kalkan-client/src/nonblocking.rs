// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Async adapter.
//
// Engine calls block on the session lock and on the engine itself, so async
// callers hand them to Tokio's blocking pool instead of stalling a runtime
// worker.

use std::sync::Arc;

use kalkan_core::{
    ClientConfig, HashAlgo, KalkanError, Result, SignInput, SignXmlInput, Verification,
    VerifyInput, VerifyXmlInput,
};
use kalkan_engine::Engine;

use crate::fetch::SourceFetcher;
use crate::session::Session;

/// A shared session driven from async code.
#[derive(Debug, Clone)]
pub struct AsyncSession {
    inner: Arc<Session>,
}

impl AsyncSession {
    /// Open a session on the blocking pool. Setup may download CA
    /// certificates and CRLs with a blocking HTTP client.
    pub async fn open(config: ClientConfig, engine: Box<dyn Engine>) -> Result<Self> {
        let session = blocking(move || Session::open(config, engine)).await?;
        Ok(Self::from_session(Arc::new(session)))
    }

    pub async fn open_with_fetcher(
        config: ClientConfig,
        engine: Box<dyn Engine>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Result<Self> {
        let session =
            blocking(move || Session::open_with_fetcher(config, engine, fetcher)).await?;
        Ok(Self::from_session(Arc::new(session)))
    }

    pub fn from_session(session: Arc<Session>) -> Self {
        Self { inner: session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner
    }

    /// Run `f` against the session on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
    {
        let session = Arc::clone(&self.inner);
        blocking(move || f(session.as_ref())).await
    }

    pub async fn hash(&self, algo: HashAlgo, data: Vec<u8>) -> Result<String> {
        self.run(move |s| s.hash(algo, &data)).await
    }

    pub async fn sign(&self, input: SignInput) -> Result<Vec<u8>> {
        self.run(move |s| s.sign(&input)).await
    }

    pub async fn sign_xml(&self, input: SignXmlInput) -> Result<String> {
        self.run(move |s| s.sign_xml(&input)).await
    }

    pub async fn verify(&self, input: VerifyInput) -> Result<Verification> {
        self.run(move |s| s.verify(&input)).await
    }

    pub async fn verify_xml(&self, input: VerifyXmlInput) -> Result<Verification> {
        self.run(move |s| s.verify_xml(&input)).await
    }

    pub async fn export_certificate_from_store(&self) -> Result<String> {
        self.run(|s| s.export_certificate_from_store()).await
    }

    /// Close the session, waiting for the refresher to stop.
    pub async fn close(&self) -> Result<()> {
        self.run(|s| {
            s.close();
            Ok(())
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KalkanError::InternalFault {
            message: format!("blocking task failed: {e}"),
            source: None,
        })?
}
