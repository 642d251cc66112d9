// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Session lifecycle.
//
// Opening a session runs the whole setup sequence before the session is
// handed out: engine init, timestamp service, proxy, CA and CRL preloads and
// the refresher. A failure at any step after init tears the engine down
// again, so a caller either gets a ready session or an error. Closing is
// idempotent and also happens on drop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, instrument, warn};

use kalkan_core::codes;
use kalkan_core::{ClientConfig, Flags, KalkanError, ProxySettings, Result, SessionId};
use kalkan_engine::Engine;

use crate::fetch::{HttpFetcher, SourceFetcher};
use crate::refresher::{self, RefreshStatus, Refresher};
use crate::serializer::CallSerializer;
use crate::translate;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    /// Setup failed; the engine has been released.
    Failed,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Process-wide engine ownership
// ---------------------------------------------------------------------------

static PROCESS_ENGINE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Ownership of the process-global engine, released on drop.
struct ProcessClaim;

impl ProcessClaim {
    fn acquire() -> Result<Self> {
        PROCESS_ENGINE_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self)
            .map_err(|_| KalkanError::AlreadyInitialized)
    }
}

impl Drop for ProcessClaim {
    fn drop(&mut self) {
        PROCESS_ENGINE_CLAIMED.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A ready-to-use connection to the signing engine.
///
/// `Session` is `Send + Sync`; share it between threads with `Arc`. Every
/// operation takes the engine lock for the duration of its engine call.
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) config: ClientConfig,
    pub(crate) serializer: Arc<CallSerializer>,
    pub(crate) fetcher: Arc<dyn SourceFetcher>,
    refresher: Mutex<Option<Refresher>>,
    refresh_status: Arc<Mutex<RefreshStatus>>,
    claim: Mutex<Option<ProcessClaim>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a session on the engine backend named by `config`.
    pub fn open_configured(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let engine = kalkan_engine::load_engine(&config).inspect_err(|e| {
            error!(error = %e, "Engine could not be loaded");
        })?;
        Self::open(config, engine)
    }

    /// Open a session on `engine`, fetching sources over HTTP or from disk.
    pub fn open(config: ClientConfig, engine: Box<dyn Engine>) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(HttpFetcher::from_config(&config)?);
        Self::open_with_fetcher(config, engine, fetcher)
    }

    /// Open a session with a caller-supplied source fetcher.
    #[instrument(skip_all, fields(engine = engine.name()))]
    pub fn open_with_fetcher(
        config: ClientConfig,
        engine: Box<dyn Engine>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let id = SessionId::new();
        log_config(&id, &config);

        let claim = if engine.is_process_global() {
            Some(ProcessClaim::acquire().inspect_err(|_| {
                error!(session = %id, "Engine already owned by another session");
            })?)
        } else {
            None
        };

        let serializer = Arc::new(CallSerializer::new(engine));
        initialize(&id, &serializer)?;

        let session = Self {
            id,
            config,
            serializer,
            fetcher,
            refresher: Mutex::new(None),
            refresh_status: Arc::new(Mutex::new(RefreshStatus::default())),
            claim: Mutex::new(claim),
        };

        if let Err(e) = session.configure() {
            error!(session = %session.id, error = %e, "Session setup failed");
            session.shutdown(SessionState::Failed);
            return Err(e);
        }
        info!(session = %session.id, "Session ready");
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.serializer.state()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Heartbeat of the revocation refresher.
    pub fn revocation_status(&self) -> RefreshStatus {
        refresher::snapshot(&self.refresh_status)
    }

    /// Whether the background refresher is running.
    pub fn is_refreshing(&self) -> bool {
        lock(&self.refresher).is_some()
    }

    /// Route engine network traffic (OCSP, TSP) through `proxy_url`.
    #[instrument(skip_all, fields(session = %self.id))]
    pub fn set_proxy_on(&self, proxy_url: &str) -> Result<()> {
        let proxy = ProxySettings::parse(proxy_url)?;
        self.apply_proxy(Flags::PROXY_ON, &proxy)
    }

    /// Stop routing engine traffic through `proxy_url`.
    #[instrument(skip_all, fields(session = %self.id))]
    pub fn set_proxy_off(&self, proxy_url: &str) -> Result<()> {
        let proxy = ProxySettings::parse(proxy_url)?;
        self.apply_proxy(Flags::PROXY_OFF, &proxy)
    }

    /// Stop the refresher, finalize the engine and release it. Later
    /// operations fail with `AlreadyClosed`. Calling this again is a no-op.
    pub fn close(&self) {
        self.shutdown(SessionState::Closed);
    }

    fn apply_proxy(&self, mode: Flags, proxy: &ProxySettings) -> Result<()> {
        let flags = mode.with_if(Flags::PROXY_AUTH, proxy.has_credentials());
        let port = proxy.port.to_string();
        let user = translate::text_arg("proxy user", proxy.user.as_deref().unwrap_or_default())?;
        let password = translate::text_arg(
            "proxy password",
            proxy.password.as_deref().unwrap_or_default(),
        )?;
        self.serializer.call("set_proxy", |call| {
            let rc = call
                .engine()
                .set_proxy(flags, &proxy.host, &port, user, password);
            call.check(rc)
        })?;
        info!(host = %proxy.host, port = proxy.port, enabled = mode == Flags::PROXY_ON, "Proxy applied");
        Ok(())
    }

    /// Setup steps that follow a successful engine init.
    fn configure(&self) -> Result<()> {
        let tsp_url = translate::text_arg("TSP URL", &self.config.tsp_url)?.to_string();
        self.serializer.call("tsa_set_url", |call| {
            call.engine().tsa_set_url(&tsp_url);
            Ok(())
        })?;

        if let Some(proxy) = self.config.proxy_settings()? {
            self.apply_proxy(Flags::PROXY_ON, &proxy)?;
        }

        if self.config.load_ca_certs_on_init {
            for source in &self.config.ca_certs {
                let bytes = self.fetcher.fetch(&source.location)?;
                self.load_certificate(&bytes, source.kind)?;
                debug!(source = %source.location, kind = ?source.kind, "CA certificate loaded");
            }
            info!(count = self.config.ca_certs.len(), "CA certificates loaded");
        }

        if self.config.load_crl_cache_on_init {
            refresher::refresh_once(&self.serializer, self.fetcher.as_ref(), &self.config.crl_urls)?;
            info!(count = self.config.crl_urls.len(), "Revocation lists loaded");
        }

        if let Some(interval) = self.config.crl_cache_interval {
            if self.config.crl_urls.is_empty() {
                warn!("CRL refresh interval set but no CRL sources configured");
            } else {
                let refresher = Refresher::spawn(
                    self.id,
                    interval,
                    self.config.crl_urls.clone(),
                    Arc::clone(&self.serializer),
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.refresh_status),
                )?;
                *lock(&self.refresher) = Some(refresher);
            }
        }
        Ok(())
    }

    /// Tear down in dependency order: refresher, engine, process claim.
    fn shutdown(&self, final_state: SessionState) {
        if !self.serializer.begin_close() {
            return;
        }
        let refresher = lock(&self.refresher).take();
        if let Some(refresher) = refresher {
            refresher.stop();
        }
        self.serializer.with_slot(|slot| {
            if slot.initialized {
                let op = "finalize";
                let finalized = CallSerializer::contained(op, slot.engine.as_mut(), |call| {
                    call.engine().finalize();
                    Ok(())
                });
                if let Err(e) = finalized {
                    error!(session = %self.id, error = %e, "Engine finalize failed");
                }
                slot.initialized = false;
            }
            slot.state = final_state;
        });
        lock(&self.claim).take();
        info!(session = %self.id, state = %final_state, "Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run engine init under the lock and move the state to `Ready` or `Failed`.
fn initialize(id: &SessionId, serializer: &CallSerializer) -> Result<()> {
    serializer.with_slot(|slot| {
        slot.state = SessionState::Initializing;
        let outcome = CallSerializer::contained("init", slot.engine.as_mut(), |call| {
            let rc = call.engine().init();
            call.check(rc)
        });
        match outcome {
            Ok(()) => {
                slot.initialized = true;
                slot.state = SessionState::Ready;
                debug!(session = %id, "Engine initialized");
                Ok(())
            }
            Err(e) => {
                slot.state = SessionState::Failed;
                error!(session = %id, error = %e, code = e.code().map(|c| codes::describe(&c)).unwrap_or("none"), "Engine init failed");
                Err(e)
            }
        }
    })
}

fn log_config(id: &SessionId, config: &ClientConfig) {
    debug!(
        session = %id,
        engine = ?config.engine,
        load_ca_certs_on_init = config.load_ca_certs_on_init,
        load_crl_cache_on_init = config.load_crl_cache_on_init,
        crl_cache_interval_secs = ?config.crl_cache_interval.map(|d| d.as_secs()),
        tsp_url = %config.tsp_url,
        ocsp_url = %config.ocsp_url,
        crl_sources = config.crl_urls.len(),
        ca_certs = config.ca_certs.len(),
        proxy_host = ?config.proxy_settings().ok().flatten().map(|p| p.host),
        http_timeout_secs = config.http_timeout.as_secs(),
        "Session configuration"
    );
}
