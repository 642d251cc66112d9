// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retrieval of CA certificates and revocation lists.
//
// Sources are HTTP(S) URLs, `file://` URLs or plain paths. HTTP requests go
// through the configured proxy and time out after the configured interval.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;
use url::Url;

use kalkan_core::{ClientConfig, KalkanError, ProxySettings, Result};

/// Fetches the bytes behind a certificate or CRL location.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Default fetcher: blocking HTTP client plus local file access.
///
/// The HTTP client is built on first use, so sessions that only read local
/// files never construct one.
pub struct HttpFetcher {
    timeout: Duration,
    proxy: Option<ProxySettings>,
    client: OnceLock<Client>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, proxy: Option<ProxySettings>) -> Self {
        Self {
            timeout,
            proxy,
            client: OnceLock::new(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(config.http_timeout, config.proxy_settings()?))
    }

    fn client(&self) -> Result<&Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let mut builder = Client::builder().timeout(self.timeout);
        if let Some(proxy) = &self.proxy {
            let mut p = reqwest::Proxy::all(format!("http://{}:{}", proxy.host, proxy.port))
                .map_err(transport)?;
            if let Some(user) = &proxy.user {
                p = p.basic_auth(user, proxy.password.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(p);
        }
        let client = builder.build().map_err(transport)?;
        Ok(self.client.get_or_init(|| client))
    }

    fn fetch_http(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .client()?
            .get(url.as_str())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(transport)?;
        let body = response.bytes().map_err(transport)?;
        debug!(url = %url, bytes = body.len(), "Fetched source");
        Ok(body.to_vec())
    }

    fn fetch_file(&self, path: PathBuf) -> Result<Vec<u8>> {
        std::fs::read(&path)
            .map_err(|e| KalkanError::TransportError(format!("{}: {e}", path.display())))
    }
}

fn transport(e: reqwest::Error) -> KalkanError {
    KalkanError::TransportError(e.to_string())
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => self.fetch_http(&url),
            Ok(url) if url.scheme() == "file" => {
                let path = url.to_file_path().map_err(|_| {
                    KalkanError::TransportError(format!("{location}: not a local file URL"))
                })?;
                self.fetch_file(path)
            }
            Ok(url) if url.scheme().len() > 1 => Err(KalkanError::TransportError(format!(
                "{location}: unsupported scheme {}",
                url.scheme()
            ))),
            // Plain paths, including Windows drive letters parsed as schemes.
            _ => self.fetch_file(PathBuf::from(location)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_plain_paths_and_file_urls() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"crl bytes").unwrap();
        let fetcher = HttpFetcher::new(Duration::from_secs(1), None);

        let by_path = fetcher.fetch(&file.path().to_string_lossy()).unwrap();
        assert_eq!(by_path, b"crl bytes");

        let url = Url::from_file_path(file.path()).unwrap();
        assert_eq!(fetcher.fetch(url.as_str()).unwrap(), b"crl bytes");
    }

    #[test]
    fn missing_file_is_transport_error() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1), None);
        assert!(matches!(
            fetcher.fetch("/nonexistent/nca.crl"),
            Err(KalkanError::TransportError(_))
        ));
        assert!(matches!(
            fetcher.fetch("ftp://example.org/nca.crl"),
            Err(KalkanError::TransportError(_))
        ));
    }

    #[test]
    fn client_builds_with_authenticated_proxy() {
        let proxy = ProxySettings::parse("http://user:pw@127.0.0.1:3128").unwrap();
        let fetcher = HttpFetcher::new(Duration::from_secs(1), Some(proxy));
        assert!(fetcher.client().is_ok());
    }
}
