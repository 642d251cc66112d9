// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process software engine.
//
// Implements the engine call table without the vendor library so the facade
// can run in CI and on developer machines. Digests use SHA-256, signatures
// ECDSA P-256. Certificates, key stores and the CMS container are simple
// JSON documents carried in base64; none of it interoperates with the
// vendor engine's output.
//
// The engine also records every call and can inject one-shot faults, which is
// what the facade's serialization and panic-containment tests observe.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use kalkan_core::codes::{self, RawCode};
use kalkan_core::{
    CertProp, CertType, Flags, HashAlgo, KalkanError, Result, StoreType, ValidateType,
};

use crate::buffer::OutputBuffer;
use crate::traits::Engine;

const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const SIG_OPEN: &str = "<ds:Signature";
const SIG_CLOSE: &str = "</ds:Signature>";
const KEY_USAGE_SIGN: &str = "digitalSignature nonRepudiation";
const SIGNATURE_ALG: &str = "ecdsa-with-SHA256";

// ---------------------------------------------------------------------------
// Call tracking and fault injection
// ---------------------------------------------------------------------------

/// Engine entry points, as seen by call statistics and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftOp {
    Init,
    Finalize,
    LastError,
    TsaSetUrl,
    SetProxy,
    LoadKeyStore,
    LoadCertificate,
    LoadCrl,
    ExportCertificate,
    CertificateInfo,
    ValidateCertificate,
    CertFromCms,
    CertFromXml,
    TimeFromSignature,
    HashData,
    SignHash,
    SignData,
    SignXml,
    SignWsse,
    VerifyData,
    VerifyXml,
}

/// A one-shot fault consumed by the next call to the targeted entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Panic inside the call.
    Panic,
    /// Return this code with an "injected failure" error string.
    Fail(RawCode),
    /// Report success with bytes that are not valid UTF-8.
    Garbage,
    /// Report success with a length one past the buffer capacity.
    Overflow,
}

/// Snapshot of call statistics.
#[derive(Debug, Clone, Default)]
pub struct SoftStats {
    pub calls: HashMap<SoftOp, u64>,
    pub total: u64,
    pub max_in_flight: usize,
}

/// Current proxy configuration as last set through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyState {
    pub enabled: bool,
    pub host: String,
    pub port: String,
    pub authenticated: bool,
}

// ---------------------------------------------------------------------------
// On-disk and wire documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SoftCert {
    subject: String,
    issuer: String,
    serial: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    key_usage: String,
    public_key: String,
}

impl SoftCert {
    fn to_pem(&self) -> String {
        let body = B64.encode(serde_json::to_vec(self).unwrap_or_default());
        let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
        for chunk in body.as_bytes().chunks(64) {
            pem.push_str(&String::from_utf8_lossy(chunk));
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
        pem
    }

    fn from_pem(pem: &str) -> Option<Self> {
        let body: String = pem
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("-----"))
            .collect();
        let raw = B64.decode(body).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    fn is_current(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    fn property(&self, prop: CertProp) -> Option<String> {
        let stamp = |t: &DateTime<Utc>| t.format("%d.%m.%Y %H:%M:%S UTC").to_string();
        Some(match prop {
            CertProp::SubjectCommonName => self.subject.clone(),
            CertProp::IssuerCommonName => self.issuer.clone(),
            CertProp::SubjectDn => format!("CN={}", self.subject),
            CertProp::IssuerDn => format!("CN={}", self.issuer),
            CertProp::CertSerialNumber => self.serial.clone(),
            CertProp::NotBefore => stamp(&self.not_before),
            CertProp::NotAfter => stamp(&self.not_after),
            CertProp::KeyUsage => self.key_usage.clone(),
            CertProp::SignatureAlg => SIGNATURE_ALG.into(),
            CertProp::PublicKey => self.public_key.clone(),
            _ => return None,
        })
    }

    fn verify(&self, message: &[u8], sig: &[u8]) -> bool {
        let Ok(public_key) = hex::decode(&self.public_key) else {
            return false;
        };
        signature::UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, public_key)
            .verify(message, sig)
            .is_ok()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SoftKeyStore {
    cert: SoftCert,
    pkcs8: String,
    password_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SoftSigner {
    cert: String,
    digest: String,
    signature: String,
    signed_at: i64,
    timestamped: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SoftCms {
    content: Option<String>,
    signers: Vec<SoftSigner>,
}

struct LoadedKey {
    cert: SoftCert,
    pair: EcdsaKeyPair,
}

#[derive(Default)]
struct SoftState {
    initialized: bool,
    tsa_url: Option<String>,
    proxy: Option<ProxyState>,
    key: Option<LoadedKey>,
    trusted: Vec<(CertType, SoftCert)>,
    /// Revoked serials per CRL source.
    revoked: HashMap<String, HashSet<String>>,
    last_error: String,
}

struct Shared {
    state: Mutex<SoftState>,
    faults: Mutex<HashMap<SoftOp, Fault>>,
    stats: Mutex<SoftStats>,
    in_flight: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    process_global: AtomicBool,
}

/// Handle to a software engine. Clones share the same engine, so a test can
/// keep one handle while a session drives another.
#[derive(Clone)]
pub struct SoftEngine {
    shared: Arc<Shared>,
}

impl Default for SoftEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one call as in flight for the lifetime of the guard.
struct CallGuard<'a> {
    shared: &'a Shared,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SoftEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SoftState::default()),
                faults: Mutex::new(HashMap::new()),
                stats: Mutex::new(SoftStats::default()),
                in_flight: AtomicUsize::new(0),
                latency: Mutex::new(None),
                process_global: AtomicBool::new(false),
            }),
        }
    }

    /// Sleep this long inside every call, widening any overlap window.
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.shared.latency) = Some(latency);
        self
    }

    /// Report the engine as process-global, like the vendor library.
    pub fn process_global(self) -> Self {
        self.shared.process_global.store(true, Ordering::SeqCst);
        self
    }

    /// Arm a one-shot fault for the next call to `op`.
    pub fn inject(&self, op: SoftOp, fault: Fault) {
        lock(&self.shared.faults).insert(op, fault);
    }

    pub fn stats(&self) -> SoftStats {
        lock(&self.shared.stats).clone()
    }

    pub fn calls_to(&self, op: SoftOp) -> u64 {
        lock(&self.shared.stats).calls.get(&op).copied().unwrap_or(0)
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.shared.state).initialized
    }

    pub fn proxy(&self) -> Option<ProxyState> {
        lock(&self.shared.state).proxy.clone()
    }

    pub fn tsa_url(&self) -> Option<String> {
        lock(&self.shared.state).tsa_url.clone()
    }

    pub fn trusted_count(&self) -> usize {
        lock(&self.shared.state).trusted.len()
    }

    /// Create a key store file body for `subject`, valid for one year and
    /// protected by `password`.
    pub fn generate_key_store(subject: &str, password: &str) -> Result<Vec<u8>> {
        Self::generate_key_store_with_usage(subject, password, KEY_USAGE_SIGN)
    }

    /// Like [`generate_key_store`](Self::generate_key_store), with the
    /// key-usage property text reported for the certificate.
    pub fn generate_key_store_with_usage(
        subject: &str,
        password: &str,
        key_usage: &str,
    ) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&signature::ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|_| KalkanError::InternalFault {
                message: "key generation failed".into(),
                source: None,
            })?;
        let pair = EcdsaKeyPair::from_pkcs8(
            &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
            pkcs8.as_ref(),
            &rng,
        )
        .map_err(|e| KalkanError::InternalFault {
            message: format!("generated key rejected: {e}"),
            source: None,
        })?;

        let now = Utc::now();
        let public_key = hex::encode(pair.public_key().as_ref());
        let serial = hex::encode(&Sha256::digest(public_key.as_bytes())[..8]);
        let cert = SoftCert {
            subject: subject.to_string(),
            issuer: subject.to_string(),
            serial,
            not_before: now - chrono::Duration::minutes(1),
            not_after: now + chrono::Duration::days(365),
            key_usage: key_usage.to_string(),
            public_key,
        };
        let store = SoftKeyStore {
            cert,
            pkcs8: B64.encode(pkcs8.as_ref()),
            password_sha256: hex::encode(Sha256::digest(password.as_bytes())),
        };
        Ok(serde_json::to_vec_pretty(&store)?)
    }

    /// Certificate (PEM) contained in a key store body.
    pub fn key_store_certificate(store: &[u8]) -> Result<String> {
        let store: SoftKeyStore = serde_json::from_slice(store)?;
        Ok(store.cert.to_pem())
    }

    /// Build a revocation list naming `serials`.
    pub fn revocation_list<S: AsRef<str>>(serials: &[S]) -> Vec<u8> {
        let mut crl = String::from("# soft engine revocation list\n");
        for serial in serials {
            crl.push_str(serial.as_ref());
            crl.push('\n');
        }
        crl.into_bytes()
    }

    /// Count the call, apply latency and consume any armed fault.
    fn enter(&self, op: SoftOp) -> (CallGuard<'_>, Option<Fault>) {
        let shared = &*self.shared;
        let now = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut stats = lock(&shared.stats);
            *stats.calls.entry(op).or_insert(0) += 1;
            stats.total += 1;
            stats.max_in_flight = stats.max_in_flight.max(now);
        }
        let guard = CallGuard { shared };
        if let Some(latency) = *lock(&shared.latency) {
            std::thread::sleep(latency);
        }
        let fault = lock(&shared.faults).remove(&op);
        if fault == Some(Fault::Panic) {
            panic!("injected panic in {op:?}");
        }
        (guard, fault)
    }

    fn state(&self) -> MutexGuard<'_, SoftState> {
        lock(&self.shared.state)
    }

    /// Record `message` as the last error and return `code`.
    fn fail(&self, code: RawCode, message: impl Into<String>) -> RawCode {
        self.state().last_error = message.into();
        code
    }

    /// Apply an output fault, or write `data` and report overflow as
    /// buffer-too-small.
    fn emit(&self, fault: Option<Fault>, out: &mut OutputBuffer, data: &[u8]) -> RawCode {
        match fault {
            Some(Fault::Fail(code)) => self.fail(code, "injected failure"),
            Some(Fault::Garbage) => {
                out.write(&[0xff, 0xfe, 0xfd, b'x']);
                codes::KCR_OK
            }
            Some(Fault::Overflow) => {
                out.set_reported_len(out.capacity() + 1);
                codes::KCR_OK
            }
            Some(Fault::Panic) | None => {
                if out.write(data) {
                    codes::KCR_OK
                } else {
                    self.fail(codes::KCR_BUFFER_TOO_SMALL, "output buffer too small")
                }
            }
        }
    }

    /// Decode an input that may arrive as base64 text.
    fn input(&self, data: &[u8], base64: bool) -> std::result::Result<Vec<u8>, RawCode> {
        if !base64 {
            return Ok(data.to_vec());
        }
        B64.decode(data)
            .map_err(|e| self.fail(codes::KCR_BASE64_DECODE_ERROR, format!("base64: {e}")))
    }

    fn output(data: &[u8], base64: bool) -> Vec<u8> {
        if base64 {
            B64.encode(data).into_bytes()
        } else {
            data.to_vec()
        }
    }

    fn parse_cert(&self, pem: &str) -> std::result::Result<SoftCert, RawCode> {
        SoftCert::from_pem(pem)
            .ok_or_else(|| self.fail(codes::KCR_CERT_PARSE_ERROR, "cannot parse certificate"))
    }

    fn parse_cms(&self, raw: &[u8]) -> std::result::Result<SoftCms, RawCode> {
        serde_json::from_slice(raw)
            .map_err(|_| self.fail(codes::KCR_UNKNOWN_CMS_FORMAT, "unknown CMS format"))
    }

    /// Sign a SHA-256 digest with the loaded key.
    fn sign_digest(
        &self,
        digest: &[u8],
        timestamped: bool,
    ) -> std::result::Result<SoftSigner, RawCode> {
        let outcome = {
            let state = self.state();
            match state.key.as_ref() {
                None => Err((codes::KCR_KEYNOTFOUND, "no key store loaded")),
                Some(_) if timestamped && state.tsa_url.is_none() => {
                    Err((codes::KCR_SIGN_ERROR, "no TSA URL configured"))
                }
                Some(key) => key
                    .pair
                    .sign(&SystemRandom::new(), digest)
                    .map(|sig| (key.cert.to_pem(), sig))
                    .map_err(|_| (codes::KCR_SIGN_ERROR, "signing failed")),
            }
        };
        let (cert, sig) = outcome.map_err(|(code, message)| self.fail(code, message))?;
        Ok(SoftSigner {
            cert,
            digest: B64.encode(digest),
            signature: B64.encode(sig.as_ref()),
            signed_at: Utc::now().timestamp(),
            timestamped,
        })
    }

    fn check_cert_time(&self, cert: &SoftCert, flags: Flags) -> std::result::Result<(), RawCode> {
        if flags.contains(Flags::NO_CHECK_CERT_TIME) || cert.is_current(Utc::now()) {
            Ok(())
        } else {
            Err(self.fail(codes::KCR_CHECKCHAINERROR, "certificate is not valid at this time"))
        }
    }

    fn produce_cms(
        &self,
        flags: Flags,
        content: Option<&[u8]>,
        digest: &[u8],
        existing: &[u8],
        out: &mut OutputBuffer,
        fault: Option<Fault>,
    ) -> RawCode {
        let mut cms = if existing.is_empty() {
            SoftCms::default()
        } else {
            let raw = match self.input(existing, flags.contains(Flags::IN2_BASE64)) {
                Ok(raw) => raw,
                Err(rc) => return rc,
            };
            match self.parse_cms(&raw) {
                Ok(cms) => cms,
                Err(rc) => return rc,
            }
        };
        let signer = match self.sign_digest(digest, flags.contains(Flags::WITH_TIMESTAMP)) {
            Ok(signer) => signer,
            Err(rc) => return rc,
        };
        if !flags.contains(Flags::DETACHED_DATA) {
            if let Some(content) = content {
                cms.content = Some(B64.encode(content));
            }
        }
        cms.signers.push(signer);
        let raw = serde_json::to_vec(&cms).unwrap_or_default();
        self.emit(fault, out, &Self::output(&raw, flags.contains(Flags::OUT_BASE64)))
    }

    fn sign_document(
        &self,
        xml: &str,
        node_id: &str,
        parent: Option<&str>,
        out: &mut OutputBuffer,
        fault: Option<Fault>,
    ) -> RawCode {
        if !xml.trim_start().starts_with('<') {
            return self.fail(codes::KCR_XMLPARSEERROR, "input is not XML");
        }
        if !node_id.is_empty() && !xml.contains(&format!("Id=\"{node_id}\"")) {
            return self.fail(codes::KCR_XMLADDIDERROR, format!("no element with Id {node_id:?}"));
        }
        let at = match parent {
            Some(name) if !name.is_empty() => closing_tag(xml, name),
            _ => xml.rfind("</"),
        };
        let Some(at) = at else {
            return self.fail(codes::KCR_XMLSETSIGNERROR, "no element to hold the signature");
        };
        let digest = Sha256::digest(xml.as_bytes());
        let signer = match self.sign_digest(&digest, false) {
            Ok(signer) => signer,
            Err(rc) => return rc,
        };
        let cert_body: String = signer
            .cert
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect();
        let reference = if node_id.is_empty() { String::new() } else { format!("#{node_id}") };
        let element = format!(
            "{SIG_OPEN} xmlns:ds=\"{DS_NS}\"><ds:SignedInfo><ds:Reference URI=\"{reference}\">\
             <ds:DigestValue>{}</ds:DigestValue></ds:Reference></ds:SignedInfo>\
             <ds:SignatureValue>{}</ds:SignatureValue><ds:KeyInfo><ds:X509Data>\
             <ds:X509Certificate>{cert_body}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>\
             {SIG_CLOSE}",
            signer.digest, signer.signature,
        );
        let mut signed = String::with_capacity(xml.len() + element.len());
        signed.push_str(&xml[..at]);
        signed.push_str(&element);
        signed.push_str(&xml[at..]);
        self.emit(fault, out, signed.as_bytes())
    }
}

/// Byte offset of the first closing tag named `name`, with or without a
/// namespace prefix.
fn closing_tag(xml: &str, name: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = xml[from..].find("</") {
        let at = from + rel;
        let rest = &xml[at + 2..];
        let tag = rest.split('>').next().unwrap_or_default().trim();
        if tag == name || tag.rsplit(':').next() == Some(name) {
            return Some(at);
        }
        from = at + 2;
    }
    None
}

/// Split a signed document into the signature element and the document
/// without it.
fn split_signature(xml: &str) -> Option<(&str, String)> {
    let start = xml.find(SIG_OPEN)?;
    let end = xml[start..].find(SIG_CLOSE)? + start + SIG_CLOSE.len();
    let mut unsigned = String::with_capacity(xml.len());
    unsigned.push_str(&xml[..start]);
    unsigned.push_str(&xml[end..]);
    Some((&xml[start..end], unsigned))
}

fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

fn pem_from_body(body: &str) -> String {
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    pem.push_str(body);
    pem.push_str("\n-----END CERTIFICATE-----\n");
    pem
}

impl Engine for SoftEngine {
    fn name(&self) -> &str {
        "soft"
    }

    fn is_process_global(&self) -> bool {
        self.shared.process_global.load(Ordering::SeqCst)
    }

    fn init(&mut self) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::Init);
        if let Some(Fault::Fail(code)) = fault {
            return self.fail(code, "injected failure");
        }
        self.state().initialized = true;
        debug!("Soft engine initialized");
        codes::KCR_OK
    }

    fn finalize(&mut self) {
        let (_guard, _) = self.enter(SoftOp::Finalize);
        let mut state = self.state();
        state.initialized = false;
        state.key = None;
        state.trusted.clear();
        state.revoked.clear();
    }

    fn last_error_string(&mut self, out: &mut OutputBuffer) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::LastError);
        let message = self.state().last_error.clone();
        self.emit(fault, out, message.as_bytes())
    }

    fn tsa_set_url(&mut self, url: &str) {
        let (_guard, _) = self.enter(SoftOp::TsaSetUrl);
        self.state().tsa_url = Some(url.to_string());
    }

    fn set_proxy(
        &mut self,
        flags: Flags,
        host: &str,
        port: &str,
        user: &str,
        _password: &str,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::SetProxy);
        if let Some(Fault::Fail(code)) = fault {
            return self.fail(code, "injected failure");
        }
        if flags.contains(Flags::PROXY_ON) == flags.contains(Flags::PROXY_OFF) {
            return self.fail(codes::KCR_INVALID_FLAGS, "exactly one of PROXY_ON/PROXY_OFF");
        }
        self.state().proxy = Some(ProxyState {
            enabled: flags.contains(Flags::PROXY_ON),
            host: host.to_string(),
            port: port.to_string(),
            authenticated: flags.contains(Flags::PROXY_AUTH) && !user.is_empty(),
        });
        codes::KCR_OK
    }

    fn load_key_store(
        &mut self,
        store: StoreType,
        password: &str,
        container: &str,
        _alias: &str,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::LoadKeyStore);
        if let Some(Fault::Fail(code)) = fault {
            return self.fail(code, "injected failure");
        }
        if store != StoreType::Pkcs12 {
            return self.fail(codes::KCR_NOTOKENFOUND, "only file key stores are supported");
        }
        let raw = match std::fs::read(container) {
            Ok(raw) => raw,
            Err(e) => return self.fail(codes::KCR_OPENFILEERR, format!("{container}: {e}")),
        };
        let Ok(file) = serde_json::from_slice::<SoftKeyStore>(&raw) else {
            return self.fail(codes::KCR_ERROR_READ_PKCS12, "cannot read key store");
        };
        if hex::encode(Sha256::digest(password.as_bytes())) != file.password_sha256 {
            return self.fail(codes::KCR_INVALIDPASSWORD, "invalid key store password");
        }
        let pair = B64.decode(&file.pkcs8).ok().and_then(|pkcs8| {
            EcdsaKeyPair::from_pkcs8(
                &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                &pkcs8,
                &SystemRandom::new(),
            )
            .ok()
        });
        let Some(pair) = pair else {
            return self.fail(codes::KCR_ERROR_READ_PKCS12, "cannot read private key");
        };
        self.state().key = Some(LoadedKey {
            cert: file.cert,
            pair,
        });
        codes::KCR_OK
    }

    fn load_certificate_from_file(&mut self, path: &Path, kind: CertType) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::LoadCertificate);
        if let Some(Fault::Fail(code)) = fault {
            return self.fail(code, "injected failure");
        }
        let pem = match std::fs::read_to_string(path) {
            Ok(pem) => pem,
            Err(e) => {
                return self.fail(codes::KCR_OPENFILEERR, format!("{}: {e}", path.display()));
            }
        };
        let cert = match self.parse_cert(&pem) {
            Ok(cert) => cert,
            Err(rc) => return rc,
        };
        self.state().trusted.push((kind, cert));
        codes::KCR_OK
    }

    fn load_crl(&mut self, source: &str, crl: &[u8]) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::LoadCrl);
        if let Some(Fault::Fail(code)) = fault {
            return self.fail(code, "injected failure");
        }
        let Ok(text) = std::str::from_utf8(crl) else {
            return self.fail(codes::KCR_BADCRLFORMAT, "revocation list is not text");
        };
        let serials = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        self.state().revoked.insert(source.to_string(), serials);
        codes::KCR_OK
    }

    fn export_certificate_from_store(
        &mut self,
        _alias: &str,
        _flags: Flags,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::ExportCertificate);
        let pem = self.state().key.as_ref().map(|k| k.cert.to_pem());
        match pem {
            Some(pem) => self.emit(fault, out, pem.as_bytes()),
            None => self.fail(codes::KCR_CERTNOTFOUND, "no key store loaded"),
        }
    }

    fn certificate_get_info(
        &mut self,
        cert: &str,
        prop: CertProp,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::CertificateInfo);
        let cert = match self.parse_cert(cert) {
            Ok(cert) => cert,
            Err(rc) => return rc,
        };
        match cert.property(prop) {
            Some(value) => self.emit(fault, out, value.as_bytes()),
            None => self.fail(codes::KCR_INVALID_PROPID, format!("property {prop:?} not present")),
        }
    }

    fn validate_certificate(
        &mut self,
        cert: &str,
        kind: ValidateType,
        path: &str,
        check_time: i64,
        flags: Flags,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::ValidateCertificate);
        let cert = match self.parse_cert(cert) {
            Ok(cert) => cert,
            Err(rc) => return rc,
        };
        let at = if check_time == 0 {
            Utc::now()
        } else {
            DateTime::from_timestamp(check_time, 0).unwrap_or_else(Utc::now)
        };
        if !flags.contains(Flags::NO_CHECK_CERT_TIME) && !cert.is_current(at) {
            return self.fail(codes::KCR_CHECKCHAINERROR, "certificate is not valid at this time");
        }
        let revoked = match kind {
            ValidateType::Nothing => false,
            ValidateType::Crl if path.is_empty() => {
                self.state().revoked.values().any(|list| list.contains(&cert.serial))
            }
            ValidateType::Crl => match std::fs::read_to_string(path) {
                Ok(text) => text.lines().any(|l| l.trim() == cert.serial),
                Err(e) => return self.fail(codes::KCR_LOADCRLERROR, format!("{path}: {e}")),
            },
            ValidateType::Ocsp => {
                return self.fail(codes::KCR_VALIDTYPEERROR, "OCSP is not available");
            }
        };
        if revoked {
            return self.fail(codes::KCR_CHECKCHAINERROR, "certificate is revoked");
        }
        let info = format!(
            "Certificate {} ({}) is valid; revocation check: {kind:?}",
            cert.serial, cert.subject
        );
        self.emit(fault, out, info.as_bytes())
    }

    fn cert_from_cms(
        &mut self,
        cms: &[u8],
        signer: u32,
        flags: Flags,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::CertFromCms);
        let parsed = match self
            .input(cms, flags.contains(Flags::IN_BASE64))
            .and_then(|raw| self.parse_cms(&raw))
        {
            Ok(parsed) => parsed,
            Err(rc) => return rc,
        };
        let index = (signer as usize).checked_sub(1);
        match index.and_then(|i| parsed.signers.get(i)) {
            Some(s) => self.emit(fault, out, s.cert.as_bytes()),
            None => self.fail(codes::KCR_CERTNOTFOUND, format!("no signer {signer}")),
        }
    }

    fn cert_from_xml(&mut self, xml: &str, signer: u32, out: &mut OutputBuffer) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::CertFromXml);
        if signer != 1 {
            return self.fail(codes::KCR_CERTNOTFOUND, format!("no signer {signer}"));
        }
        match element_text(xml, "ds:X509Certificate") {
            Some(body) => self.emit(fault, out, pem_from_body(body).as_bytes()),
            None => self.fail(codes::KCR_NOSIGNFOUND, "no signature found"),
        }
    }

    fn time_from_signature(
        &mut self,
        cms: &[u8],
        flags: Flags,
        signer: u32,
        out_time: &mut i64,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::TimeFromSignature);
        if let Some(Fault::Fail(code)) = fault {
            return self.fail(code, "injected failure");
        }
        let parsed = match self
            .input(cms, flags.contains(Flags::IN_BASE64))
            .and_then(|raw| self.parse_cms(&raw))
        {
            Ok(parsed) => parsed,
            Err(rc) => return rc,
        };
        let index = (signer as usize).checked_sub(1);
        match index.and_then(|i| parsed.signers.get(i)) {
            Some(s) => {
                *out_time = s.signed_at;
                codes::KCR_OK
            }
            None => self.fail(codes::KCR_NOSIGNFOUND, format!("no signer {signer}")),
        }
    }

    fn hash_data(
        &mut self,
        algo: HashAlgo,
        flags: Flags,
        data: &[u8],
        out: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::HashData);
        if algo != HashAlgo::Sha256 {
            return self.fail(codes::KCR_UNKNOWN_ALG, format!("{} is not available", algo.engine_name()));
        }
        let data = match self.input(data, flags.contains(Flags::IN_BASE64)) {
            Ok(data) => data,
            Err(rc) => return rc,
        };
        let digest = Sha256::digest(&data);
        self.emit(fault, out, &Self::output(&digest, flags.contains(Flags::OUT_BASE64)))
    }

    fn sign_hash(
        &mut self,
        _alias: &str,
        flags: Flags,
        hash: &[u8],
        out: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::SignHash);
        if flags.contains(Flags::HASH_GOST95) {
            return self.fail(codes::KCR_UNKNOWN_ALG, "GOST digests are not available");
        }
        let digest = match self.input(hash, flags.contains(Flags::IN_BASE64)) {
            Ok(digest) => digest,
            Err(rc) => return rc,
        };
        if digest.len() != 32 {
            return self.fail(codes::KCR_SIGN_ERROR, "expected a SHA-256 digest");
        }
        self.produce_cms(flags | Flags::DETACHED_DATA, None, &digest, &[], out, fault)
    }

    fn sign_data(
        &mut self,
        _alias: &str,
        flags: Flags,
        data: &[u8],
        existing_signature: &[u8],
        out: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::SignData);
        let content = match self.input(data, flags.contains(Flags::IN_BASE64)) {
            Ok(content) => content,
            Err(rc) => return rc,
        };
        let digest = Sha256::digest(&content);
        self.produce_cms(flags, Some(&content), &digest, existing_signature, out, fault)
    }

    fn sign_xml(
        &mut self,
        _alias: &str,
        _flags: Flags,
        xml: &str,
        node_id: &str,
        parent_node: &str,
        _parent_namespace: &str,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::SignXml);
        self.sign_document(xml, node_id, Some(parent_node), out, fault)
    }

    fn sign_wsse(
        &mut self,
        _alias: &str,
        _flags: Flags,
        xml: &str,
        node_id: &str,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::SignWsse);
        let Some(header_end) = closing_tag(xml, "Header") else {
            return self.fail(codes::KCR_XMLPARSEERROR, "no SOAP header");
        };
        let security = format!("<wsse:Security xmlns:wsse=\"{WSSE_NS}\"></wsse:Security>");
        let mut with_security = String::with_capacity(xml.len() + security.len());
        with_security.push_str(&xml[..header_end]);
        with_security.push_str(&security);
        with_security.push_str(&xml[header_end..]);
        self.sign_document(&with_security, node_id, Some("wsse:Security"), out, fault)
    }

    fn verify_data(
        &mut self,
        _alias: &str,
        flags: Flags,
        data: &[u8],
        signature: &[u8],
        signer: u32,
        out_data: &mut OutputBuffer,
        out_info: &mut OutputBuffer,
        out_cert: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::VerifyData);
        let parsed = match self
            .input(signature, flags.contains(Flags::IN2_BASE64))
            .and_then(|raw| self.parse_cms(&raw))
        {
            Ok(parsed) => parsed,
            Err(rc) => return rc,
        };
        if parsed.signers.is_empty() {
            return self.fail(codes::KCR_NOSIGNFOUND, "no signers");
        }
        let content = if flags.contains(Flags::DETACHED_DATA) {
            self.input(data, flags.contains(Flags::IN_BASE64))
        } else {
            match &parsed.content {
                Some(content) => B64
                    .decode(content)
                    .map_err(|_| self.fail(codes::KCR_DECODE_ERROR, "corrupt content")),
                None => Err(self.fail(codes::KCR_DECODE_ERROR, "detached signature without data")),
            }
        };
        let content = match content {
            Ok(content) => content,
            Err(rc) => return rc,
        };

        let digest = Sha256::digest(&content);
        let mut info = String::new();
        for (i, s) in parsed.signers.iter().enumerate() {
            let cert = match self.parse_cert(&s.cert) {
                Ok(cert) => cert,
                Err(rc) => return rc,
            };
            let sig = B64.decode(&s.signature).unwrap_or_default();
            // Hash-signed containers sign a digest that must equal the content's.
            let digest_matches = B64.decode(&s.digest).ok().as_deref() == Some(&digest[..]);
            if !digest_matches || !cert.verify(&digest, &sig) {
                return self.fail(
                    codes::KCR_VERIFYSIGNERROR,
                    format!("signature {} does not match the content", i + 1),
                );
            }
            if let Err(rc) = self.check_cert_time(&cert, flags) {
                return rc;
            }
            info.push_str(&format!(
                "Signature {}: OK, signer CN={}, serial {}, signed at {}{}\n",
                i + 1,
                cert.subject,
                cert.serial,
                s.signed_at,
                if s.timestamped { ", timestamped" } else { "" },
            ));
        }

        let cert = parsed
            .signers
            .get((signer as usize).saturating_sub(1))
            .map(|s| s.cert.clone())
            .unwrap_or_default();
        if !flags.contains(Flags::DETACHED_DATA) {
            let data = Self::output(&content, flags.contains(Flags::OUT_BASE64));
            if !out_data.write(&data) {
                return self.fail(codes::KCR_BUFFER_TOO_SMALL, "data buffer too small");
            }
        }
        if !out_cert.write(cert.as_bytes()) {
            return self.fail(codes::KCR_BUFFER_TOO_SMALL, "certificate buffer too small");
        }
        self.emit(fault, out_info, info.as_bytes())
    }

    fn verify_xml(
        &mut self,
        _alias: &str,
        flags: Flags,
        xml: &str,
        out_info: &mut OutputBuffer,
    ) -> RawCode {
        let (_guard, fault) = self.enter(SoftOp::VerifyXml);
        let Some((element, unsigned)) = split_signature(xml) else {
            return self.fail(codes::KCR_NOSIGNFOUND, "no signature found");
        };
        let fields = (
            element_text(element, "ds:DigestValue"),
            element_text(element, "ds:SignatureValue"),
            element_text(element, "ds:X509Certificate"),
        );
        let (Some(digest_b64), Some(sig_b64), Some(cert_body)) = fields else {
            return self.fail(codes::KCR_XMLPARSEERROR, "incomplete signature element");
        };
        let cert = match self.parse_cert(&pem_from_body(cert_body)) {
            Ok(cert) => cert,
            Err(rc) => return rc,
        };
        let digest = Sha256::digest(unsigned.as_bytes());
        let claimed = B64.decode(digest_b64).unwrap_or_default();
        let sig = B64.decode(sig_b64).unwrap_or_default();
        if claimed != digest.as_slice() || !cert.verify(&digest, &sig) {
            return self.fail(codes::KCR_VERIFYSIGNERROR, "XML signature does not match");
        }
        if let Err(rc) = self.check_cert_time(&cert, flags) {
            return rc;
        }
        let info = format!("XML signature OK, signer CN={}, serial {}\n", cert.subject, cert.serial);
        self.emit(fault, out_info, info.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_key(password: &str) -> (SoftEngine, tempfile::NamedTempFile) {
        let mut engine = SoftEngine::new();
        let store = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(store.path(), SoftEngine::generate_key_store("TEST USER", password).unwrap())
            .unwrap();
        assert_eq!(engine.init(), codes::KCR_OK);
        let rc = engine.load_key_store(
            StoreType::Pkcs12,
            password,
            &store.path().to_string_lossy(),
            "",
        );
        assert_eq!(rc, codes::KCR_OK);
        (engine, store)
    }

    #[test]
    fn sha256_hash_matches_reference() {
        let mut engine = SoftEngine::new();
        let mut out = OutputBuffer::zeroed(128);
        let rc = engine.hash_data(HashAlgo::Sha256, Flags::NONE, b"abc", &mut out);
        assert_eq!(rc, codes::KCR_OK);
        assert_eq!(
            hex::encode(out.filled().unwrap()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn small_buffer_reports_required_length() {
        let mut engine = SoftEngine::new();
        let mut out = OutputBuffer::zeroed(4);
        let rc = engine.hash_data(HashAlgo::Sha256, Flags::NONE, b"abc", &mut out);
        assert_eq!(rc, codes::KCR_BUFFER_TOO_SMALL);
        assert_eq!(out.reported_len(), 32);
    }

    #[test]
    fn wrong_password_is_rejected() {
        let (mut engine, store) = engine_with_key("right");
        let rc = engine.load_key_store(
            StoreType::Pkcs12,
            "wrong",
            &store.path().to_string_lossy(),
            "",
        );
        assert_eq!(rc, codes::KCR_INVALIDPASSWORD);
    }

    #[test]
    fn cms_sign_and_verify() {
        let (mut engine, _store) = engine_with_key("pw");
        let mut cms = OutputBuffer::zeroed(50_000);
        assert_eq!(engine.sign_data("", Flags::SIGN_CMS, b"Hello", &[], &mut cms), codes::KCR_OK);
        let cms = cms.filled().unwrap().to_vec();

        let (mut data, mut info, mut cert) = (
            OutputBuffer::zeroed(1024),
            OutputBuffer::zeroed(4096),
            OutputBuffer::zeroed(4096),
        );
        let rc = engine.verify_data("", Flags::SIGN_CMS, &[], &cms, 1, &mut data, &mut info, &mut cert);
        assert_eq!(rc, codes::KCR_OK);
        assert_eq!(data.filled().unwrap(), b"Hello");
        assert!(String::from_utf8_lossy(info.filled().unwrap()).contains("TEST USER"));
    }

    #[test]
    fn xml_signature_detects_tampering() {
        let (mut engine, _store) = engine_with_key("pw");
        let mut out = OutputBuffer::zeroed(50_000);
        let rc = engine.sign_xml("", Flags::NONE, "<root><a>1</a></root>", "", "", "", &mut out);
        assert_eq!(rc, codes::KCR_OK);
        let signed = String::from_utf8(out.filled().unwrap().to_vec()).unwrap();
        assert!(signed.starts_with("<root><a>1</a><ds:Signature"));

        let mut info = OutputBuffer::zeroed(4096);
        assert_eq!(engine.verify_xml("", Flags::NONE, &signed, &mut info), codes::KCR_OK);

        let tampered = signed.replace("<a>1</a>", "<a>2</a>");
        let mut info = OutputBuffer::zeroed(4096);
        assert_eq!(
            engine.verify_xml("", Flags::NONE, &tampered, &mut info),
            codes::KCR_VERIFYSIGNERROR
        );
    }

    #[test]
    fn closing_tag_matches_prefixed_names() {
        let xml = "<s:Envelope><s:Header></s:Header><s:Body/></s:Envelope>";
        assert_eq!(closing_tag(xml, "Header"), xml.find("</s:Header>"));
        assert_eq!(closing_tag(xml, "s:Envelope"), xml.rfind("</"));
        assert_eq!(closing_tag(xml, "Missing"), None);
    }

    #[test]
    fn faults_are_one_shot() {
        let mut engine = SoftEngine::new();
        engine.inject(SoftOp::HashData, Fault::Fail(codes::KCR_MEMORY_ERROR));
        let mut out = OutputBuffer::zeroed(128);
        assert_eq!(
            engine.hash_data(HashAlgo::Sha256, Flags::NONE, b"x", &mut out),
            codes::KCR_MEMORY_ERROR
        );
        let mut out = OutputBuffer::zeroed(128);
        assert_eq!(engine.hash_data(HashAlgo::Sha256, Flags::NONE, b"x", &mut out), codes::KCR_OK);
        assert_eq!(engine.calls_to(SoftOp::HashData), 2);
        assert_eq!(engine.stats().max_in_flight, 1);
    }

    #[test]
    fn crl_marks_certificates_revoked() {
        let (mut engine, store) = engine_with_key("pw");
        let pem = SoftEngine::key_store_certificate(&std::fs::read(store.path()).unwrap()).unwrap();
        let serial = SoftCert::from_pem(&pem).unwrap().serial;

        let mut out = OutputBuffer::zeroed(4096);
        let rc = engine.validate_certificate(&pem, ValidateType::Crl, "", 0, Flags::NONE, &mut out);
        assert_eq!(rc, codes::KCR_OK);

        let none: [&str; 0] = [];
        assert_eq!(engine.load_crl("gost", &SoftEngine::revocation_list(&none)), codes::KCR_OK);
        assert_eq!(
            engine.load_crl("rsa", &SoftEngine::revocation_list(&[serial.as_str()])),
            codes::KCR_OK
        );
        let mut out = OutputBuffer::zeroed(4096);
        let rc = engine.validate_certificate(&pem, ValidateType::Crl, "", 0, Flags::NONE, &mut out);
        assert_eq!(rc, codes::KCR_CHECKCHAINERROR);

        // A newer list from the same source replaces the old one.
        assert_eq!(engine.load_crl("rsa", &SoftEngine::revocation_list(&none)), codes::KCR_OK);
        let mut out = OutputBuffer::zeroed(4096);
        let rc = engine.validate_certificate(&pem, ValidateType::Crl, "", 0, Flags::NONE, &mut out);
        assert_eq!(rc, codes::KCR_OK);
    }
}
