// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Facade operations.
//
// Every operation follows the same shape: encode the input, size the output
// buffers, take the engine lock, make the call, translate the return code and
// materialize the reported bytes. Binary inputs travel as base64 text with
// the engine's base64 flags set, so the engine never sees raw NULs.

use std::io::Write;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use kalkan_core::codes;
use kalkan_core::{
    CertInfo, CertProp, CertType, Flags, HashAlgo, KalkanError, KeyUsage, Result, SignHashInput,
    SignInput, SignXmlInput, StoreType, ValidateType, Verification, VerifyInput, VerifyStatus,
    VerifyXmlInput,
};
use kalkan_engine::OutputBuffer;

use crate::refresher;
use crate::session::Session;
use crate::sizing::{self, OperationKind};
use crate::translate::{decode_base64, read_text, text_arg};

/// The key store's default key. The facade works with a single loaded key.
const DEFAULT_ALIAS: &str = "";

fn signer_arg(signer: u32) -> Result<u32> {
    if signer == 0 {
        return Err(KalkanError::InvalidInput("signer index starts at 1".into()));
    }
    if i32::try_from(signer).is_err() {
        return Err(KalkanError::InvalidInput(format!("signer index {signer} out of range")));
    }
    Ok(signer)
}

fn non_empty(text: String) -> Option<String> {
    Some(text).filter(|t| !t.trim().is_empty())
}

/// Write `bytes` to a private temporary file for calls that take a path.
fn scratch_file(prefix: &str, bytes: &[u8]) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix(prefix).tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

impl Session {
    // -- Key material --

    /// Load a PKCS#12 key store from disk.
    #[instrument(skip_all, fields(session = %self.id, path = %path.as_ref().display()))]
    pub fn load_key_store(&self, path: impl AsRef<Path>, password: &str) -> Result<()> {
        let path = path.as_ref();
        let container = path.to_str().ok_or_else(|| {
            KalkanError::InvalidInput(format!("key store path {} is not UTF-8", path.display()))
        })?;
        let container = text_arg("key store path", container)?;
        let password = text_arg("password", password)?;
        self.serializer.call("load_key_store", |call| {
            let rc = call
                .engine()
                .load_key_store(StoreType::Pkcs12, password, container, DEFAULT_ALIAS);
            call.check(rc)
        })?;
        info!("Key store loaded");
        Ok(())
    }

    /// Load a PKCS#12 key store held in memory. The engine only reads key
    /// stores from files, so the bytes pass through a private temporary file
    /// that is removed afterwards.
    #[instrument(skip_all, fields(session = %self.id, bytes = key_store.len()))]
    pub fn load_key_store_bytes(&self, key_store: &[u8], password: &str) -> Result<()> {
        let file = scratch_file("kalkan-keystore", key_store)?;
        self.load_key_store(file.path(), password)
    }

    /// Add a certificate to the engine's trust store.
    #[instrument(skip_all, fields(session = %self.id, kind = ?kind, bytes = cert.len()))]
    pub fn load_certificate(&self, cert: &[u8], kind: CertType) -> Result<()> {
        let file = scratch_file("kalkan-cert", cert)?;
        self.serializer.call("load_certificate", |call| {
            let rc = call.engine().load_certificate_from_file(file.path(), kind);
            call.check(rc)
        })
    }

    /// Download and load every configured CRL now, outside the refresher
    /// schedule.
    #[instrument(skip_all, fields(session = %self.id))]
    pub fn refresh_revocation_data(&self) -> Result<()> {
        if self.serializer.is_closed() {
            return Err(KalkanError::AlreadyClosed);
        }
        refresher::refresh_once(&self.serializer, self.fetcher.as_ref(), &self.config.crl_urls)
    }

    // -- Hashing --

    /// Digest of `data` as base64 text.
    #[instrument(skip_all, fields(session = %self.id, algo = ?algo, len = data.len()))]
    pub fn hash(&self, algo: HashAlgo, data: &[u8]) -> Result<String> {
        let input = B64.encode(data);
        let capacity = sizing::capacity(OperationKind::Hash, input.len());
        let digest = self.serializer.call("hash_data", |call| {
            let mut out = OutputBuffer::zeroed(capacity);
            let flags = Flags::IN_BASE64 | Flags::OUT_BASE64;
            let rc = call.engine().hash_data(algo, flags, input.as_bytes(), &mut out);
            call.check(rc)?;
            read_text(&out, "hash")
        })?;
        Ok(digest.trim().to_string())
    }

    pub fn hash_sha256(&self, data: &[u8]) -> Result<String> {
        self.hash(HashAlgo::Sha256, data)
    }

    pub fn hash_gost95(&self, data: &[u8]) -> Result<String> {
        self.hash(HashAlgo::Gost95, data)
    }

    // -- Signing --

    /// Sign `input.data` into a CMS container.
    #[instrument(skip_all, fields(session = %self.id, len = input.data.len(), detached = input.detached, tsp = input.with_tsp))]
    pub fn sign(&self, input: &SignInput) -> Result<Vec<u8>> {
        let data = B64.encode(&input.data);
        let existing = input
            .existing_signature
            .as_deref()
            .map(|sig| B64.encode(sig))
            .unwrap_or_default();
        let flags = (Flags::SIGN_CMS | Flags::IN_BASE64 | Flags::OUT_BASE64)
            .with_if(Flags::IN2_BASE64, !existing.is_empty())
            .with_if(Flags::DETACHED_DATA, input.detached)
            .with_if(Flags::WITH_TIMESTAMP, input.with_tsp);
        let capacity = sizing::capacity(OperationKind::Sign, data.len() + existing.len());
        let cms = self.serializer.call("sign_data", |call| {
            let mut out = OutputBuffer::zeroed(capacity);
            let rc = call.engine().sign_data(
                DEFAULT_ALIAS,
                flags,
                data.as_bytes(),
                existing.as_bytes(),
                &mut out,
            );
            call.check(rc)?;
            read_text(&out, "CMS signature")
        })?;
        decode_base64(&cms, "CMS signature")
    }

    /// Sign a pre-computed digest into a CMS container.
    #[instrument(skip_all, fields(session = %self.id, algo = ?input.algo, detached = input.detached))]
    pub fn sign_hash(&self, input: &SignHashInput) -> Result<Vec<u8>> {
        let hash = B64.encode(&input.hash);
        let flags = (Flags::SIGN_CMS | Flags::IN_BASE64 | Flags::OUT_BASE64 | input.algo.flag())
            .with_if(Flags::DETACHED_DATA, input.detached)
            .with_if(Flags::WITH_TIMESTAMP, input.with_tsp);
        let capacity = sizing::capacity(OperationKind::SignHash, hash.len());
        let cms = self.serializer.call("sign_hash", |call| {
            let mut out = OutputBuffer::zeroed(capacity);
            let rc = call
                .engine()
                .sign_hash(DEFAULT_ALIAS, flags, hash.as_bytes(), &mut out);
            call.check(rc)?;
            read_text(&out, "CMS signature")
        })?;
        decode_base64(&cms, "CMS signature")
    }

    /// Produce an XML-DSig signed copy of `input.xml`.
    #[instrument(skip_all, fields(session = %self.id, len = input.xml.len(), node = %input.sign_node_id))]
    pub fn sign_xml(&self, input: &SignXmlInput) -> Result<String> {
        let xml = text_arg("XML", &input.xml)?;
        let node_id = text_arg("sign node id", &input.sign_node_id)?;
        let parent = text_arg("parent sign node", &input.parent_sign_node)?;
        let namespace = text_arg("parent namespace", &input.parent_namespace)?;
        let flags = Flags::NONE.with_if(Flags::WITH_TIMESTAMP, input.with_tsp);
        let capacity = sizing::capacity(OperationKind::SignXml, xml.len());
        self.serializer.call("sign_xml", |call| {
            let mut out = OutputBuffer::zeroed(capacity);
            let rc = call.engine().sign_xml(
                DEFAULT_ALIAS,
                flags,
                xml,
                node_id,
                parent,
                namespace,
                &mut out,
            );
            call.check(rc)?;
            read_text(&out, "signed XML")
        })
    }

    /// Sign a SOAP envelope per WS-Security, referencing the body element
    /// with id `body_id`.
    #[instrument(skip_all, fields(session = %self.id, len = xml.len(), body_id = %body_id))]
    pub fn sign_wsse(&self, xml: &str, body_id: &str) -> Result<String> {
        let xml = text_arg("XML", xml)?;
        let body_id = text_arg("body id", body_id)?;
        let capacity = sizing::capacity(OperationKind::SignWsse, xml.len());
        self.serializer.call("sign_wsse", |call| {
            let mut out = OutputBuffer::zeroed(capacity);
            let rc = call
                .engine()
                .sign_wsse(DEFAULT_ALIAS, Flags::NONE, xml, body_id, &mut out);
            call.check(rc)?;
            read_text(&out, "signed SOAP envelope")
        })
    }

    // -- Verification --

    /// Verify a CMS signature. A signature that does not match its content
    /// is a `Mismatch` result, not an error.
    #[instrument(skip_all, fields(session = %self.id, len = input.signature.len(), detached = input.is_detached()))]
    pub fn verify(&self, input: &VerifyInput) -> Result<Verification> {
        let signature = B64.encode(&input.signature);
        let data = input.data.as_deref().map(|d| B64.encode(d)).unwrap_or_default();
        let flags = (Flags::SIGN_CMS | Flags::IN_BASE64 | Flags::IN2_BASE64 | Flags::OUT_BASE64)
            .with_if(Flags::DETACHED_DATA, input.is_detached())
            .with_if(Flags::NO_CHECK_CERT_TIME, !input.must_check_cert_time);
        let data_capacity = sizing::capacity(OperationKind::VerifyData, signature.len());
        let info_capacity = sizing::capacity(OperationKind::VerifyInfo, 0);
        let cert_capacity = sizing::capacity(OperationKind::VerifyCert, 0);

        let verification = self.serializer.call("verify_data", |call| {
            let mut out_data = OutputBuffer::zeroed(data_capacity);
            let mut out_info = OutputBuffer::zeroed(info_capacity);
            let mut out_cert = OutputBuffer::zeroed(cert_capacity);
            let rc = call.engine().verify_data(
                DEFAULT_ALIAS,
                flags,
                data.as_bytes(),
                signature.as_bytes(),
                1,
                &mut out_data,
                &mut out_info,
                &mut out_cert,
            );
            if codes::is_signature_mismatch(rc) {
                return Ok(Verification {
                    status: VerifyStatus::Mismatch {
                        code: rc,
                        message: call.last_error(),
                    },
                    info: read_text(&out_info, "verify info").unwrap_or_default(),
                    data: None,
                    certificate: None,
                });
            }
            call.check(rc)?;

            let info = read_text(&out_info, "verify info")?;
            let certificate = non_empty(read_text(&out_cert, "signer certificate")?);
            let data = if input.is_detached() {
                None
            } else {
                match non_empty(read_text(&out_data, "signed data")?) {
                    Some(text) => Some(decode_base64(&text, "signed data")?),
                    None => None,
                }
            };
            Ok(Verification {
                status: VerifyStatus::Valid,
                info,
                data,
                certificate,
            })
        })?;
        debug!(valid = verification.is_valid(), "CMS verified");
        Ok(verification)
    }

    /// Verify an XML-DSig signed document.
    #[instrument(skip_all, fields(session = %self.id, len = input.signed_xml.len()))]
    pub fn verify_xml(&self, input: &VerifyXmlInput) -> Result<Verification> {
        let xml = text_arg("XML", &input.signed_xml)?;
        let flags = Flags::NONE.with_if(Flags::NO_CHECK_CERT_TIME, !input.must_check_cert_time);
        let capacity = sizing::capacity(OperationKind::VerifyXmlInfo, 0);
        let verification = self.serializer.call("verify_xml", |call| {
            let mut out_info = OutputBuffer::zeroed(capacity);
            let rc = call
                .engine()
                .verify_xml(DEFAULT_ALIAS, flags, xml, &mut out_info);
            let status = if codes::is_signature_mismatch(rc) {
                VerifyStatus::Mismatch {
                    code: rc,
                    message: call.last_error(),
                }
            } else {
                call.check(rc)?;
                VerifyStatus::Valid
            };
            let info = match status {
                VerifyStatus::Valid => read_text(&out_info, "verify info")?,
                VerifyStatus::Mismatch { .. } => {
                    read_text(&out_info, "verify info").unwrap_or_default()
                }
            };
            Ok(Verification {
                status,
                info,
                data: None,
                certificate: None,
            })
        })?;
        debug!(valid = verification.is_valid(), "XML verified");
        Ok(verification)
    }

    /// Check a certificate's validity period, chain and, depending on
    /// `kind`, revocation status. For OCSP the configured responder is used
    /// unless `path` names another; for CRL the most recently loaded list is
    /// used unless `path` names a file.
    #[instrument(skip_all, fields(session = %self.id, kind = ?kind))]
    pub fn validate_certificate(
        &self,
        cert_pem: &str,
        kind: ValidateType,
        path: Option<&str>,
    ) -> Result<String> {
        let cert = text_arg("certificate", cert_pem)?;
        let path = match (kind, path) {
            (_, Some(path)) => path,
            (ValidateType::Ocsp, None) => self.config.ocsp_url.as_str(),
            (_, None) => "",
        };
        let path = text_arg("validation path", path)?;
        let capacity = sizing::capacity(OperationKind::ValidateInfo, 0);
        self.serializer.call("validate_certificate", |call| {
            let mut out = OutputBuffer::zeroed(capacity);
            let rc = call
                .engine()
                .validate_certificate(cert, kind, path, 0, Flags::NONE, &mut out);
            call.check(rc)?;
            read_text(&out, "validation info")
        })
    }

    // -- Certificates --

    /// Certificate of the loaded key, PEM encoded.
    #[instrument(skip_all, fields(session = %self.id))]
    pub fn export_certificate_from_store(&self) -> Result<String> {
        let capacity = sizing::capacity(OperationKind::ExportCertificate, 0);
        self.serializer.call("export_certificate", |call| {
            let mut out = OutputBuffer::zeroed(capacity);
            let rc = call
                .engine()
                .export_certificate_from_store(DEFAULT_ALIAS, Flags::NONE, &mut out);
            call.check(rc)?;
            read_text(&out, "certificate")
        })
    }

    /// A single certificate property.
    #[instrument(skip_all, fields(session = %self.id, prop = ?prop))]
    pub fn certificate_property(&self, cert_pem: &str, prop: CertProp) -> Result<String> {
        let cert = text_arg("certificate", cert_pem)?;
        let capacity = sizing::capacity(OperationKind::CertificateInfo, 0);
        let value = self.serializer.call("certificate_info", |call| {
            let mut out = OutputBuffer::zeroed(capacity);
            let rc = call.engine().certificate_get_info(cert, prop, &mut out);
            call.check(rc)?;
            read_text(&out, "certificate property")
        })?;
        Ok(value.trim().to_string())
    }

    /// Summary of the commonly used certificate properties. Properties the
    /// certificate does not carry are left empty; the lookups share one
    /// engine lock acquisition.
    #[instrument(skip_all, fields(session = %self.id))]
    pub fn certificate_info(&self, cert_pem: &str) -> Result<CertInfo> {
        let cert = text_arg("certificate", cert_pem)?;
        let capacity = sizing::capacity(OperationKind::CertificateInfo, 0);
        self.serializer.call("certificate_info", |call| {
            let mut lookup = |prop: CertProp| -> Result<Option<String>> {
                let mut out = OutputBuffer::zeroed(capacity);
                let rc = call.engine().certificate_get_info(cert, prop, &mut out);
                match call.check(rc) {
                    Ok(()) => Ok(non_empty(read_text(&out, "certificate property")?)
                        .map(|v| v.trim().to_string())),
                    Err(e) if e.code() == Some(codes::KCR_INVALID_PROPID) => Ok(None),
                    Err(e) => Err(e),
                }
            };
            let mut info = CertInfo {
                subject_dn: lookup(CertProp::SubjectDn)?,
                issuer_dn: lookup(CertProp::IssuerDn)?,
                subject_common_name: lookup(CertProp::SubjectCommonName)?,
                subject_serial_number: lookup(CertProp::SubjectSerialNumber)?,
                serial_number: lookup(CertProp::CertSerialNumber)?,
                not_before: lookup(CertProp::NotBefore)?,
                not_after: lookup(CertProp::NotAfter)?,
                key_usage: lookup(CertProp::KeyUsage)?,
                signature_algorithm: lookup(CertProp::SignatureAlg)?,
                usage: None,
            };
            info.usage = info.key_usage.as_deref().map(KeyUsage::from_property);
            Ok(info)
        })
    }

    /// Whether the certificate is meant for signing or authentication.
    pub fn key_usage(&self, cert_pem: &str) -> Result<KeyUsage> {
        let usage = self.certificate_property(cert_pem, CertProp::KeyUsage)?;
        Ok(KeyUsage::from_property(&usage))
    }

    /// Certificate of signer `signer` (1-based) of a CMS signature.
    #[instrument(skip_all, fields(session = %self.id, signer = signer))]
    pub fn certificate_from_cms(&self, cms: &[u8], signer: u32) -> Result<String> {
        let signer = signer_arg(signer)?;
        let cms = B64.encode(cms);
        let capacity = sizing::capacity(OperationKind::CertificateFromCms, 0);
        self.serializer.call("cert_from_cms", |call| {
            let mut out = OutputBuffer::zeroed(capacity);
            let rc = call
                .engine()
                .cert_from_cms(cms.as_bytes(), signer, Flags::IN_BASE64, &mut out);
            call.check(rc)?;
            read_text(&out, "certificate")
        })
    }

    /// Certificate of signer `signer` (1-based) of a signed XML document.
    #[instrument(skip_all, fields(session = %self.id, signer = signer))]
    pub fn certificate_from_xml(&self, xml: &str, signer: u32) -> Result<String> {
        let signer = signer_arg(signer)?;
        let xml = text_arg("XML", xml)?;
        let capacity = sizing::capacity(OperationKind::CertificateFromXml, 0);
        self.serializer.call("cert_from_xml", |call| {
            let mut out = OutputBuffer::zeroed(capacity);
            let rc = call.engine().cert_from_xml(xml, signer, &mut out);
            call.check(rc)?;
            read_text(&out, "certificate")
        })
    }

    /// Signing time recorded for signer `signer` (1-based) of a CMS
    /// signature.
    #[instrument(skip_all, fields(session = %self.id, signer = signer))]
    pub fn signing_time(&self, cms: &[u8], signer: u32) -> Result<DateTime<Utc>> {
        let signer = signer_arg(signer)?;
        let cms = B64.encode(cms);
        let seconds = self.serializer.call("time_from_signature", |call| {
            let mut seconds = 0_i64;
            let rc = call.engine().time_from_signature(
                cms.as_bytes(),
                Flags::IN_BASE64,
                signer,
                &mut seconds,
            );
            call.check(rc)?;
            Ok(seconds)
        })?;
        DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
            KalkanError::InvalidOutput(format!("signing time {seconds} is out of range"))
        })
    }
}
