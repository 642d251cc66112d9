// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types: engine flags and selectors, operation inputs, and the
// typed results the facade hands back to callers.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codes::RawCode;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a session, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Engine flags
// ---------------------------------------------------------------------------

/// Bit flags passed to engine calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u32);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const SIGN_DRAFT: Flags = Flags(0x0000_0001);
    pub const SIGN_CMS: Flags = Flags(0x0000_0002);
    pub const IN_PEM: Flags = Flags(0x0000_0004);
    pub const IN_DER: Flags = Flags(0x0000_0008);
    pub const IN_BASE64: Flags = Flags(0x0000_0010);
    pub const IN2_BASE64: Flags = Flags(0x0000_0020);
    pub const DETACHED_DATA: Flags = Flags(0x0000_0040);
    pub const WITH_CERT: Flags = Flags(0x0000_0080);
    pub const WITH_TIMESTAMP: Flags = Flags(0x0000_0100);
    pub const OUT_PEM: Flags = Flags(0x0000_0200);
    pub const OUT_DER: Flags = Flags(0x0000_0400);
    pub const OUT_BASE64: Flags = Flags(0x0000_0800);
    pub const PROXY_OFF: Flags = Flags(0x0000_1000);
    pub const PROXY_ON: Flags = Flags(0x0000_2000);
    pub const PROXY_AUTH: Flags = Flags(0x0000_4000);
    pub const IN_FILE: Flags = Flags(0x0000_8000);
    pub const NO_CHECK_CERT_TIME: Flags = Flags(0x0001_0000);
    pub const HASH_SHA256: Flags = Flags(0x0002_0000);
    pub const HASH_GOST95: Flags = Flags(0x0004_0000);
    pub const GET_OCSP_RESPONSE: Flags = Flags(0x0008_0000);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// `self | other` when `on` is true, `self` otherwise.
    pub fn with_if(self, other: Flags, on: bool) -> Flags {
        if on { self | other } else { self }
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// Digest algorithms understood by the engine's hash call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgo {
    Sha256,
    Gost95,
}

impl HashAlgo {
    /// Algorithm name as the engine expects it.
    pub fn engine_name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Gost95 => "Gost34311_95",
        }
    }

    /// Flag selecting this digest for hash signing.
    pub fn flag(&self) -> Flags {
        match self {
            Self::Sha256 => Flags::HASH_SHA256,
            Self::Gost95 => Flags::HASH_GOST95,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Some(Self::Sha256),
            "gost34311_95" | "gost95" | "gost" => Some(Self::Gost95),
            _ => None,
        }
    }
}

/// Role of a certificate loaded into the engine's trust store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertType {
    Ca,
    Intermediate,
    User,
}

impl CertType {
    pub fn id(&self) -> i32 {
        match self {
            Self::Ca => 0x201,
            Self::Intermediate => 0x202,
            Self::User => 0x204,
        }
    }
}

/// Key store container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreType {
    Pkcs12,
    KzIdCard,
    KazToken,
    EToken,
    JaCarta,
    AkKey,
}

impl StoreType {
    pub fn id(&self) -> i32 {
        match self {
            Self::Pkcs12 => 0x1,
            Self::KzIdCard => 0x2,
            Self::KazToken => 0x4,
            Self::EToken => 0x8,
            Self::JaCarta => 0x10,
            Self::AkKey => 0x20,
        }
    }
}

/// Revocation check used when validating a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidateType {
    Nothing,
    Crl,
    Ocsp,
}

impl ValidateType {
    pub fn id(&self) -> i32 {
        match self {
            Self::Nothing => 0x401,
            Self::Crl => 0x402,
            Self::Ocsp => 0x404,
        }
    }
}

/// Certificate property selectors for the engine's cert-info call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertProp {
    IssuerCountryName,
    IssuerSopn,
    IssuerLocalityName,
    IssuerOrgName,
    IssuerOrgUnitName,
    IssuerCommonName,
    SubjectCountryName,
    SubjectSopn,
    SubjectLocalityName,
    SubjectCommonName,
    SubjectGivenName,
    SubjectSurname,
    SubjectSerialNumber,
    SubjectEmail,
    SubjectOrgName,
    SubjectOrgUnitName,
    SubjectBc,
    SubjectDc,
    NotBefore,
    NotAfter,
    KeyUsage,
    ExtKeyUsage,
    AuthKeyId,
    SubjKeyId,
    CertSerialNumber,
    IssuerDn,
    SubjectDn,
    SignatureAlg,
    PublicKey,
    PoliciesId,
    OcspUrl,
    CrlUrl,
    DeltaCrlUrl,
}

impl CertProp {
    pub const ALL: [CertProp; 33] = [
        Self::IssuerCountryName,
        Self::IssuerSopn,
        Self::IssuerLocalityName,
        Self::IssuerOrgName,
        Self::IssuerOrgUnitName,
        Self::IssuerCommonName,
        Self::SubjectCountryName,
        Self::SubjectSopn,
        Self::SubjectLocalityName,
        Self::SubjectCommonName,
        Self::SubjectGivenName,
        Self::SubjectSurname,
        Self::SubjectSerialNumber,
        Self::SubjectEmail,
        Self::SubjectOrgName,
        Self::SubjectOrgUnitName,
        Self::SubjectBc,
        Self::SubjectDc,
        Self::NotBefore,
        Self::NotAfter,
        Self::KeyUsage,
        Self::ExtKeyUsage,
        Self::AuthKeyId,
        Self::SubjKeyId,
        Self::CertSerialNumber,
        Self::IssuerDn,
        Self::SubjectDn,
        Self::SignatureAlg,
        Self::PublicKey,
        Self::PoliciesId,
        Self::OcspUrl,
        Self::CrlUrl,
        Self::DeltaCrlUrl,
    ];

    /// Property id passed to the engine. Ids are contiguous from 0x801.
    pub fn id(&self) -> i32 {
        let index = Self::ALL.iter().position(|p| p == self).unwrap_or_default();
        0x801 + index as i32
    }

    pub fn from_id(id: i32) -> Option<Self> {
        let index = usize::try_from(id.checked_sub(0x801)?).ok()?;
        Self::ALL.get(index).copied()
    }
}

/// What a certificate's key is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyUsage {
    /// Signing: digitalSignature + nonRepudiation.
    Sign,
    /// Authentication: digitalSignature + keyEncipherment.
    Auth,
    Unknown,
}

impl KeyUsage {
    /// Derive the usage from the engine's key-usage property text.
    pub fn from_property(value: &str) -> Self {
        let has = |name: &str| {
            value
                .split(|c: char| c.is_whitespace() || matches!(c, '=' | ',' | ';'))
                .any(|word| word == name)
        };
        if has("digitalSignature") && has("nonRepudiation") {
            Self::Sign
        } else if has("digitalSignature") && has("keyEncipherment") {
            Self::Auth
        } else {
            Self::Unknown
        }
    }
}

// ---------------------------------------------------------------------------
// Operation inputs
// ---------------------------------------------------------------------------

/// Input for CMS signing of arbitrary bytes.
#[derive(Debug, Clone, Default)]
pub struct SignInput {
    pub data: Vec<u8>,
    /// Produce a detached signature (data not embedded).
    pub detached: bool,
    /// Ask the engine to embed a trusted timestamp from the TSP service.
    pub with_tsp: bool,
    /// Existing CMS to add a signature to (co-signing).
    pub existing_signature: Option<Vec<u8>>,
}

/// Input for signing a pre-computed digest.
#[derive(Debug, Clone)]
pub struct SignHashInput {
    pub algo: HashAlgo,
    pub hash: Vec<u8>,
    pub detached: bool,
    pub with_tsp: bool,
}

/// Input for XML-DSig signing.
#[derive(Debug, Clone, Default)]
pub struct SignXmlInput {
    pub xml: String,
    pub with_tsp: bool,
    /// Id of the element to sign; the whole document when empty.
    pub sign_node_id: String,
    /// Element under which the signature is placed; the root when empty.
    pub parent_sign_node: String,
    pub parent_namespace: String,
}

/// Input for CMS verification.
#[derive(Debug, Clone, Default)]
pub struct VerifyInput {
    pub signature: Vec<u8>,
    /// Signed content, required when the signature is detached.
    pub data: Option<Vec<u8>>,
    pub must_check_cert_time: bool,
}

impl VerifyInput {
    pub fn is_detached(&self) -> bool {
        self.data.is_some()
    }
}

/// Input for XML-DSig verification.
#[derive(Debug, Clone, Default)]
pub struct VerifyXmlInput {
    pub signed_xml: String,
    pub must_check_cert_time: bool,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of a signature check that the engine was able to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyStatus {
    Valid,
    /// The signature does not match the content.
    Mismatch {
        code: RawCode,
        message: Option<String>,
    },
}

/// Result of a verification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub status: VerifyStatus,
    /// Engine's verification report.
    pub info: String,
    /// Content recovered from an attached CMS signature.
    pub data: Option<Vec<u8>>,
    /// Signer certificate (PEM) when the engine returned one.
    pub certificate: Option<String>,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        self.status == VerifyStatus::Valid
    }
}

/// Decoded certificate summary assembled from individual property calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertInfo {
    pub subject_dn: Option<String>,
    pub issuer_dn: Option<String>,
    pub subject_common_name: Option<String>,
    pub subject_serial_number: Option<String>,
    pub serial_number: Option<String>,
    pub not_before: Option<String>,
    pub not_after: Option<String>,
    pub key_usage: Option<String>,
    pub signature_algorithm: Option<String>,
    pub usage: Option<KeyUsage>,
}

/// Signing time recovered from a CMS signature.
pub type SigningTime = DateTime<Utc>;
