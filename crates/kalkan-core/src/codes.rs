// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine return codes.
//
// The engine reports every outcome as an `unsigned long`. Zero is success,
// everything else is an engine-specific failure. The facade surfaces codes
// verbatim; the names below only make diagnostics readable. The one place
// codes are interpreted is signature verification, where a mismatch is a
// result rather than an error.

/// Raw engine return code.
pub type RawCode = u64;

pub const KCR_OK: RawCode = 0;

pub const KCR_ERROR_READ_PKCS12: RawCode = 0x08F0_0001;
pub const KCR_ERROR_OPEN_PKCS12: RawCode = 0x08F0_0002;
pub const KCR_INVALID_PROPID: RawCode = 0x08F0_0003;
pub const KCR_BUFFER_TOO_SMALL: RawCode = 0x08F0_0004;
pub const KCR_CERT_PARSE_ERROR: RawCode = 0x08F0_0005;
pub const KCR_INVALID_FLAG: RawCode = 0x08F0_0006;
pub const KCR_OPENFILEERR: RawCode = 0x08F0_0007;
pub const KCR_INVALIDPASSWORD: RawCode = 0x08F0_0008;
pub const KCR_MEMORY_ERROR: RawCode = 0x08F0_000D;
pub const KCR_CHECKCHAINERROR: RawCode = 0x08F0_000E;
pub const KCR_VALIDTYPEERROR: RawCode = 0x08F0_0010;
pub const KCR_BADCRLFORMAT: RawCode = 0x08F0_0011;
pub const KCR_LOADCRLERROR: RawCode = 0x08F0_0012;
pub const KCR_UNKNOWN_ALG: RawCode = 0x08F0_0015;
pub const KCR_KEYNOTFOUND: RawCode = 0x08F0_0016;
pub const KCR_SIGN_INIT_ERROR: RawCode = 0x08F0_0017;
pub const KCR_SIGN_ERROR: RawCode = 0x08F0_0018;
pub const KCR_ENCODE_ERROR: RawCode = 0x08F0_0019;
pub const KCR_INVALID_FLAGS: RawCode = 0x08F0_001A;
pub const KCR_CERTNOTFOUND: RawCode = 0x08F0_001B;
pub const KCR_VERIFYSIGNERROR: RawCode = 0x08F0_001C;
pub const KCR_BASE64_DECODE_ERROR: RawCode = 0x08F0_001D;
pub const KCR_UNKNOWN_CMS_FORMAT: RawCode = 0x08F0_001E;
pub const KCR_CA_CERT_NOT_FOUND: RawCode = 0x08F0_0020;
pub const KCR_XMLSECINIT_ERROR: RawCode = 0x08F0_0021;
pub const KCR_LOADTRUSTEDCERTSERR: RawCode = 0x08F0_0022;
pub const KCR_SIGN_INVALID: RawCode = 0x08F0_0023;
pub const KCR_NOSIGNFOUND: RawCode = 0x08F0_0024;
pub const KCR_DECODE_ERROR: RawCode = 0x08F0_0025;
pub const KCR_XMLPARSEERROR: RawCode = 0x08F0_0026;
pub const KCR_XMLADDIDERROR: RawCode = 0x08F0_0027;
pub const KCR_XMLINTERNALERROR: RawCode = 0x08F0_0028;
pub const KCR_XMLSETSIGNERROR: RawCode = 0x08F0_0029;
pub const KCR_OPENSSLERROR: RawCode = 0x08F0_002A;
pub const KCR_NOTOKENFOUND: RawCode = 0x08F0_002C;

const NAMES: &[(RawCode, &str)] = &[
    (KCR_OK, "KCR_OK"),
    (KCR_ERROR_READ_PKCS12, "KCR_ERROR_READ_PKCS12"),
    (KCR_ERROR_OPEN_PKCS12, "KCR_ERROR_OPEN_PKCS12"),
    (KCR_INVALID_PROPID, "KCR_INVALID_PROPID"),
    (KCR_BUFFER_TOO_SMALL, "KCR_BUFFER_TOO_SMALL"),
    (KCR_CERT_PARSE_ERROR, "KCR_CERT_PARSE_ERROR"),
    (KCR_INVALID_FLAG, "KCR_INVALID_FLAG"),
    (KCR_OPENFILEERR, "KCR_OPENFILEERR"),
    (KCR_INVALIDPASSWORD, "KCR_INVALIDPASSWORD"),
    (KCR_MEMORY_ERROR, "KCR_MEMORY_ERROR"),
    (KCR_CHECKCHAINERROR, "KCR_CHECKCHAINERROR"),
    (KCR_VALIDTYPEERROR, "KCR_VALIDTYPEERROR"),
    (KCR_BADCRLFORMAT, "KCR_BADCRLFORMAT"),
    (KCR_LOADCRLERROR, "KCR_LOADCRLERROR"),
    (KCR_UNKNOWN_ALG, "KCR_UNKNOWN_ALG"),
    (KCR_KEYNOTFOUND, "KCR_KEYNOTFOUND"),
    (KCR_SIGN_INIT_ERROR, "KCR_SIGN_INIT_ERROR"),
    (KCR_SIGN_ERROR, "KCR_SIGN_ERROR"),
    (KCR_ENCODE_ERROR, "KCR_ENCODE_ERROR"),
    (KCR_INVALID_FLAGS, "KCR_INVALID_FLAGS"),
    (KCR_CERTNOTFOUND, "KCR_CERTNOTFOUND"),
    (KCR_VERIFYSIGNERROR, "KCR_VERIFYSIGNERROR"),
    (KCR_BASE64_DECODE_ERROR, "KCR_BASE64_DECODE_ERROR"),
    (KCR_UNKNOWN_CMS_FORMAT, "KCR_UNKNOWN_CMS_FORMAT"),
    (KCR_CA_CERT_NOT_FOUND, "KCR_CA_CERT_NOT_FOUND"),
    (KCR_XMLSECINIT_ERROR, "KCR_XMLSECINIT_ERROR"),
    (KCR_LOADTRUSTEDCERTSERR, "KCR_LOADTRUSTEDCERTSERR"),
    (KCR_SIGN_INVALID, "KCR_SIGN_INVALID"),
    (KCR_NOSIGNFOUND, "KCR_NOSIGNFOUND"),
    (KCR_DECODE_ERROR, "KCR_DECODE_ERROR"),
    (KCR_XMLPARSEERROR, "KCR_XMLPARSEERROR"),
    (KCR_XMLADDIDERROR, "KCR_XMLADDIDERROR"),
    (KCR_XMLINTERNALERROR, "KCR_XMLINTERNALERROR"),
    (KCR_XMLSETSIGNERROR, "KCR_XMLSETSIGNERROR"),
    (KCR_OPENSSLERROR, "KCR_OPENSSLERROR"),
    (KCR_NOTOKENFOUND, "KCR_NOTOKENFOUND"),
];

/// Symbolic name of a known engine code.
pub fn name(code: RawCode) -> Option<&'static str> {
    NAMES.iter().find(|(c, _)| *c == code).map(|(_, n)| *n)
}

/// Symbolic name of a code, or `"unknown"`.
pub fn describe(code: &RawCode) -> &'static str {
    name(*code).unwrap_or("unknown")
}

/// Whether the code reports a signature that does not match its content,
/// as opposed to a failure to perform the verification at all.
pub fn is_signature_mismatch(code: RawCode) -> bool {
    matches!(code, KCR_VERIFYSIGNERROR | KCR_SIGN_INVALID)
}
