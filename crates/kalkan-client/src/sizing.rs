// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output buffer sizing.
//
// The engine cannot report a required size up front, so every output buffer
// is sized from the operation kind and the input length before the call.
// Base64 output and CMS wrapping roughly double the input, hence the `2n`
// terms; the bases cover certificates, timestamps and signer info.

/// Output buffers the facade allocates, one per kind of engine output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Hash,
    Sign,
    SignHash,
    SignXml,
    SignWsse,
    /// Content recovered from an attached CMS signature.
    VerifyData,
    VerifyInfo,
    VerifyCert,
    VerifyXmlInfo,
    ValidateInfo,
    ExportCertificate,
    CertificateInfo,
    CertificateFromCms,
    CertificateFromXml,
    LastError,
}

/// `base + multiplier * n` for one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRule {
    pub base: usize,
    pub multiplier: usize,
}

impl SizeRule {
    const fn fixed(base: usize) -> Self {
        Self {
            base,
            multiplier: 0,
        }
    }

    const fn scaled(base: usize, multiplier: usize) -> Self {
        Self { base, multiplier }
    }
}

/// Sizing rule for `kind`.
pub fn rule(kind: OperationKind) -> SizeRule {
    use OperationKind::*;
    match kind {
        Hash | Sign | SignHash | SignXml | SignWsse => SizeRule::scaled(50_000, 2),
        VerifyData => SizeRule::scaled(28_000, 2),
        VerifyInfo | VerifyXmlInfo | ValidateInfo => SizeRule::fixed(64_768),
        VerifyCert | ExportCertificate | CertificateInfo | CertificateFromCms
        | CertificateFromXml => SizeRule::fixed(32_768),
        LastError => SizeRule::fixed(65_534),
    }
}

/// Buffer capacity for `kind` given an input of `input_len` bytes.
/// Saturates instead of overflowing.
pub fn capacity(kind: OperationKind, input_len: usize) -> usize {
    let SizeRule { base, multiplier } = rule(kind);
    base.saturating_add(multiplier.saturating_mul(input_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_kinds_grow_with_input() {
        assert_eq!(capacity(OperationKind::Hash, 0), 50_000);
        assert_eq!(capacity(OperationKind::Sign, 1_000), 52_000);
        assert_eq!(capacity(OperationKind::VerifyData, 10), 28_020);
    }

    #[test]
    fn fixed_kinds_ignore_input() {
        assert_eq!(capacity(OperationKind::ExportCertificate, 0), 32_768);
        assert_eq!(capacity(OperationKind::CertificateInfo, 1 << 20), 32_768);
        assert_eq!(capacity(OperationKind::VerifyInfo, 5), 64_768);
        assert_eq!(capacity(OperationKind::LastError, 0), 65_534);
    }

    #[test]
    fn capacity_saturates() {
        assert_eq!(capacity(OperationKind::SignXml, usize::MAX), usize::MAX);
    }
}
