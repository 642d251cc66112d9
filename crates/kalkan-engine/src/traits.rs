// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The engine call table as a Rust trait.
//
// Methods mirror the vendor function table one-to-one: arguments are passed
// through, outputs land in caller-sized `OutputBuffer`s and every call returns
// the raw engine code. Interpretation of codes and buffers belongs to the
// session facade, which also guarantees that calls never overlap.

use std::path::Path;

use kalkan_core::codes::RawCode;
use kalkan_core::{CertProp, CertType, Flags, HashAlgo, StoreType, ValidateType};

use crate::buffer::OutputBuffer;

/// A stateful, non-reentrant signing engine.
///
/// Implementations may assume exclusive access for the duration of each call.
pub trait Engine: Send {
    /// Short backend name for logs (e.g. "native", "soft").
    fn name(&self) -> &str;

    /// Whether the engine's state is shared by the whole process, so that at
    /// most one session may drive it at a time.
    fn is_process_global(&self) -> bool;

    // -- Lifecycle --

    fn init(&mut self) -> RawCode;

    fn finalize(&mut self);

    /// Text describing the most recent failure.
    fn last_error_string(&mut self, out: &mut OutputBuffer) -> RawCode;

    fn tsa_set_url(&mut self, url: &str);

    fn set_proxy(
        &mut self,
        flags: Flags,
        host: &str,
        port: &str,
        user: &str,
        password: &str,
    ) -> RawCode;

    // -- Key material and trust store --

    fn load_key_store(
        &mut self,
        store: StoreType,
        password: &str,
        container: &str,
        alias: &str,
    ) -> RawCode;

    fn load_certificate_from_file(&mut self, path: &Path, kind: CertType) -> RawCode;

    /// Load the certificate revocation list published by `source`. Loading
    /// the same source again replaces its previous list.
    fn load_crl(&mut self, source: &str, crl: &[u8]) -> RawCode;

    // -- Certificates --

    fn export_certificate_from_store(
        &mut self,
        alias: &str,
        flags: Flags,
        out: &mut OutputBuffer,
    ) -> RawCode;

    fn certificate_get_info(
        &mut self,
        cert: &str,
        prop: CertProp,
        out: &mut OutputBuffer,
    ) -> RawCode;

    #[allow(clippy::too_many_arguments)]
    fn validate_certificate(
        &mut self,
        cert: &str,
        kind: ValidateType,
        path: &str,
        check_time: i64,
        flags: Flags,
        out: &mut OutputBuffer,
    ) -> RawCode;

    fn cert_from_cms(
        &mut self,
        cms: &[u8],
        signer: u32,
        flags: Flags,
        out: &mut OutputBuffer,
    ) -> RawCode;

    fn cert_from_xml(&mut self, xml: &str, signer: u32, out: &mut OutputBuffer) -> RawCode;

    /// Signing time of a CMS signature as Unix seconds.
    fn time_from_signature(
        &mut self,
        cms: &[u8],
        flags: Flags,
        signer: u32,
        out_time: &mut i64,
    ) -> RawCode;

    // -- Data path --

    fn hash_data(
        &mut self,
        algo: HashAlgo,
        flags: Flags,
        data: &[u8],
        out: &mut OutputBuffer,
    ) -> RawCode;

    fn sign_hash(
        &mut self,
        alias: &str,
        flags: Flags,
        hash: &[u8],
        out: &mut OutputBuffer,
    ) -> RawCode;

    fn sign_data(
        &mut self,
        alias: &str,
        flags: Flags,
        data: &[u8],
        existing_signature: &[u8],
        out: &mut OutputBuffer,
    ) -> RawCode;

    #[allow(clippy::too_many_arguments)]
    fn sign_xml(
        &mut self,
        alias: &str,
        flags: Flags,
        xml: &str,
        node_id: &str,
        parent_node: &str,
        parent_namespace: &str,
        out: &mut OutputBuffer,
    ) -> RawCode;

    fn sign_wsse(
        &mut self,
        alias: &str,
        flags: Flags,
        xml: &str,
        node_id: &str,
        out: &mut OutputBuffer,
    ) -> RawCode;

    /// Verify a CMS signature. `out_data` receives attached content,
    /// `out_cert` the certificate of signer `signer`.
    #[allow(clippy::too_many_arguments)]
    fn verify_data(
        &mut self,
        alias: &str,
        flags: Flags,
        data: &[u8],
        signature: &[u8],
        signer: u32,
        out_data: &mut OutputBuffer,
        out_info: &mut OutputBuffer,
        out_cert: &mut OutputBuffer,
    ) -> RawCode;

    fn verify_xml(
        &mut self,
        alias: &str,
        flags: Flags,
        xml: &str,
        out_info: &mut OutputBuffer,
    ) -> RawCode;
}
