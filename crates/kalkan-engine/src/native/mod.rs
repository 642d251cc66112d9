// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Binding to the vendor shared library.
//
// The library is opened with `libloading`, its function table fetched once
// through `KC_GetFunctionList`, and every trait method forwards to the matching
// table entry. String and byte arguments are copied into NUL-terminated
// scratch vectors because the C signatures take mutable pointers.

mod crl;
mod ffi;

use std::os::raw::{c_char, c_int, c_long};
use std::path::{Path, PathBuf};

use kalkan_core::codes::{self, RawCode};
use kalkan_core::{CertProp, CertType, Flags, HashAlgo, KalkanError, Result, StoreType, ValidateType};
use libloading::{Library, Symbol};
use tracing::{debug, info, warn};

use crate::buffer::OutputBuffer;
use crate::traits::Engine;

use self::crl::{CrlFiles, validate_each};
use self::ffi::{FunctionTable, KcGetFunctionList, RawFunctionList};

/// Library file name used when no path is configured.
pub const DEFAULT_LIBRARY: &str = "libkalkancryptwr-64.so";

/// NUL-terminated copy of an argument. C strings stop at the first NUL, so
/// callers reject interior NULs before they reach this point.
struct Arg(Vec<u8>);

impl Arg {
    fn new(bytes: &[u8]) -> Self {
        let mut owned = Vec::with_capacity(bytes.len() + 1);
        owned.extend_from_slice(bytes);
        owned.push(0);
        Self(owned)
    }

    fn str(s: &str) -> Self {
        Self::new(s.as_bytes())
    }

    fn ptr(&mut self) -> *mut c_char {
        self.0.as_mut_ptr().cast()
    }

    fn bytes_ptr(&mut self) -> *mut u8 {
        self.0.as_mut_ptr()
    }

    fn len(&self) -> c_int {
        c_int::try_from(self.0.len() - 1).unwrap_or(c_int::MAX)
    }
}

/// Engine backed by the vendor library.
pub struct NativeEngine {
    table: FunctionTable,
    path: PathBuf,
    /// Revocation lists handed over as files, one per source.
    crls: CrlFiles,
    // Keeps the code behind `table` mapped; declared last so it drops last.
    _library: Library,
}

// SAFETY: the table is a set of plain function pointers into the library,
// which stays loaded for the lifetime of the engine. The engine is only ever
// driven by one thread at a time (the session's call lock guarantees it).
unsafe impl Send for NativeEngine {}

impl NativeEngine {
    /// Open the library and resolve its function table.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(|| PathBuf::from(DEFAULT_LIBRARY), Path::to_path_buf);
        info!(path = %path.display(), "Loading engine library");

        // SAFETY: loading runs the library's initializers. The vendor library
        // has no load-time side effects beyond its own globals.
        let library = unsafe { Library::new(&path) }
            .map_err(|e| KalkanError::LibraryLoad(format!("{}: {e}", path.display())))?;

        let table = {
            // SAFETY: the symbol type matches the exported C prototype.
            let get_list: Symbol<KcGetFunctionList> = unsafe { library.get(b"KC_GetFunctionList\0") }
                .map_err(|e| KalkanError::LibraryLoad(format!("KC_GetFunctionList: {e}")))?;

            let mut raw: *const RawFunctionList = std::ptr::null();
            // SAFETY: `raw` is a valid out-pointer for the duration of the call.
            let rc = unsafe { get_list(&mut raw) };
            if rc != 0 || raw.is_null() {
                return Err(KalkanError::LibraryLoad(format!(
                    "KC_GetFunctionList returned {rc} without a function table"
                )));
            }
            // SAFETY: non-null and points at the library's static table.
            FunctionTable::from_raw(unsafe { &*raw })?
        };

        Ok(Self {
            table,
            path,
            crls: CrlFiles::default(),
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate_with(
        &mut self,
        cert: &str,
        kind: ValidateType,
        path: &str,
        check_time: i64,
        flags_: Flags,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let mut cert = Arg::str(cert);
        let mut path = Arg::str(path);
        let mut len = out.c_capacity();
        let mut response = OutputBuffer::zeroed(0);
        let mut response_len: c_int = 0;
        // SAFETY: `out` holds `len` writable bytes; the OCSP response buffer
        // is empty and its length says so.
        let rc = unsafe {
            (self.table.validate_certificate)(
                cert.ptr(),
                cert.len(),
                kind.id(),
                path.ptr(),
                check_time,
                out.as_mut_c_ptr(),
                &mut len,
                flags(flags_),
                response.as_mut_c_ptr(),
                &mut response_len,
            )
        };
        out.set_reported_c_len(len);
        code(rc)
    }
}

fn flags(f: Flags) -> c_int {
    f.bits() as c_int
}

fn code(rc: std::os::raw::c_ulong) -> RawCode {
    RawCode::from(rc)
}

fn signer_id(signer: u32) -> Option<c_int> {
    c_int::try_from(signer).ok()
}

impl Engine for NativeEngine {
    fn name(&self) -> &str {
        "native"
    }

    fn is_process_global(&self) -> bool {
        true
    }

    fn init(&mut self) -> RawCode {
        // SAFETY: table entries are valid for the library's lifetime.
        code(unsafe { (self.table.init)() })
    }

    fn finalize(&mut self) {
        // SAFETY: as above; both calls take no arguments.
        unsafe {
            (self.table.xml_finalize)();
            (self.table.finalize)();
        }
        self.crls.clear();
    }

    fn last_error_string(&mut self, out: &mut OutputBuffer) -> RawCode {
        let mut len = out.c_capacity();
        // SAFETY: `out` holds `len` writable bytes.
        let rc = unsafe { (self.table.last_error_string)(out.as_mut_c_ptr(), &mut len) };
        out.set_reported_c_len(len);
        code(rc)
    }

    fn tsa_set_url(&mut self, url: &str) {
        let mut url = Arg::str(url);
        // SAFETY: NUL-terminated argument outlives the call.
        unsafe { (self.table.tsa_set_url)(url.ptr()) };
    }

    fn set_proxy(
        &mut self,
        flags_: Flags,
        host: &str,
        port: &str,
        user: &str,
        password: &str,
    ) -> RawCode {
        let (mut host, mut port) = (Arg::str(host), Arg::str(port));
        let (mut user, mut password) = (Arg::str(user), Arg::str(password));
        // SAFETY: NUL-terminated arguments outlive the call.
        code(unsafe {
            (self.table.set_proxy)(
                flags(flags_),
                host.ptr(),
                port.ptr(),
                user.ptr(),
                password.ptr(),
            )
        })
    }

    fn load_key_store(
        &mut self,
        store: StoreType,
        password: &str,
        container: &str,
        alias: &str,
    ) -> RawCode {
        let mut password = Arg::str(password);
        let mut container = Arg::str(container);
        let mut alias = Arg::str(alias);
        // SAFETY: NUL-terminated arguments outlive the call.
        code(unsafe {
            (self.table.load_key_store)(
                store.id(),
                password.ptr(),
                password.len(),
                container.ptr(),
                container.len(),
                alias.ptr(),
            )
        })
    }

    fn load_certificate_from_file(&mut self, path: &Path, kind: CertType) -> RawCode {
        let mut path = Arg::str(&path.to_string_lossy());
        // SAFETY: NUL-terminated argument outlives the call.
        code(unsafe { (self.table.load_certificate_from_file)(path.ptr(), kind.id()) })
    }

    fn load_crl(&mut self, source: &str, crl: &[u8]) -> RawCode {
        // The library reads revocation lists from disk during CRL validation.
        match self.crls.store(source, crl) {
            Ok(file) => {
                debug!(source = %source, path = %file.display(), bytes = crl.len(), "CRL stored");
                codes::KCR_OK
            }
            Err(e) => {
                warn!(source = %source, error = %e, "Cannot write CRL file");
                codes::KCR_LOADCRLERROR
            }
        }
    }

    fn export_certificate_from_store(
        &mut self,
        alias: &str,
        flags_: Flags,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let mut alias = Arg::str(alias);
        let mut len = out.c_capacity();
        // SAFETY: `out` holds `len` writable bytes.
        let rc = unsafe {
            (self.table.export_certificate_from_store)(
                alias.ptr(),
                flags(flags_),
                out.as_mut_c_ptr(),
                &mut len,
            )
        };
        out.set_reported_c_len(len);
        code(rc)
    }

    fn certificate_get_info(
        &mut self,
        cert: &str,
        prop: CertProp,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let mut cert = Arg::str(cert);
        let mut len = out.c_capacity();
        // SAFETY: `out` holds `len` writable bytes.
        let rc = unsafe {
            (self.table.certificate_get_info)(
                cert.ptr(),
                cert.len(),
                prop.id(),
                out.as_mut_ptr(),
                &mut len,
            )
        };
        out.set_reported_c_len(len);
        code(rc)
    }

    fn validate_certificate(
        &mut self,
        cert: &str,
        kind: ValidateType,
        path: &str,
        check_time: i64,
        flags_: Flags,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let loaded = self.crls.paths();
        if kind != ValidateType::Crl || !path.is_empty() || loaded.is_empty() {
            return self.validate_with(cert, kind, path, check_time, flags_, out);
        }
        // Without an explicit list the certificate must pass every loaded one.
        validate_each(&loaded, |crl| {
            let crl = crl.to_string_lossy();
            self.validate_with(cert, kind, &crl, check_time, flags_, out)
        })
    }

    fn cert_from_cms(
        &mut self,
        cms: &[u8],
        signer: u32,
        flags_: Flags,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let Some(signer) = signer_id(signer) else {
            return codes::KCR_INVALID_FLAG;
        };
        let mut cms = Arg::new(cms);
        let mut len = out.c_capacity();
        // SAFETY: `out` holds `len` writable bytes.
        let rc = unsafe {
            (self.table.cert_from_cms)(
                cms.ptr(),
                cms.len(),
                signer,
                flags(flags_),
                out.as_mut_c_ptr(),
                &mut len,
            )
        };
        out.set_reported_c_len(len);
        code(rc)
    }

    fn cert_from_xml(&mut self, xml: &str, signer: u32, out: &mut OutputBuffer) -> RawCode {
        let Some(signer) = signer_id(signer) else {
            return codes::KCR_INVALID_FLAG;
        };
        let mut xml = Arg::str(xml);
        let mut len = out.c_capacity();
        // SAFETY: `out` holds `len` writable bytes.
        let rc = unsafe {
            (self.table.cert_from_xml)(
                xml.ptr(),
                xml.len(),
                signer,
                out.as_mut_c_ptr(),
                &mut len,
            )
        };
        out.set_reported_c_len(len);
        code(rc)
    }

    fn time_from_signature(
        &mut self,
        cms: &[u8],
        flags_: Flags,
        signer: u32,
        out_time: &mut i64,
    ) -> RawCode {
        let Some(signer) = signer_id(signer) else {
            return codes::KCR_INVALID_FLAG;
        };
        let mut cms = Arg::new(cms);
        let mut time: c_long = 0;
        // SAFETY: `time` is a valid out-pointer for the duration of the call.
        let rc = unsafe {
            (self.table.time_from_sig)(
                cms.ptr(),
                cms.len(),
                flags(flags_),
                signer,
                &mut time,
            )
        };
        *out_time = i64::from(time);
        code(rc)
    }

    fn hash_data(
        &mut self,
        algo: HashAlgo,
        flags_: Flags,
        data: &[u8],
        out: &mut OutputBuffer,
    ) -> RawCode {
        let mut algo = Arg::str(algo.engine_name());
        let mut data = Arg::new(data);
        let mut len = out.c_capacity();
        // SAFETY: `out` holds `len` writable bytes.
        let rc = unsafe {
            (self.table.hash_data)(
                algo.ptr(),
                flags(flags_),
                data.ptr(),
                data.len(),
                out.as_mut_ptr(),
                &mut len,
            )
        };
        out.set_reported_c_len(len);
        code(rc)
    }

    fn sign_hash(
        &mut self,
        alias: &str,
        flags_: Flags,
        hash: &[u8],
        out: &mut OutputBuffer,
    ) -> RawCode {
        let mut alias = Arg::str(alias);
        let mut hash = Arg::new(hash);
        let mut len = out.c_capacity();
        // SAFETY: `out` holds `len` writable bytes.
        let rc = unsafe {
            (self.table.sign_hash)(
                alias.ptr(),
                flags(flags_),
                hash.ptr(),
                hash.len(),
                out.as_mut_ptr(),
                &mut len,
            )
        };
        out.set_reported_c_len(len);
        code(rc)
    }

    fn sign_data(
        &mut self,
        alias: &str,
        flags_: Flags,
        data: &[u8],
        existing_signature: &[u8],
        out: &mut OutputBuffer,
    ) -> RawCode {
        let mut alias = Arg::str(alias);
        let mut data = Arg::new(data);
        let mut existing = Arg::new(existing_signature);
        let mut len = out.c_capacity();
        // SAFETY: `out` holds `len` writable bytes.
        let rc = unsafe {
            (self.table.sign_data)(
                alias.ptr(),
                flags(flags_),
                data.ptr(),
                data.len(),
                existing.bytes_ptr(),
                existing.len(),
                out.as_mut_ptr(),
                &mut len,
            )
        };
        out.set_reported_c_len(len);
        code(rc)
    }

    fn sign_xml(
        &mut self,
        alias: &str,
        flags_: Flags,
        xml: &str,
        node_id: &str,
        parent_node: &str,
        parent_namespace: &str,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let mut alias = Arg::str(alias);
        let mut xml = Arg::str(xml);
        let mut node_id = Arg::str(node_id);
        let mut parent_node = Arg::str(parent_node);
        let mut parent_namespace = Arg::str(parent_namespace);
        let mut len = out.c_capacity();
        // SAFETY: `out` holds `len` writable bytes.
        let rc = unsafe {
            (self.table.sign_xml)(
                alias.ptr(),
                flags(flags_),
                xml.ptr(),
                xml.len(),
                out.as_mut_ptr(),
                &mut len,
                node_id.ptr(),
                parent_node.ptr(),
                parent_namespace.ptr(),
            )
        };
        out.set_reported_c_len(len);
        code(rc)
    }

    fn sign_wsse(
        &mut self,
        alias: &str,
        flags_: Flags,
        xml: &str,
        node_id: &str,
        out: &mut OutputBuffer,
    ) -> RawCode {
        let mut alias = Arg::str(alias);
        let mut xml = Arg::str(xml);
        let mut node_id = Arg::str(node_id);
        let mut len = out.c_capacity();
        // SAFETY: `out` holds `len` writable bytes.
        let rc = unsafe {
            (self.table.sign_wsse)(
                alias.ptr(),
                flags(flags_),
                xml.ptr(),
                xml.len(),
                out.as_mut_ptr(),
                &mut len,
                node_id.ptr(),
            )
        };
        out.set_reported_c_len(len);
        code(rc)
    }

    fn verify_data(
        &mut self,
        alias: &str,
        flags_: Flags,
        data: &[u8],
        signature: &[u8],
        signer: u32,
        out_data: &mut OutputBuffer,
        out_info: &mut OutputBuffer,
        out_cert: &mut OutputBuffer,
    ) -> RawCode {
        let Some(signer) = signer_id(signer) else {
            return codes::KCR_INVALID_FLAG;
        };
        let mut alias = Arg::str(alias);
        let mut data = Arg::new(data);
        let mut signature = Arg::new(signature);
        let mut data_len = out_data.c_capacity();
        let mut info_len = out_info.c_capacity();
        let mut cert_len = out_cert.c_capacity();
        // SAFETY: each output buffer holds as many writable bytes as its
        // length argument says.
        let rc = unsafe {
            (self.table.verify_data)(
                alias.ptr(),
                flags(flags_),
                data.ptr(),
                data.len(),
                signature.bytes_ptr(),
                signature.len(),
                out_data.as_mut_c_ptr(),
                &mut data_len,
                out_info.as_mut_c_ptr(),
                &mut info_len,
                signer,
                out_cert.as_mut_c_ptr(),
                &mut cert_len,
            )
        };
        out_data.set_reported_c_len(data_len);
        out_info.set_reported_c_len(info_len);
        out_cert.set_reported_c_len(cert_len);
        code(rc)
    }

    fn verify_xml(
        &mut self,
        alias: &str,
        flags_: Flags,
        xml: &str,
        out_info: &mut OutputBuffer,
    ) -> RawCode {
        let mut alias = Arg::str(alias);
        let mut xml = Arg::str(xml);
        let mut len = out_info.c_capacity();
        // SAFETY: `out_info` holds `len` writable bytes.
        let rc = unsafe {
            (self.table.verify_xml)(
                alias.ptr(),
                flags(flags_),
                xml.ptr(),
                xml.len(),
                out_info.as_mut_c_ptr(),
                &mut len,
            )
        };
        out_info.set_reported_c_len(len);
        code(rc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_a_load_error() {
        let err = NativeEngine::load(Some(Path::new("/nonexistent/libkalkan.so")))
            .err()
            .unwrap();
        assert!(matches!(err, KalkanError::LibraryLoad(_)), "{err}");
        assert!(err.to_string().contains("/nonexistent/libkalkan.so"));
    }

    #[test]
    fn signer_ids_stay_positive() {
        assert_eq!(signer_id(1), Some(1));
        assert_eq!(signer_id(i32::MAX as u32), Some(c_int::MAX));
        assert_eq!(signer_id(i32::MAX as u32 + 1), None);
        assert_eq!(signer_id(u32::MAX), None);
    }

    #[test]
    fn null_table_entries_are_rejected() {
        let raw = RawFunctionList {
            kc_init: None,
            kc_load_key_store: None,
            x509_load_certificate_from_file: None,
            x509_load_certificate_from_buffer: None,
            x509_export_certificate_from_store: None,
            x509_certificate_get_info: None,
            x509_validate_certificate: None,
            hash_data: None,
            sign_hash: None,
            sign_data: None,
            sign_xml: None,
            verify_data: None,
            verify_xml: None,
            kc_get_cert_from_xml: None,
            kc_get_time_from_sig: None,
            kc_set_proxy: None,
            kc_get_last_error: None,
            kc_get_last_error_string: None,
            kc_xml_finalize: None,
            kc_finalize: None,
            kc_tsa_set_url: None,
            kc_get_cert_from_cms: None,
            kc_get_encrypt_cert: None,
            kc_get_sig_alg_from_xml: None,
            sign_wsse: None,
        };
        let err = FunctionTable::from_raw(&raw).err().unwrap();
        assert!(err.to_string().contains("KC_Init"), "{err}");
    }

    #[test]
    fn args_are_nul_terminated() {
        let arg = Arg::str("abc");
        assert_eq!(arg.0, b"abc\0");
        assert_eq!(arg.len(), 3);
    }
}
