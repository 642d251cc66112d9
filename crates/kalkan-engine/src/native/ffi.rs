// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// C layout of the vendor function table.
//
// `KC_GetFunctionList` hands out a pointer to a static `stKCFunctionsType`.
// Only the leading entries the facade calls are declared; the table is never
// allocated on the Rust side, so trailing entries need no mirror.

use std::os::raw::{c_char, c_int, c_long, c_ulong};

use kalkan_core::{KalkanError, Result};

pub type KcInit = unsafe extern "C" fn() -> c_ulong;
pub type KcLoadKeyStore = unsafe extern "C" fn(
    storage: c_int,
    password: *mut c_char,
    pass_len: c_int,
    container: *mut c_char,
    container_len: c_int,
    alias: *mut c_char,
) -> c_ulong;
pub type X509LoadCertificateFromFile =
    unsafe extern "C" fn(cert_path: *mut c_char, cert_type: c_int) -> c_ulong;
pub type X509LoadCertificateFromBuffer =
    unsafe extern "C" fn(cert: *mut u8, cert_len: c_int, flag: c_int) -> c_ulong;
pub type X509ExportCertificateFromStore = unsafe extern "C" fn(
    alias: *mut c_char,
    flag: c_int,
    out_cert: *mut c_char,
    out_cert_len: *mut c_int,
) -> c_ulong;
pub type X509CertificateGetInfo = unsafe extern "C" fn(
    cert: *mut c_char,
    cert_len: c_int,
    prop_id: c_int,
    out_data: *mut u8,
    out_data_len: *mut c_int,
) -> c_ulong;
pub type X509ValidateCertificate = unsafe extern "C" fn(
    cert: *mut c_char,
    cert_len: c_int,
    valid_type: c_int,
    valid_path: *mut c_char,
    check_time: i64,
    out_info: *mut c_char,
    out_info_len: *mut c_int,
    flag: c_int,
    get_resp: *mut c_char,
    get_resp_len: *mut c_int,
) -> c_ulong;
pub type HashData = unsafe extern "C" fn(
    algorithm: *mut c_char,
    flags: c_int,
    data: *mut c_char,
    data_len: c_int,
    out_data: *mut u8,
    out_data_len: *mut c_int,
) -> c_ulong;
pub type SignHash = unsafe extern "C" fn(
    alias: *mut c_char,
    flags: c_int,
    hash: *mut c_char,
    hash_len: c_int,
    out_sign: *mut u8,
    out_sign_len: *mut c_int,
) -> c_ulong;
pub type SignData = unsafe extern "C" fn(
    alias: *mut c_char,
    flags: c_int,
    data: *mut c_char,
    data_len: c_int,
    in_sign: *mut u8,
    in_sign_len: c_int,
    out_sign: *mut u8,
    out_sign_len: *mut c_int,
) -> c_ulong;
pub type SignXml = unsafe extern "C" fn(
    alias: *mut c_char,
    flags: c_int,
    data: *mut c_char,
    data_len: c_int,
    out_sign: *mut u8,
    out_sign_len: *mut c_int,
    sign_node_id: *mut c_char,
    parent_sign_node: *mut c_char,
    parent_namespace: *mut c_char,
) -> c_ulong;
pub type VerifyData = unsafe extern "C" fn(
    alias: *mut c_char,
    flags: c_int,
    data: *mut c_char,
    data_len: c_int,
    sign: *mut u8,
    sign_len: c_int,
    out_data: *mut c_char,
    out_data_len: *mut c_int,
    out_info: *mut c_char,
    out_info_len: *mut c_int,
    cert_id: c_int,
    out_cert: *mut c_char,
    out_cert_len: *mut c_int,
) -> c_ulong;
pub type VerifyXml = unsafe extern "C" fn(
    alias: *mut c_char,
    flags: c_int,
    data: *mut c_char,
    data_len: c_int,
    out_info: *mut c_char,
    out_info_len: *mut c_int,
) -> c_ulong;
pub type KcGetCertFromXml = unsafe extern "C" fn(
    xml: *const c_char,
    xml_len: c_int,
    sign_id: c_int,
    out_cert: *mut c_char,
    out_cert_len: *mut c_int,
) -> c_ulong;
pub type KcGetTimeFromSig = unsafe extern "C" fn(
    data: *mut c_char,
    data_len: c_int,
    flags: c_int,
    sign_id: c_int,
    out_time: *mut c_long,
) -> c_ulong;
pub type KcSetProxy = unsafe extern "C" fn(
    flags: c_int,
    addr: *mut c_char,
    port: *mut c_char,
    user: *mut c_char,
    pass: *mut c_char,
) -> c_ulong;
pub type KcGetLastError = unsafe extern "C" fn() -> c_ulong;
pub type KcGetLastErrorString =
    unsafe extern "C" fn(error: *mut c_char, error_len: *mut c_int) -> c_ulong;
pub type KcVoid = unsafe extern "C" fn();
pub type KcTsaSetUrl = unsafe extern "C" fn(url: *mut c_char);
pub type KcGetCertFromCms = unsafe extern "C" fn(
    cms: *mut c_char,
    cms_len: c_int,
    sign_id: c_int,
    flags: c_int,
    out_cert: *mut c_char,
    out_cert_len: *mut c_int,
) -> c_ulong;
pub type KcGetEncryptCert = unsafe extern "C" fn(
    storage: c_int,
    password: *mut c_char,
    out_cert: *mut c_char,
    out_cert_len: *mut c_int,
) -> c_ulong;
pub type KcGetSigAlgFromXml = unsafe extern "C" fn(
    xml: *const c_char,
    xml_len: c_int,
    out_alg: *mut c_char,
    out_alg_len: *mut c_int,
) -> c_ulong;
pub type SignWsse = unsafe extern "C" fn(
    alias: *mut c_char,
    flags: c_int,
    data: *mut c_char,
    data_len: c_int,
    out_sign: *mut u8,
    out_sign_len: *mut c_int,
    sign_node_id: *mut c_char,
) -> c_ulong;

/// Entry point exported by the library.
pub type KcGetFunctionList = unsafe extern "C" fn(list: *mut *const RawFunctionList) -> c_int;

/// Prefix of `stKCFunctionsType`, field for field.
#[repr(C)]
pub struct RawFunctionList {
    pub kc_init: Option<KcInit>,
    pub kc_load_key_store: Option<KcLoadKeyStore>,
    pub x509_load_certificate_from_file: Option<X509LoadCertificateFromFile>,
    pub x509_load_certificate_from_buffer: Option<X509LoadCertificateFromBuffer>,
    pub x509_export_certificate_from_store: Option<X509ExportCertificateFromStore>,
    pub x509_certificate_get_info: Option<X509CertificateGetInfo>,
    pub x509_validate_certificate: Option<X509ValidateCertificate>,
    pub hash_data: Option<HashData>,
    pub sign_hash: Option<SignHash>,
    pub sign_data: Option<SignData>,
    pub sign_xml: Option<SignXml>,
    pub verify_data: Option<VerifyData>,
    pub verify_xml: Option<VerifyXml>,
    pub kc_get_cert_from_xml: Option<KcGetCertFromXml>,
    pub kc_get_time_from_sig: Option<KcGetTimeFromSig>,
    pub kc_set_proxy: Option<KcSetProxy>,
    pub kc_get_last_error: Option<KcGetLastError>,
    pub kc_get_last_error_string: Option<KcGetLastErrorString>,
    pub kc_xml_finalize: Option<KcVoid>,
    pub kc_finalize: Option<KcVoid>,
    pub kc_tsa_set_url: Option<KcTsaSetUrl>,
    pub kc_get_cert_from_cms: Option<KcGetCertFromCms>,
    pub kc_get_encrypt_cert: Option<KcGetEncryptCert>,
    pub kc_get_sig_alg_from_xml: Option<KcGetSigAlgFromXml>,
    pub sign_wsse: Option<SignWsse>,
}

/// The function table with every entry the facade uses checked non-null.
#[derive(Clone, Copy)]
pub struct FunctionTable {
    pub init: KcInit,
    pub load_key_store: KcLoadKeyStore,
    pub load_certificate_from_file: X509LoadCertificateFromFile,
    pub export_certificate_from_store: X509ExportCertificateFromStore,
    pub certificate_get_info: X509CertificateGetInfo,
    pub validate_certificate: X509ValidateCertificate,
    pub hash_data: HashData,
    pub sign_hash: SignHash,
    pub sign_data: SignData,
    pub sign_xml: SignXml,
    pub verify_data: VerifyData,
    pub verify_xml: VerifyXml,
    pub cert_from_xml: KcGetCertFromXml,
    pub time_from_sig: KcGetTimeFromSig,
    pub set_proxy: KcSetProxy,
    pub last_error_string: KcGetLastErrorString,
    pub xml_finalize: KcVoid,
    pub finalize: KcVoid,
    pub tsa_set_url: KcTsaSetUrl,
    pub cert_from_cms: KcGetCertFromCms,
    pub sign_wsse: SignWsse,
}

fn required<T>(entry: Option<T>, name: &str) -> Result<T> {
    entry.ok_or_else(|| KalkanError::LibraryLoad(format!("function table entry {name} is null")))
}

impl FunctionTable {
    pub fn from_raw(raw: &RawFunctionList) -> Result<Self> {
        Ok(Self {
            init: required(raw.kc_init, "KC_Init")?,
            load_key_store: required(raw.kc_load_key_store, "KC_LoadKeyStore")?,
            load_certificate_from_file: required(
                raw.x509_load_certificate_from_file,
                "X509LoadCertificateFromFile",
            )?,
            export_certificate_from_store: required(
                raw.x509_export_certificate_from_store,
                "X509ExportCertificateFromStore",
            )?,
            certificate_get_info: required(raw.x509_certificate_get_info, "X509CertificateGetInfo")?,
            validate_certificate: required(
                raw.x509_validate_certificate,
                "X509ValidateCertificate",
            )?,
            hash_data: required(raw.hash_data, "HashData")?,
            sign_hash: required(raw.sign_hash, "SignHash")?,
            sign_data: required(raw.sign_data, "SignData")?,
            sign_xml: required(raw.sign_xml, "SignXML")?,
            verify_data: required(raw.verify_data, "VerifyData")?,
            verify_xml: required(raw.verify_xml, "VerifyXML")?,
            cert_from_xml: required(raw.kc_get_cert_from_xml, "KC_getCertFromXML")?,
            time_from_sig: required(raw.kc_get_time_from_sig, "KC_GetTimeFromSig")?,
            set_proxy: required(raw.kc_set_proxy, "KC_SetProxy")?,
            last_error_string: required(raw.kc_get_last_error_string, "KC_GetLastErrorString")?,
            xml_finalize: required(raw.kc_xml_finalize, "KC_XMLFinalize")?,
            finalize: required(raw.kc_finalize, "KC_Finalize")?,
            tsa_set_url: required(raw.kc_tsa_set_url, "KC_TSASetUrl")?,
            cert_from_cms: required(raw.kc_get_cert_from_cms, "KC_GetCertFromCMS")?,
            sign_wsse: required(raw.sign_wsse, "SignWSSE")?,
        })
    }
}
