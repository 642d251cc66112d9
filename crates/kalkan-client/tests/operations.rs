// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Signing, verification and certificate operations against the software
// engine.

mod common;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::Utc;

use kalkan_client::codes;
use kalkan_client::{
    CertProp, Fault, HashAlgo, KalkanError, KeyUsage, SignHashInput, SignInput, SignXmlInput,
    SoftEngine, SoftOp, ValidateType, VerifyInput, VerifyStatus, VerifyXmlInput,
};

use common::{MapFetcher, PASSWORD, SUBJECT, offline_config, open, open_with, serial_of, session_with_key};

const HELLO_SHA256_B64: &str = "GF+NsyJx/iX1Yab8k4suJkMG7DBO2lGAB9F2SCY4GWk=";

fn sign(data: &[u8], detached: bool) -> SignInput {
    SignInput {
        data: data.to_vec(),
        detached,
        ..SignInput::default()
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

#[test]
fn sha256_hash_is_base64_and_deterministic() {
    let engine = SoftEngine::new();
    let session = open(&engine);
    let first = session.hash_sha256(b"Hello").unwrap();
    assert_eq!(first, HELLO_SHA256_B64);
    assert_eq!(session.hash(HashAlgo::Sha256, b"Hello").unwrap(), first);
    assert_ne!(session.hash_sha256(b"Hello World!").unwrap(), first);
}

#[test]
fn unsupported_algorithm_reports_engine_code() {
    let engine = SoftEngine::new();
    let session = open(&engine);
    let err = session.hash_gost95(b"Hello").unwrap_err();
    assert_eq!(err.code(), Some(codes::KCR_UNKNOWN_ALG));
    match err {
        KalkanError::EngineFailure { message, .. } => {
            assert!(message.unwrap().contains("Gost34311_95"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Key store
// ---------------------------------------------------------------------------

#[test]
fn wrong_password_is_an_engine_failure() {
    let engine = SoftEngine::new();
    let session = open(&engine);
    let store = SoftEngine::generate_key_store(SUBJECT, PASSWORD).unwrap();
    let err = session.load_key_store_bytes(&store, "wrong").unwrap_err();
    assert_eq!(err.code(), Some(codes::KCR_INVALIDPASSWORD));
}

#[test]
fn key_store_loads_from_disk() {
    let engine = SoftEngine::new();
    let session = open(&engine);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("GOSTKNCA.p12");
    std::fs::write(&path, SoftEngine::generate_key_store(SUBJECT, PASSWORD).unwrap()).unwrap();
    session.load_key_store(&path, PASSWORD).unwrap();
    assert!(session.export_certificate_from_store().unwrap().contains("BEGIN CERTIFICATE"));
}

#[test]
fn signing_without_key_store_fails() {
    let engine = SoftEngine::new();
    let session = open(&engine);
    let err = session.sign(&sign(b"Hello", false)).unwrap_err();
    assert_eq!(err.code(), Some(codes::KCR_KEYNOTFOUND));
}

// ---------------------------------------------------------------------------
// CMS
// ---------------------------------------------------------------------------

#[test]
fn attached_signature_verifies_and_returns_content() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    let cms = session.sign(&sign(b"Hello", false)).unwrap();

    let result = session
        .verify(&VerifyInput {
            signature: cms,
            ..VerifyInput::default()
        })
        .unwrap();
    assert!(result.is_valid());
    assert_eq!(result.data.as_deref(), Some(&b"Hello"[..]));
    assert!(result.info.contains(SUBJECT));
    assert!(result.certificate.unwrap().contains("BEGIN CERTIFICATE"));
}

#[test]
fn detached_signature_mismatch_is_a_result() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    let cms = session.sign(&sign(b"Hello", true)).unwrap();

    let valid = session
        .verify(&VerifyInput {
            signature: cms.clone(),
            data: Some(b"Hello".to_vec()),
            must_check_cert_time: true,
        })
        .unwrap();
    assert!(valid.is_valid());
    assert_eq!(valid.data, None);

    let tampered = session
        .verify(&VerifyInput {
            signature: cms,
            data: Some(b"Hello World!".to_vec()),
            must_check_cert_time: false,
        })
        .unwrap();
    match tampered.status {
        VerifyStatus::Mismatch { code, message } => {
            assert_eq!(code, codes::KCR_VERIFYSIGNERROR);
            assert!(message.unwrap().contains("does not match"));
        }
        VerifyStatus::Valid => panic!("tampered content verified"),
    }
}

#[test]
fn co_signing_adds_a_signer() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    let first = session.sign(&sign(b"Hello", false)).unwrap();
    let second = session
        .sign(&SignInput {
            data: b"Hello".to_vec(),
            existing_signature: Some(first),
            ..SignInput::default()
        })
        .unwrap();
    let result = session
        .verify(&VerifyInput {
            signature: second.clone(),
            ..VerifyInput::default()
        })
        .unwrap();
    assert!(result.is_valid());
    assert!(result.info.contains("Signature 2"));
    assert!(session.certificate_from_cms(&second, 2).is_ok());
}

#[test]
fn timestamped_signature_uses_configured_service() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    let cms = session
        .sign(&SignInput {
            data: b"Hello".to_vec(),
            with_tsp: true,
            ..SignInput::default()
        })
        .unwrap();
    let result = session
        .verify(&VerifyInput {
            signature: cms,
            ..VerifyInput::default()
        })
        .unwrap();
    assert!(result.info.contains("timestamped"));
}

#[test]
fn signed_digest_verifies_against_content() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    let digest = B64.decode(session.hash_sha256(b"Hello").unwrap()).unwrap();
    let cms = session
        .sign_hash(&SignHashInput {
            algo: HashAlgo::Sha256,
            hash: digest,
            detached: true,
            with_tsp: false,
        })
        .unwrap();
    let result = session
        .verify(&VerifyInput {
            signature: cms,
            data: Some(b"Hello".to_vec()),
            must_check_cert_time: true,
        })
        .unwrap();
    assert!(result.is_valid());
}

#[test]
fn signer_certificate_and_time_come_from_cms() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    let before = Utc::now().timestamp();
    let cms = session.sign(&sign(b"Hello", false)).unwrap();

    let exported = session.export_certificate_from_store().unwrap();
    assert_eq!(session.certificate_from_cms(&cms, 1).unwrap(), exported);
    assert!(matches!(
        session.certificate_from_cms(&cms, 0),
        Err(KalkanError::InvalidInput(_))
    ));
    assert_eq!(
        session.certificate_from_cms(&cms, 2).unwrap_err().code(),
        Some(codes::KCR_CERTNOTFOUND)
    );

    let signed_at = session.signing_time(&cms, 1).unwrap().timestamp();
    assert!(signed_at >= before && signed_at <= Utc::now().timestamp());
}

// ---------------------------------------------------------------------------
// XML
// ---------------------------------------------------------------------------

#[test]
fn xml_signature_round_trip_and_tamper() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    let signed = session
        .sign_xml(&SignXmlInput {
            xml: "<root><name>test</name></root>".into(),
            ..SignXmlInput::default()
        })
        .unwrap();
    assert!(signed.contains("<ds:Signature"));

    let result = session
        .verify_xml(&VerifyXmlInput {
            signed_xml: signed.clone(),
            must_check_cert_time: true,
        })
        .unwrap();
    assert!(result.is_valid());
    assert!(result.info.contains(SUBJECT));

    let tampered = session
        .verify_xml(&VerifyXmlInput {
            signed_xml: signed.replace("<name>test</name>", "<name>TEST</name>"),
            must_check_cert_time: false,
        })
        .unwrap();
    assert!(!tampered.is_valid());

    let cert = session.certificate_from_xml(&signed, 1).unwrap();
    assert_eq!(
        session.certificate_property(&cert, CertProp::SubjectCommonName).unwrap(),
        SUBJECT
    );
}

#[test]
fn xml_input_with_nul_is_rejected() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    let before = engine.stats().total;
    let err = session
        .sign_xml(&SignXmlInput {
            xml: "<root>\0</root>".into(),
            ..SignXmlInput::default()
        })
        .unwrap_err();
    assert!(matches!(err, KalkanError::InvalidInput(_)));
    assert_eq!(engine.stats().total, before);
}

#[test]
fn wsse_signature_lands_in_security_header() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    let envelope = concat!(
        r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
        r#"<soap:Header></soap:Header>"#,
        r#"<soap:Body Id="body-1"><getStatus/></soap:Body>"#,
        r#"</soap:Envelope>"#,
    );
    let signed = session.sign_wsse(envelope, "body-1").unwrap();
    let security = signed.find("<wsse:Security").unwrap();
    let signature = signed.find("<ds:Signature").unwrap();
    assert!(security < signature);
    assert!(signed.contains("URI=\"#body-1\""));

    let missing = session.sign_wsse(envelope, "body-2").unwrap_err();
    assert_eq!(missing.code(), Some(codes::KCR_XMLADDIDERROR));
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

#[test]
fn certificate_info_summarizes_properties() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    let pem = session.export_certificate_from_store().unwrap();

    let info = session.certificate_info(&pem).unwrap();
    assert_eq!(info.subject_common_name.as_deref(), Some(SUBJECT));
    assert_eq!(info.subject_dn.as_deref(), Some("CN=TEST USER"));
    assert!(info.serial_number.is_some());
    assert_eq!(info.subject_serial_number, None);
    assert_eq!(info.usage, Some(KeyUsage::Sign));
    assert_eq!(session.key_usage(&pem).unwrap(), KeyUsage::Sign);

    let err = session
        .certificate_property(&pem, CertProp::SubjectSerialNumber)
        .unwrap_err();
    assert_eq!(err.code(), Some(codes::KCR_INVALID_PROPID));
}

#[test]
fn key_usage_accepts_named_property_text() {
    let engine = SoftEngine::new();
    let session = open(&engine);

    for (reported, expected) in [
        ("keyUsage=digitalSignature nonRepudiation", KeyUsage::Sign),
        ("keyUsage=digitalSignature,keyEncipherment", KeyUsage::Auth),
        ("keyUsage=keyCertSign;cRLSign", KeyUsage::Unknown),
    ] {
        let store = SoftEngine::generate_key_store_with_usage(SUBJECT, PASSWORD, reported).unwrap();
        session.load_key_store_bytes(&store, PASSWORD).unwrap();
        let pem = session.export_certificate_from_store().unwrap();

        assert_eq!(session.key_usage(&pem).unwrap(), expected, "{reported}");
        let info = session.certificate_info(&pem).unwrap();
        assert_eq!(info.key_usage.as_deref(), Some(reported));
        assert_eq!(info.usage, Some(expected));
    }
}

#[test]
fn revoked_certificate_fails_crl_validation() {
    let engine = SoftEngine::new();
    let fetcher = MapFetcher::new();
    let config = offline_config().with_crl_urls(vec!["mem://nca.crl".into()]);
    let session = open_with(&engine, config, fetcher.clone());
    let store = SoftEngine::generate_key_store(SUBJECT, PASSWORD).unwrap();
    session.load_key_store_bytes(&store, PASSWORD).unwrap();
    let pem = session.export_certificate_from_store().unwrap();

    let report = session
        .validate_certificate(&pem, ValidateType::Crl, None)
        .unwrap();
    assert!(report.contains("valid"));

    fetcher.put("mem://nca.crl", SoftEngine::revocation_list(&[serial_of(&session, &pem)]));
    session.refresh_revocation_data().unwrap();
    let err = session
        .validate_certificate(&pem, ValidateType::Crl, None)
        .unwrap_err();
    assert_eq!(err.code(), Some(codes::KCR_CHECKCHAINERROR));

    let ocsp = session
        .validate_certificate(&pem, ValidateType::Ocsp, None)
        .unwrap_err();
    assert_eq!(ocsp.code(), Some(codes::KCR_VALIDTYPEERROR));
}

// ---------------------------------------------------------------------------
// Malformed engine output
// ---------------------------------------------------------------------------

#[test]
fn non_utf8_output_is_invalid_output() {
    let engine = SoftEngine::new();
    let session = open(&engine);
    engine.inject(SoftOp::HashData, Fault::Garbage);
    assert!(matches!(
        session.hash_sha256(b"Hello"),
        Err(KalkanError::InvalidOutput(_))
    ));
    assert_eq!(session.hash_sha256(b"Hello").unwrap(), HELLO_SHA256_B64);
}

#[test]
fn reported_length_past_capacity_is_invalid_output() {
    let engine = SoftEngine::new();
    let session = session_with_key(&engine);
    engine.inject(SoftOp::ExportCertificate, Fault::Overflow);
    assert!(matches!(
        session.export_certificate_from_store(),
        Err(KalkanError::InvalidOutput(_))
    ));
}
