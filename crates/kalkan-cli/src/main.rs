// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// kalkan: sign, verify and inspect documents through a Kalkan session.
//
// Results are printed as JSON on stdout; logs go to stderr and follow
// RUST_LOG.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tracing::{error, info};

use kalkan_client::{
    ClientConfig, EngineKind, HashAlgo, KalkanError, Result, Session, SignInput, SignXmlInput,
    SoftEngine, ValidateType, Verification, VerifyInput, VerifyXmlInput,
};

#[derive(Parser)]
#[command(name = "kalkan")]
#[command(about = "Sign and verify documents with the KalkanCrypt engine")]
#[command(long_about = "
Sign and verify documents with the KalkanCrypt engine.

EXAMPLES:
    # Create a key store for the software engine
    kalkan --soft soft-keystore --subject 'TEST USER' --output test.p12

    # Sign a file (attached CMS, base64 on stdout)
    kalkan --soft sign --key-store test.p12 report.pdf

    # Verify a detached signature
    kalkan verify --signature report.cms --data report.pdf

ENVIRONMENT VARIABLES:
    KALKAN_PASSWORD   Key store password
    RUST_LOG          Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    /// Session configuration (JSON)
    #[arg(long, short, global = true, value_name = "path")]
    config: Option<PathBuf>,

    /// Use the in-process software engine instead of the vendor library
    #[arg(long, global = true)]
    soft: bool,

    /// Path of the vendor engine library
    #[arg(long, global = true, value_name = "path")]
    library: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct KeyStoreArgs {
    /// PKCS#12 key store
    #[arg(long, short = 'k', value_name = "path")]
    key_store: PathBuf,

    /// Key store password
    #[arg(long, short = 'p', env = "KALKAN_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand)]
enum Command {
    /// Digest a file
    Hash {
        #[arg(value_name = "INPUT_FILE")]
        input: PathBuf,

        #[arg(long, value_enum, default_value = "sha256")]
        algo: HashAlgoArg,
    },

    /// Sign a file into a CMS container
    Sign {
        #[command(flatten)]
        key: KeyStoreArgs,

        #[arg(value_name = "INPUT_FILE")]
        input: PathBuf,

        /// Leave the content out of the signature
        #[arg(long)]
        detached: bool,

        /// Embed a timestamp from the configured TSP service
        #[arg(long)]
        tsp: bool,

        /// Add a signature to this existing CMS container
        #[arg(long, value_name = "path")]
        cosign: Option<PathBuf>,

        /// Write the raw CMS here instead of printing base64
        #[arg(short, long, value_name = "OUTPUT_FILE")]
        output: Option<PathBuf>,
    },

    /// Verify a CMS signature
    Verify {
        /// CMS container, raw or base64
        #[arg(long, short, value_name = "path")]
        signature: PathBuf,

        /// Signed content for a detached signature
        #[arg(long, short, value_name = "path")]
        data: Option<PathBuf>,

        /// Reject signer certificates outside their validity period
        #[arg(long)]
        check_time: bool,
    },

    /// Sign an XML document (XML-DSig)
    SignXml {
        #[command(flatten)]
        key: KeyStoreArgs,

        #[arg(value_name = "INPUT_FILE")]
        input: PathBuf,

        /// Id of the element to sign
        #[arg(long, default_value = "")]
        node_id: String,

        /// Element that receives the signature
        #[arg(long, default_value = "")]
        parent: String,
    },

    /// Verify a signed XML document
    VerifyXml {
        #[arg(value_name = "INPUT_FILE")]
        input: PathBuf,

        #[arg(long)]
        check_time: bool,
    },

    /// Print the certificate of a key store
    ExportCert {
        #[command(flatten)]
        key: KeyStoreArgs,
    },

    /// Decode the main properties of a PEM certificate
    CertInfo {
        #[arg(value_name = "CERT_FILE")]
        cert: PathBuf,
    },

    /// Check a certificate's chain and revocation status
    Validate {
        #[arg(value_name = "CERT_FILE")]
        cert: PathBuf,

        #[arg(long, value_enum, default_value = "crl")]
        kind: ValidateArg,

        /// CRL file or OCSP responder; configured defaults otherwise
        #[arg(long)]
        path: Option<String>,
    },

    /// Generate a key store for the software engine
    SoftKeystore {
        #[arg(long)]
        subject: String,

        #[arg(long, short = 'p', env = "KALKAN_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(short, long, value_name = "OUTPUT_FILE")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HashAlgoArg {
    Sha256,
    Gost95,
}

impl From<HashAlgoArg> for HashAlgo {
    fn from(arg: HashAlgoArg) -> Self {
        match arg {
            HashAlgoArg::Sha256 => HashAlgo::Sha256,
            HashAlgoArg::Gost95 => HashAlgo::Gost95,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ValidateArg {
    None,
    Crl,
    Ocsp,
}

impl From<ValidateArg> for ValidateType {
    fn from(arg: ValidateArg) -> Self {
        match arg {
            ValidateArg::None => ValidateType::Nothing,
            ValidateArg::Crl => ValidateType::Crl,
            ValidateArg::Ocsp => ValidateType::Ocsp,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, code = ?e.code(), "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_json_file(path)?,
        None => ClientConfig::default(),
    };
    if cli.soft {
        config = config.with_engine(EngineKind::Soft);
    }
    if let Some(library) = &cli.library {
        config = config.with_library_path(library.clone());
    }
    Ok(config)
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        KalkanError::InvalidInput(format!("cannot read {}: {e}", path.display()))
    })
}

fn read_string(path: &Path) -> Result<String> {
    String::from_utf8(read(path)?)
        .map_err(|_| KalkanError::InvalidInput(format!("{} is not UTF-8 text", path.display())))
}

/// Accept CMS files either raw or as base64 text.
fn read_cms(path: &Path) -> Result<Vec<u8>> {
    let raw = read(path)?;
    let compact: Vec<u8> = raw.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    Ok(B64.decode(&compact).unwrap_or(raw))
}

fn open_with_key(config: ClientConfig, key: &KeyStoreArgs) -> Result<Session> {
    let session = Session::open_configured(config)?;
    session.load_key_store(&key.key_store, &key.password)?;
    Ok(session)
}

fn verification_json(v: &Verification) -> Value {
    json!({
        "valid": v.is_valid(),
        "status": v.status,
        "info": v.info,
        "data": v.data.as_deref().map(|d| B64.encode(d)),
        "certificate": v.certificate,
    })
}

fn run(cli: Cli) -> Result<Value> {
    let config = load_config(&cli)?;
    let output = match cli.command {
        Command::Hash { input, algo } => {
            let session = Session::open_configured(config)?;
            let digest = session.hash(algo.into(), &read(&input)?)?;
            json!({ "algorithm": HashAlgo::from(algo).engine_name(), "digest": digest })
        }
        Command::Sign {
            key,
            input,
            detached,
            tsp,
            cosign,
            output,
        } => {
            let session = open_with_key(config, &key)?;
            let existing_signature = cosign.as_deref().map(read_cms).transpose()?;
            let cms = session.sign(&SignInput {
                data: read(&input)?,
                detached,
                with_tsp: tsp,
                existing_signature,
            })?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &cms)?;
                    info!(path = %path.display(), bytes = cms.len(), "Signature written");
                    json!({ "written": path.display().to_string(), "bytes": cms.len() })
                }
                None => json!({ "cms": B64.encode(&cms) }),
            }
        }
        Command::Verify {
            signature,
            data,
            check_time,
        } => {
            let session = Session::open_configured(config)?;
            let result = session.verify(&VerifyInput {
                signature: read_cms(&signature)?,
                data: data.as_deref().map(read).transpose()?,
                must_check_cert_time: check_time,
            })?;
            verification_json(&result)
        }
        Command::SignXml {
            key,
            input,
            node_id,
            parent,
        } => {
            let session = open_with_key(config, &key)?;
            let signed = session.sign_xml(&SignXmlInput {
                xml: read_string(&input)?,
                sign_node_id: node_id,
                parent_sign_node: parent,
                ..SignXmlInput::default()
            })?;
            json!({ "xml": signed })
        }
        Command::VerifyXml { input, check_time } => {
            let session = Session::open_configured(config)?;
            let result = session.verify_xml(&VerifyXmlInput {
                signed_xml: read_string(&input)?,
                must_check_cert_time: check_time,
            })?;
            verification_json(&result)
        }
        Command::ExportCert { key } => {
            let session = open_with_key(config, &key)?;
            json!({ "certificate": session.export_certificate_from_store()? })
        }
        Command::CertInfo { cert } => {
            let session = Session::open_configured(config)?;
            serde_json::to_value(session.certificate_info(&read_string(&cert)?)?)?
        }
        Command::Validate { cert, kind, path } => {
            let session = Session::open_configured(config)?;
            let report =
                session.validate_certificate(&read_string(&cert)?, kind.into(), path.as_deref())?;
            json!({ "valid": true, "report": report })
        }
        Command::SoftKeystore {
            subject,
            password,
            output,
        } => {
            std::fs::write(&output, SoftEngine::generate_key_store(&subject, &password)?)?;
            info!(path = %output.display(), "Key store generated");
            json!({ "written": output.display().to_string() })
        }
    };
    Ok(output)
}
