//! Certificate authority loading and signing.
//!
//! A [`CertificateAuthority`] is immutable once loaded. Rotation builds a new
//! one and swaps it in whole (see [`super::native::NativeIssuer::reload`]).
//!
//! Loading a candidate checks, in order:
//! 1. the certificate file parses as a PEM X.509 certificate
//! 2. the certificate is a CA (basic constraints) and has not expired
//! 3. the key file holds a PKCS#8 or PKCS#1 private key
//! 4. the key's public half matches the certificate

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::RngCore;
use rcgen::{
    Certificate, CertificateParams, CertificateRevocationListParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, SerialNumber,
};
use rustls::pki_types::{pem::PemObject, PrivateKeyDer};
use simple_asn1::{oid, ASN1Block, BigInt};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use x509_parser::pem::parse_x509_pem;
use zeroize::Zeroizing;

use super::error::IssueError;
use super::request::CertificateResponse;
use crate::errors::{CaCandidateFailure, CaLoadError, CaRequiredError};
use crate::secrets::CredentialValue;

/// How long a freshly signed CRL is valid.
const CRL_VALIDITY_DAYS: i64 = 7;

/// One (certificate, key) location the loader may try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaCandidate {
    /// Role in the search order, e.g. "primary" or "alternate".
    pub label: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl CaCandidate {
    pub fn new(
        label: impl Into<String>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            label: label.into(),
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

/// A CA together with the candidate it was loaded from.
#[derive(Debug)]
pub struct LoadedCa {
    pub authority: CertificateAuthority,
    pub source: CaCandidate,
}

/// Tries each candidate in order; the first that loads wins.
///
/// There is no self-signed fallback. When nothing loads, the error carries
/// every candidate's failure.
pub fn load_first(candidates: &[CaCandidate]) -> Result<LoadedCa, CaRequiredError> {
    let mut failures = Vec::new();

    for candidate in candidates {
        match CertificateAuthority::load(&candidate.cert_path, &candidate.key_path) {
            Ok(authority) => {
                info!(
                    source = %candidate.label,
                    cert_path = %candidate.cert_path.display(),
                    subject = authority.common_name().unwrap_or("<none>"),
                    not_after = %authority.not_after(),
                    "Loaded CA"
                );
                return Ok(LoadedCa {
                    authority,
                    source: candidate.clone(),
                });
            }
            Err(error) => {
                warn!(
                    source = %candidate.label,
                    cert_path = %candidate.cert_path.display(),
                    kind = ?error.kind(),
                    error = %error,
                    "CA candidate rejected"
                );
                failures.push(CaCandidateFailure {
                    label: candidate.label.clone(),
                    cert_path: candidate.cert_path.clone(),
                    error,
                });
            }
        }
    }

    Err(CaRequiredError { failures })
}

pub struct CertificateAuthority {
    cert_pem: String,
    issuer: Certificate,
    key: KeyPair,
    common_name: Option<String>,
    not_after: DateTime<Utc>,
    crl_pem: Option<String>,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("common_name", &self.common_name)
            .field("not_after", &self.not_after)
            .field("has_crl", &self.crl_pem.is_some())
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Reads and validates a CA certificate and its private key.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CaLoadError> {
        let cert_pem =
            std::fs::read_to_string(cert_path).map_err(|e| CaLoadError::read(cert_path, e))?;
        let key_pem =
            std::fs::read_to_string(key_path).map_err(|e| CaLoadError::read(key_path, e))?;
        let key_pem = Zeroizing::new(key_pem);
        Self::from_pem(&cert_pem, cert_path, &key_pem, key_path)
    }

    /// Validates already-read PEM. The paths are only used in errors.
    pub fn from_pem(
        cert_pem: &str,
        cert_path: &Path,
        key_pem: &str,
        key_path: &Path,
    ) -> Result<Self, CaLoadError> {
        let (_, pem) =
            parse_x509_pem(cert_pem.as_bytes()).map_err(|e| CaLoadError::parse(cert_path, e))?;
        if pem.label != "CERTIFICATE" {
            let reason = format!("unexpected PEM block '{}'", pem.label);
            return Err(CaLoadError::parse(cert_path, reason));
        }
        let x509 = pem
            .parse_x509()
            .map_err(|e| CaLoadError::parse(cert_path, e))?;

        if !x509.is_ca() {
            return Err(CaLoadError::NotCertificateAuthority {
                path: cert_path.to_path_buf(),
            });
        }

        let not_after = DateTime::<Utc>::from_timestamp(x509.validity().not_after.timestamp(), 0)
            .ok_or_else(|| CaLoadError::parse(cert_path, "notAfter out of range"))?;
        if not_after <= Utc::now() {
            return Err(CaLoadError::Expired {
                path: cert_path.to_path_buf(),
                not_after,
            });
        }

        let key = parse_private_key(key_pem, key_path)?;
        if x509.public_key().subject_public_key.data.as_ref() != key.public_key_raw() {
            return Err(CaLoadError::KeyMismatch {
                cert_path: cert_path.to_path_buf(),
                key_path: key_path.to_path_buf(),
            });
        }

        let common_name = x509
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        // The issuer certificate is rebuilt from the original's parameters so
        // leaves carry its subject and key identifier.
        let params = CertificateParams::from_ca_cert_pem(cert_pem)
            .map_err(|e| CaLoadError::parse(cert_path, e))?;
        let issuer = params
            .self_signed(&key)
            .map_err(|e| CaLoadError::parse(cert_path, e))?;

        let crl_pem = match sign_crl(&issuer, &key) {
            Ok(pem) => Some(pem),
            Err(e) => {
                warn!(cert_path = %cert_path.display(), error = %e, "CA cannot sign a CRL");
                None
            }
        };

        Ok(Self {
            cert_pem: cert_pem.to_string(),
            issuer,
            key,
            common_name,
            not_after,
            crl_pem,
        })
    }

    /// PEM exactly as loaded from disk.
    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn crl_pem(&self) -> Option<&str> {
        self.crl_pem.as_deref()
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Signs a leaf for `sans` valid for `ttl_hours` from now.
    ///
    /// The subject CN is the first SAN. Key usage covers both ends of mutual
    /// TLS. CPU only; no I/O.
    pub fn issue(
        &self,
        sans: &[String],
        ttl_hours: u32,
        organization: &str,
    ) -> Result<CertificateResponse, IssueError> {
        let first = sans
            .first()
            .ok_or_else(|| IssueError::InvalidRequest("no subject alternative names".into()))?;
        if ttl_hours == 0 {
            return Err(IssueError::InvalidRequest("ttl must be positive".into()));
        }

        let mut params = CertificateParams::new(sans.to_vec())
            .map_err(|e| IssueError::InvalidRequest(e.to_string()))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, first.as_str());
        if !organization.is_empty() {
            dn.push(DnType::OrganizationName, organization);
        }
        params.distinguished_name = dn;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(random_serial());

        let now = OffsetDateTime::now_utc()
            .replace_nanosecond(0)
            .map_err(|e| IssueError::Signing(e.to_string()))?;
        params.not_before = now;
        params.not_after = now
            .checked_add(Duration::hours(i64::from(ttl_hours)))
            .ok_or_else(|| {
                IssueError::InvalidRequest(format!("ttl of {ttl_hours} hours is out of range"))
            })?;

        let leaf_key = KeyPair::generate()?;
        let cert = params.signed_by(&leaf_key, &self.issuer, &self.key)?;

        Ok(CertificateResponse {
            certificate: cert.pem(),
            key: CredentialValue::new(leaf_key.serialize_pem()),
        })
    }
}

/// Positive 128-bit serial.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    bytes[0] |= 0x01;
    SerialNumber::from_slice(&bytes)
}

fn sign_crl(issuer: &Certificate, key: &KeyPair) -> Result<String, rcgen::Error> {
    let now = OffsetDateTime::now_utc();
    let params = CertificateRevocationListParams {
        this_update: now,
        next_update: now + Duration::days(CRL_VALIDITY_DAYS),
        crl_number: SerialNumber::from(1u64),
        issuing_distribution_point: None,
        revoked_certs: Vec::new(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    params.signed_by(issuer, key)?.pem()
}

fn parse_private_key(key_pem: &str, key_path: &Path) -> Result<KeyPair, CaLoadError> {
    let der = PrivateKeyDer::from_pem_slice(key_pem.as_bytes())
        .map_err(|e| CaLoadError::parse(key_path, e))?;

    let pkcs8 = match der {
        PrivateKeyDer::Pkcs8(key) => Zeroizing::new(key.secret_pkcs8_der().to_vec()),
        PrivateKeyDer::Pkcs1(key) => {
            wrap_pkcs1(key.secret_pkcs1_der()).map_err(|reason| CaLoadError::UnsupportedKey {
                path: key_path.to_path_buf(),
                reason,
            })?
        }
        PrivateKeyDer::Sec1(_) => {
            return Err(CaLoadError::UnsupportedKey {
                path: key_path.to_path_buf(),
                reason: "SEC1 EC keys must be converted to PKCS#8".into(),
            })
        }
        _ => {
            return Err(CaLoadError::UnsupportedKey {
                path: key_path.to_path_buf(),
                reason: "unrecognised private key encoding".into(),
            })
        }
    };

    KeyPair::try_from(pkcs8.as_slice()).map_err(|e| CaLoadError::UnsupportedKey {
        path: key_path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Wraps a PKCS#1 RSAPrivateKey in a PKCS#8 PrivateKeyInfo.
fn wrap_pkcs1(pkcs1: &[u8]) -> Result<Zeroizing<Vec<u8>>, String> {
    let info = ASN1Block::Sequence(
        0,
        vec![
            ASN1Block::Integer(0, BigInt::from(0)),
            ASN1Block::Sequence(
                0,
                vec![
                    ASN1Block::ObjectIdentifier(0, oid!(1, 2, 840, 113549, 1, 1, 1)),
                    ASN1Block::Null(0),
                ],
            ),
            ASN1Block::OctetString(0, pkcs1.to_vec()),
        ],
    );
    simple_asn1::to_der(&info)
        .map(Zeroizing::new)
        .map_err(|e| e.to_string())
}
