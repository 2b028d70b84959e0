use std::collections::HashSet;
use std::sync::Arc;

use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::RootCertStore;
use trustroot::pki::{
    CertificateIssuer, CertificateRequest, IssueError, NativeIssuer, DEFAULT_TTL_HOURS,
};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use super::support::*;

fn dns_names(cert: &X509Certificate<'_>) -> Vec<String> {
    cert.subject_alternative_name()
        .unwrap()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn issuer_for(ca: &TestCa) -> (CandidateDir, NativeIssuer) {
    let primary = CandidateDir::with("primary", ca);
    let issuer = NativeIssuer::new(options(vec![primary.candidate.clone()])).unwrap();
    (primary, issuer)
}

fn request(name: &str, ttl: u32) -> CertificateRequest {
    CertificateRequest::new(name, ttl)
}

/// Builds a chain from `leaf_der` to `ca_der` with the CA as the only trust
/// anchor and checks it is valid for `dns_name`.
fn verify_chain(ca_der: &[u8], leaf_der: &[u8], dns_name: &str) -> Result<(), rustls::Error> {
    let mut roots = RootCertStore::empty();
    roots.add(CertificateDer::from(ca_der.to_vec()))?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
        .build()
        .map_err(|e| rustls::Error::General(e.to_string()))?;

    let leaf = CertificateDer::from(leaf_der.to_vec());
    let server_name = ServerName::try_from(dns_name.to_string())
        .map_err(|e| rustls::Error::General(e.to_string()))?;
    verifier.verify_server_cert(&leaf, &[], &server_name, &[], UnixTime::now())?;
    Ok(())
}

#[tokio::test]
async fn rsa_ca_issues_leaf_verifiable_against_it() {
    let ca = TestCa::rsa("Carbide Local CA", KeyEncoding::RsaPkcs8);
    let (_primary, issuer) = issuer_for(&ca);

    let issued = issuer.new_certificate(&request("test", 24)).await.unwrap();
    assert!(issued.key.expose_secret().contains("PRIVATE KEY"));

    let leaf_der = der_of(&issued.certificate);
    let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
    let ca_der = der_of(&ca.cert_pem);
    let (_, ca_cert) = X509Certificate::from_der(&ca_der).unwrap();

    assert_eq!(dns_names(&leaf), vec!["test.example.com".to_string()]);
    let validity = leaf.validity();
    let lifetime = validity.not_after.timestamp() - validity.not_before.timestamp();
    assert_eq!(lifetime, 24 * 3600);
    assert_eq!(leaf.issuer().to_string(), ca_cert.subject().to_string());
    assert!(!leaf.is_ca());

    verify_chain(&ca_der, &leaf_der, "test.example.com")
        .expect("leaf must chain to the CA for its own name");
}

#[tokio::test]
async fn chain_check_rejects_other_names_and_anchors() {
    let ca = TestCa::rsa("Carbide Local CA", KeyEncoding::RsaPkcs8);
    let (_primary, issuer) = issuer_for(&ca);
    let issued = issuer.new_certificate(&request("test", 24)).await.unwrap();
    let leaf_der = der_of(&issued.certificate);

    let ca_der = der_of(&ca.cert_pem);
    assert!(verify_chain(&ca_der, &leaf_der, "other.example.com").is_err());

    let stranger = TestCa::ec("Stranger CA");
    let stranger_der = der_of(&stranger.cert_pem);
    assert!(verify_chain(&stranger_der, &leaf_der, "test.example.com").is_err());
}

#[tokio::test]
async fn pkcs1_rsa_key_is_accepted() {
    let ca = TestCa::rsa("Carbide Local CA", KeyEncoding::RsaPkcs1);
    let (_primary, issuer) = issuer_for(&ca);

    let issued = issuer.raw_certificate("rsa.example.com", 1).await.unwrap();
    let leaf_der = der_of(&issued.certificate);
    let ca_der = der_of(&ca.cert_pem);
    verify_chain(&ca_der, &leaf_der, "rsa.example.com").unwrap();
}

#[tokio::test]
async fn zero_ttl_defaults_to_ninety_days() {
    let ca = TestCa::ec("Carbide Local CA");
    let (_primary, issuer) = issuer_for(&ca);

    let issued_at = chrono::Utc::now().timestamp();
    let issued = issuer
        .new_certificate(&request("site-agent", 0))
        .await
        .unwrap();

    let leaf_der = der_of(&issued.certificate);
    let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
    let expected = issued_at + i64::from(DEFAULT_TTL_HOURS) * 3600;
    let not_after = leaf.validity().not_after.timestamp();
    assert!(
        (not_after - expected).abs() <= 1,
        "not_after {not_after} expected {expected}"
    );
}

#[tokio::test]
async fn leaf_is_fit_for_mutual_tls() {
    let ca = TestCa::ec("Carbide Local CA");
    let (_primary, issuer) = issuer_for(&ca);

    let issued = issuer
        .raw_certificate("a.example.com, b.example.com", 2)
        .await
        .unwrap();
    let leaf_der = der_of(&issued.certificate);
    let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();

    let names = dns_names(&leaf);
    assert_eq!(names, ["a.example.com", "b.example.com"]);
    let subject = leaf.subject();
    let cn = subject.iter_common_name().next().unwrap();
    assert_eq!(cn.as_str().unwrap(), "a.example.com");
    let org = subject.iter_organization().next().unwrap();
    assert_eq!(org.as_str().unwrap(), "NVIDIA");

    let eku = leaf.extended_key_usage().unwrap().unwrap().value;
    assert!(eku.server_auth);
    assert!(eku.client_auth);
    let ku = leaf.key_usage().unwrap().unwrap().value;
    assert!(ku.digital_signature());
    assert!(ku.key_encipherment());
    assert!(!leaf.raw_serial().is_empty());
}

#[tokio::test]
async fn refuses_names_it_may_not_grant() {
    let ca = TestCa::ec("Carbide Local CA");
    let (_primary, issuer) = issuer_for(&ca);

    let wildcard = issuer.new_certificate(&request("*.example.com", 1)).await;
    assert!(matches!(wildcard, Err(IssueError::Unauthorized(_))));

    let foreign = issuer.new_certificate(&request("site.other.org", 1)).await;
    assert!(matches!(foreign, Err(IssueError::Unauthorized(_))));

    let malformed = issuer.new_certificate(&request("bad name!", 1)).await;
    assert!(matches!(malformed, Err(IssueError::InvalidRequest(_))));

    let empty = issuer.raw_certificate(" , ", 1).await;
    assert!(matches!(empty, Err(IssueError::InvalidRequest(_))));
}

#[tokio::test]
async fn ca_and_crl_are_served_from_memory() {
    let ca = TestCa::ec("Carbide Local CA");
    let (primary, issuer) = issuer_for(&ca);

    // Removing the files must not affect reads.
    drop(primary);

    assert_eq!(issuer.ca_certificate().await.unwrap(), ca.cert_pem);
    let crl = issuer.crl().await.unwrap();
    assert!(crl.starts_with("-----BEGIN X509 CRL-----"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_issuance_shares_one_ca() {
    let ca = TestCa::ec("Carbide Local CA");
    let (_primary, issuer) = issuer_for(&ca);
    let issuer = Arc::new(issuer);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let issuer = Arc::clone(&issuer);
        tasks.push(tokio::spawn(async move {
            let name = format!("node-{i}");
            issuer.new_certificate(&request(&name, 1)).await.unwrap()
        }));
    }

    let ca_der = der_of(&ca.cert_pem);
    let (_, ca_cert) = X509Certificate::from_der(&ca_der).unwrap();
    let mut serials = HashSet::new();
    for task in tasks {
        let issued = task.await.unwrap();
        let leaf_der = der_of(&issued.certificate);
        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
        leaf.verify_signature(Some(ca_cert.public_key())).unwrap();
        serials.insert(leaf.raw_serial().to_vec());
    }
    assert_eq!(serials.len(), 16);
}
