use std::sync::Arc;
use std::time::Duration;

use trustroot::errors::CaLoadErrorKind;
use trustroot::pki::{CertificateIssuer, CertificateRequest, NativeIssuer};
use trustroot::watch::{SecretWatchRegistration, SecretWatcher};
use x509_parser::prelude::{FromDer, X509Certificate};

use super::support::*;

#[test]
fn missing_primary_falls_back_to_alternate() {
    let ca = TestCa::ec("Carbide Local CA");
    let primary = CandidateDir::missing("primary");
    let alternate = CandidateDir::with("alternate", &ca);

    let candidates = vec![primary.candidate.clone(), alternate.candidate.clone()];
    let issuer = NativeIssuer::new(options(candidates)).unwrap();

    let active = issuer.active();
    assert_eq!(active.source.label, "alternate");
    assert_eq!(active.source.cert_path, alternate.candidate.cert_path);
    assert_eq!(active.authority.certificate_pem(), ca.cert_pem);
}

#[test]
fn primary_wins_when_both_are_valid() {
    let primary_ca = TestCa::ec("Carbide Local CA");
    let alternate_ca = TestCa::ec("Alternate CA");
    let primary = CandidateDir::with("primary", &primary_ca);
    let alternate = CandidateDir::with("alternate", &alternate_ca);

    let candidates = vec![primary.candidate.clone(), alternate.candidate.clone()];
    let issuer = NativeIssuer::new(options(candidates)).unwrap();
    assert_eq!(issuer.active().source.label, "primary");
}

#[test]
fn all_invalid_candidates_are_reported_together() {
    let primary = CandidateDir::missing("primary");
    let alternate = CandidateDir::garbage("alternate");

    let candidates = vec![primary.candidate.clone(), alternate.candidate.clone()];
    let err = NativeIssuer::new(options(candidates)).unwrap_err();

    assert_eq!(err.failures.len(), 2);
    assert_eq!(err.failures[0].error.kind(), CaLoadErrorKind::NotFound);
    assert_eq!(err.failures[1].error.kind(), CaLoadErrorKind::Parse);

    let message = err.to_string();
    for candidate in [&primary.candidate, &alternate.candidate] {
        let path = candidate.cert_path.display().to_string();
        assert!(message.contains(&path), "{message}");
    }
}

#[test]
fn mismatched_pair_is_a_key_mismatch() {
    let one = TestCa::ec("Carbide Local CA");
    let two = TestCa::ec("Carbide Local CA");
    let mixed = TestCa {
        cert_pem: one.cert_pem.clone(),
        key_pem: two.key_pem.clone(),
    };
    let primary = CandidateDir::with("primary", &mixed);

    let err = NativeIssuer::new(options(vec![primary.candidate.clone()])).unwrap_err();
    assert_eq!(err.failures[0].error.kind(), CaLoadErrorKind::KeyMismatch);
}

#[tokio::test]
async fn reload_swaps_in_the_new_ca() {
    let old_ca = TestCa::ec("Carbide Local CA");
    let primary = CandidateDir::with("primary", &old_ca);
    let issuer = NativeIssuer::new(options(vec![primary.candidate.clone()])).unwrap();

    let new_ca = TestCa::ec("Carbide Local CA");
    new_ca.write_to(primary.dir.path());
    issuer.reload().unwrap();

    assert_eq!(issuer.ca_certificate().await.unwrap(), new_ca.cert_pem);
    let request = CertificateRequest::new("rotated", 1);
    let issued = issuer.new_certificate(&request).await.unwrap();
    let leaf_der = der_of(&issued.certificate);
    let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
    let ca_der = der_of(&new_ca.cert_pem);
    let (_, ca_cert) = X509Certificate::from_der(&ca_der).unwrap();
    leaf.verify_signature(Some(ca_cert.public_key())).unwrap();
}

#[tokio::test]
async fn failed_reload_keeps_last_good_ca() {
    let ca = TestCa::ec("Carbide Local CA");
    let primary = CandidateDir::with("primary", &ca);
    let issuer = NativeIssuer::new(options(vec![primary.candidate.clone()])).unwrap();

    std::fs::write(&primary.candidate.cert_path, "half-written").unwrap();
    assert!(issuer.reload().is_err());

    assert_eq!(issuer.ca_certificate().await.unwrap(), ca.cert_pem);
    let request = CertificateRequest::new("still-works", 1);
    issuer.new_certificate(&request).await.unwrap();
}

#[tokio::test]
async fn watcher_rotates_ca_when_mount_changes() {
    let old_ca = TestCa::ec("Carbide Local CA");
    let primary = CandidateDir::with("primary", &old_ca);
    let issuer = Arc::new(NativeIssuer::new(options(vec![primary.candidate.clone()])).unwrap());

    let mut watcher = SecretWatcher::new();
    let reloading = Arc::clone(&issuer);
    let registration = SecretWatchRegistration::new(primary.dir.path(), move || {
        reloading.reload()?;
        Ok(())
    });
    watcher.register(registration).unwrap();
    let handle = watcher.start().await.unwrap();

    let new_ca = TestCa::ec("Carbide Local CA");
    new_ca.write_to(primary.dir.path());

    let rotated = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if issuer.ca_certificate().await.unwrap() == new_ca.cert_pem {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    handle.stop().await;

    assert!(
        rotated.is_ok(),
        "CA was not rotated after the mount changed"
    );
}
