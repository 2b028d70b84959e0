use axum::http::{header, StatusCode};
use tower::ServiceExt;
use trustroot::api::build_router;
use x509_parser::pem::parse_x509_pem;

use crate::{body_json, body_text, get, json_post, native_issuer};

const ISSUE_URI: &str = "/v1/pki/cloud-cert";

#[tokio::test]
async fn issues_certificate_for_bare_name() {
    let router = build_router(native_issuer(true));

    let request = json_post(ISSUE_URI, r#"{"name":"site-agent","ttl":24}"#);
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let certificate = body["certificate"].as_str().unwrap();
    assert!(body["key"].as_str().unwrap().contains("PRIVATE KEY"));

    let (_, pem) = parse_x509_pem(certificate.as_bytes()).unwrap();
    let cert = pem.parse_x509().unwrap();
    let sans = cert.subject_alternative_name().unwrap().unwrap();
    assert!(format!("{:?}", sans.value).contains("site-agent.example.com"));
}

#[tokio::test]
async fn missing_ttl_uses_default_validity() {
    let router = build_router(native_issuer(true));
    let request = json_post(ISSUE_URI, r#"{"name":"api"}"#);
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_version_is_rejected() {
    let router = build_router(native_issuer(true));
    let request = json_post("/v2/pki/cloud-cert", r#"{"name":"api"}"#);
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "ErrorBadAPIVersion");
}

#[tokio::test]
async fn unparsable_body_is_a_parse_error() {
    let router = build_router(native_issuer(true));
    let request = json_post(ISSUE_URI, r#"{"name": 7"#);
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "ErrorParseRequest");
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn wildcard_and_foreign_names_are_unauthorized() {
    for name in ["*.example.com", "api.example.org"] {
        let router = build_router(native_issuer(true));
        let body = format!(r#"{{"name":"{name}"}}"#);
        let response = router.oneshot(json_post(ISSUE_URI, &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{name}");
        assert_eq!(
            body_json(response).await["error"],
            "ErrorVerifyCertificateRequest"
        );
    }
}

#[tokio::test]
async fn malformed_name_is_a_bad_pki_request() {
    let router = build_router(native_issuer(true));
    let request = json_post(ISSUE_URI, r#"{"name":"not a name"}"#);
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "ErrorBadPKIRequest");
}

#[tokio::test]
async fn ttl_beyond_representable_validity_is_a_bad_pki_request() {
    let router = build_router(native_issuer(true));
    let request = json_post(ISSUE_URI, r#"{"name":"api","ttl":4294967295}"#);
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "ErrorBadPKIRequest");
    assert!(body["message"].as_str().unwrap().contains("4294967295"));
}

#[tokio::test]
async fn ca_and_crl_are_served_as_pem() {
    let issuer = native_issuer(true);
    let expected_ca = issuer.ca_certificate().await.unwrap();

    let router = build_router(issuer.clone());
    let response = router.oneshot(get("/v1/pki/ca")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-pem-file"
    );
    assert_eq!(body_text(response).await, expected_ca);

    let request = get("/v1/pki/crl");
    let response = build_router(issuer).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("BEGIN X509 CRL"));
}

#[tokio::test]
async fn crl_without_crl_signing_rights_is_an_error() {
    let router = build_router(native_issuer(false));
    let response = router.oneshot(get("/v1/pki/crl")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await["error"],
        "ErrorRequestCACertificate"
    );
}

#[tokio::test]
async fn health_check() {
    let router = build_router(native_issuer(true));
    let response = router.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}
