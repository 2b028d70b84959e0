use serde_json::json;
use trustroot::secrets::CredentialValue;
use trustroot::vault::{HttpVaultApi, VaultApi, VaultError};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn api() -> (MockServer, HttpVaultApi) {
    let server = MockServer::start().await;
    let api = HttpVaultApi::new(&server.uri()).unwrap();
    (server, api)
}

fn ok_json(body: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

fn root() -> CredentialValue {
    CredentialValue::new("s.root")
}

#[tokio::test]
async fn health_reports_sealed_state_without_error() {
    let (server, api) = api().await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/health"))
        .and(query_param("sealedcode", "200"))
        .and(query_param("uninitcode", "200"))
        .respond_with(ok_json(json!({
            "initialized": true,
            "sealed": true,
            "version": "1.15.0"
        })))
        .mount(&server)
        .await;

    let health = api.health().await.unwrap();
    assert!(health.initialized);
    assert!(health.sealed);
}

#[tokio::test]
async fn init_and_unseal() {
    let (server, api) = api().await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/init"))
        .and(body_partial_json(json!({ "secret_shares": 1, "secret_threshold": 1 })))
        .respond_with(ok_json(json!({
            "keys": ["abc123"],
            "keys_base64": ["q8Ej"],
            "root_token": "s.root"
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/unseal"))
        .and(body_partial_json(json!({ "key": "abc123" })))
        .respond_with(ok_json(json!({ "sealed": false, "t": 1, "n": 1 })))
        .mount(&server)
        .await;

    let init = api.init(1, 1).await.unwrap();
    assert_eq!(init.unseal_keys.len(), 1);
    assert_eq!(init.root_token.expose_secret(), "s.root");
    assert!(!api.unseal(&init.unseal_keys[0]).await.unwrap());
}

#[tokio::test]
async fn list_mounts_accepts_both_response_shapes() {
    let (server, api) = api().await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/mounts"))
        .and(header("X-Vault-Token", "s.root"))
        .respond_with(ok_json(json!({
            "request_id": "1",
            "data": { "sys/": { "type": "system" }, "pki/": { "type": "pki" } }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/mounts"))
        .respond_with(ok_json(json!({ "secret/": { "type": "kv" } })))
        .mount(&server)
        .await;

    let mut nested = api.list_mounts(&root()).await.unwrap();
    nested.sort();
    assert_eq!(nested, vec!["pki".to_string(), "sys".to_string()]);
    let flat = api.list_mounts(&root()).await.unwrap();
    assert_eq!(flat, vec!["secret".to_string()]);
}

#[tokio::test]
async fn missing_ca_reads_as_none() {
    let (server, api) = api().await;
    Mock::given(method("GET"))
        .and(path("/v1/pki/cert/ca"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
        .mount(&server)
        .await;

    assert_eq!(api.read_ca(&root(), "pki").await.unwrap(), None);
}

#[tokio::test]
async fn create_token_returns_client_token() {
    let (server, api) = api().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/token/create"))
        .and(header("X-Vault-Token", "s.root"))
        .and(body_partial_json(json!({ "policies": ["cert-manager"], "no_parent": true })))
        .respond_with(ok_json(json!({
            "auth": { "client_token": "s.child", "policies": ["cert-manager"] }
        })))
        .mount(&server)
        .await;

    let acl = ["cert-manager".to_string()];
    let token = api.create_token(&root(), &acl, "8760h").await.unwrap();
    assert_eq!(token.expose_secret(), "s.child");
}

#[tokio::test]
async fn error_status_is_surfaced_and_classified() {
    let (server, api) = api().await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/policies/acl/cert-manager"))
        .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/mounts/pki"))
        .respond_with(ResponseTemplate::new(503).set_body_string("sealed"))
        .mount(&server)
        .await;

    let policy = r#"path "*" {}"#;
    let denied = api
        .write_policy(&root(), "cert-manager", policy)
        .await
        .unwrap_err();
    assert!(matches!(denied, VaultError::Status { status: 403, .. }));
    assert!(!denied.is_retryable());

    let sealed = api.enable_pki(&root(), "pki", "87600h").await.unwrap_err();
    assert!(sealed.is_retryable());
}

#[tokio::test]
async fn malformed_init_response_is_a_protocol_error() {
    let (server, api) = api().await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/init"))
        .respond_with(ok_json(json!({ "keys": [], "root_token": "s.root" })))
        .mount(&server)
        .await;

    assert!(matches!(api.init(1, 1).await, Err(VaultError::Protocol { .. })));
}
