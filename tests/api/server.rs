use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trustroot::api::serve_with_shutdown;
use trustroot::config::ServerConfig;

use crate::native_issuer;

const DNS_NAME: &str = "credsmgr.example.com";

fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn get_with_retry(client: &reqwest::Client, url: &str) -> reqwest::Response {
    for _ in 0..50 {
        if let Ok(response) = client.get(url).send().await {
            return response;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("server at {url} never answered");
}

#[tokio::test]
async fn serves_plain_and_tls_until_cancelled() {
    let issuer = native_issuer(true);
    let ca_pem = issuer.ca_certificate().await.unwrap();
    let config = ServerConfig {
        tls_addr: free_addr(),
        insecure_addr: free_addr(),
        dns_name: DNS_NAME.into(),
    };

    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let config = config.clone();
        let shutdown = shutdown.clone();
        async move { serve_with_shutdown(&config, issuer, shutdown).await }
    });

    let plain = reqwest::Client::new();
    let health_url = format!("http://{}/healthz", config.insecure_addr);
    let response = get_with_retry(&plain, &health_url).await;
    assert_eq!(response.text().await.unwrap(), "ok");

    // The serving certificate must chain to the CA and carry the configured name.
    let tls = reqwest::Client::builder()
        .add_root_certificate(reqwest::Certificate::from_pem(ca_pem.as_bytes()).unwrap())
        .resolve(DNS_NAME, config.tls_addr)
        .build()
        .unwrap();
    let url = format!("https://{}:{}/v1/pki/ca", DNS_NAME, config.tls_addr.port());
    let response = get_with_retry(&tls, &url).await;
    assert_eq!(response.text().await.unwrap(), ca_pem);

    drop((plain, tls));
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
