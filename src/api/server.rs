use std::net::SocketAddr;
use std::sync::Arc;

use axum::{serve::Listener, Router};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{config::ServerConfig, errors::Error, pki::CertificateIssuer};

use super::routes::build_router;

/// Serves until Ctrl-C.
pub async fn serve(
    config: &ServerConfig,
    issuer: Arc<dyn CertificateIssuer>,
) -> crate::Result<()> {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "API server shutdown listener failed");
        }
        trigger.cancel();
    });
    serve_with_shutdown(config, issuer, shutdown).await
}

/// Runs the TLS and plain listeners until `shutdown` is cancelled.
pub async fn serve_with_shutdown(
    config: &ServerConfig,
    issuer: Arc<dyn CertificateIssuer>,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let acceptor = serving_tls_acceptor(issuer.as_ref(), &config.dns_name).await?;
    let router = build_router(issuer);

    let tls_listener = bind(config.tls_addr).await?;
    let insecure_listener = bind(config.insecure_addr).await?;

    info!(
        address = %config.tls_addr,
        dns_name = %config.dns_name,
        "Starting HTTPS API server"
    );
    info!(address = %config.insecure_addr, "Starting HTTP API server");

    tokio::try_join!(
        run_tls_server(tls_listener, acceptor, router.clone(), shutdown.clone()),
        run_http_server(insecure_listener, router, shutdown),
    )?;

    info!("API server shutdown completed");
    Ok(())
}

async fn bind(addr: SocketAddr) -> crate::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::transport(format!("Failed to bind API server on {}: {}", addr, e)))
}

async fn run_http_server(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::transport(format!("API server error: {}", e)))
}

async fn run_tls_server(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let tls_listener = TlsListener::new(listener, acceptor);
    axum::serve(tls_listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::transport(format!("HTTPS API server error: {}", e)))
}

/// Issues the serving certificate from the active issuer, chained to its CA.
async fn serving_tls_acceptor(
    issuer: &dyn CertificateIssuer,
    dns_name: &str,
) -> crate::Result<TlsAcceptor> {
    let issued = issuer
        .raw_certificate(dns_name, 0)
        .await
        .map_err(|e| Error::config(format!("Failed to issue serving certificate: {}", e)))?;

    let mut cert_chain = CertificateDer::pem_slice_iter(issued.certificate.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("Invalid serving certificate: {}", e)))?;
    match issuer.ca_certificate().await {
        Ok(ca_pem) => {
            for cert in CertificateDer::pem_slice_iter(ca_pem.as_bytes()).flatten() {
                cert_chain.push(cert);
            }
        }
        Err(e) => warn!(error = %e, "Serving certificate chain will not include the CA"),
    }
    let private_key = PrivateKeyDer::from_pem_slice(issued.key.expose_secret().as_bytes())
        .map_err(|e| Error::config(format!("Invalid serving key: {}", e)))?;

    let provider = rustls::crypto::ring::default_provider();
    let builder = rustls::ServerConfig::builder_with_provider(provider.into())
        .with_safe_default_protocol_versions()
        .map_err(|err| Error::config(format!("Invalid TLS protocol configuration: {err}")))?;

    let server_config = builder
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|err| Error::config(format!("Failed to load TLS certificate: {err}")))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

struct TlsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    fn new(listener: TcpListener, acceptor: TlsAcceptor) -> Self {
        Self { listener, acceptor }
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => match self.acceptor.accept(stream).await {
                    Ok(tls_stream) => return (tls_stream, addr),
                    Err(err) => {
                        warn!(error = %err, %addr, "TLS handshake failed");
                        continue;
                    }
                },
                Err(err) => {
                    if is_connection_error(&err) {
                        continue;
                    }
                    error!("HTTPS accept error: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.listener.local_addr()
    }
}

fn is_connection_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}
