use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers::{
    ca_certificate_handler, crl_handler, health_handler, issue_certificate_handler, ApiState,
};
use crate::pki::CertificateIssuer;

pub fn build_router(issuer: Arc<dyn CertificateIssuer>) -> Router {
    let state = ApiState { issuer };

    Router::new()
        .route("/{version}/pki/cloud-cert", post(issue_certificate_handler))
        .route("/v1/pki/ca", get(ca_certificate_handler))
        .route("/v1/pki/crl", get(crl_handler))
        .route("/healthz", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
