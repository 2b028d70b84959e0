use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use super::error::ApiError;
use crate::pki::{CertificateIssuer, CertificateRequest, ErrorCode};

pub const API_VERSION: &str = "v1";

const PEM_CONTENT_TYPE: &str = "application/x-pem-file";

#[derive(Clone)]
pub struct ApiState {
    pub issuer: Arc<dyn CertificateIssuer>,
}

/// Wire form of an issued certificate. The key is exposed here and nowhere else.
#[derive(Debug, Serialize)]
pub struct CertificateBody {
    pub certificate: String,
    pub key: String,
}

pub async fn issue_certificate_handler(
    State(state): State<ApiState>,
    Path(version): Path<String>,
    payload: Result<Json<CertificateRequest>, JsonRejection>,
) -> Result<Json<CertificateBody>, ApiError> {
    if version != API_VERSION {
        return Err(ApiError::new(
            ErrorCode::BadApiVersion,
            format!("unsupported API version '{version}'"),
        ));
    }
    let Json(request) = payload?;

    match state.issuer.new_certificate(&request).await {
        Ok(issued) => {
            info!(
                name = %request.name,
                ttl_hours = request.ttl_hours(),
                issuer = %state.issuer.kind(),
                "Issued certificate"
            );
            Ok(Json(CertificateBody {
                certificate: issued.certificate,
                key: issued.key.expose_secret().to_string(),
            }))
        }
        Err(e) => {
            warn!(name = %request.name, error = %e, "Certificate request failed");
            Err(e.into())
        }
    }
}

pub async fn ca_certificate_handler(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let pem = state.issuer.ca_certificate().await?;
    Ok(([(header::CONTENT_TYPE, PEM_CONTENT_TYPE)], pem))
}

pub async fn crl_handler(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let pem = state.issuer.crl().await?;
    Ok(([(header::CONTENT_TYPE, PEM_CONTENT_TYPE)], pem))
}

pub async fn health_handler() -> &'static str {
    "ok"
}
