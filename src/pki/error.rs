//! Issuance errors and the fixed error-code table exposed over HTTP.

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Wire error codes. Each code owns exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "ErrorParseRequest")]
    ParseRequest,
    #[serde(rename = "ErrorBadAPIVersion")]
    BadApiVersion,
    #[serde(rename = "ErrorBadOwnerInfo")]
    BadOwnerInfo,
    #[serde(rename = "ErrorVerifyCertificateRequest")]
    VerifyCertificateRequest,
    #[serde(rename = "ErrorGetCertificate")]
    GetCertificate,
    #[serde(rename = "ErrorMarshalJSON")]
    MarshalJson,
    #[serde(rename = "ErrorRequestCACertificate")]
    RequestCaCertificate,
    #[serde(rename = "ErrorBadPKIRequest")]
    BadPkiRequest,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseRequest => "ErrorParseRequest",
            Self::BadApiVersion => "ErrorBadAPIVersion",
            Self::BadOwnerInfo => "ErrorBadOwnerInfo",
            Self::VerifyCertificateRequest => "ErrorVerifyCertificateRequest",
            Self::GetCertificate => "ErrorGetCertificate",
            Self::MarshalJson => "ErrorMarshalJSON",
            Self::RequestCaCertificate => "ErrorRequestCACertificate",
            Self::BadPkiRequest => "ErrorBadPKIRequest",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ParseRequest | Self::BadApiVersion | Self::BadOwnerInfo | Self::BadPkiRequest => {
                StatusCode::BAD_REQUEST
            }
            Self::VerifyCertificateRequest => StatusCode::UNAUTHORIZED,
            Self::GetCertificate | Self::MarshalJson | Self::RequestCaCertificate => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by a certificate issuer. None of them are fatal to the process.
#[derive(Debug, Error)]
pub enum IssueError {
    /// The request is malformed (bad name, unparsable SAN list).
    #[error("Invalid certificate request: {0}")]
    InvalidRequest(String),

    /// The request is well formed but may not be granted (wildcards, foreign domains).
    #[error("Certificate request not authorized: {0}")]
    Unauthorized(String),

    /// Building or signing the certificate failed.
    #[error("Certificate signing failed: {0}")]
    Signing(String),

    /// The remote PKI backend failed.
    #[error("PKI backend error: {0}")]
    Backend(String),

    /// The CA certificate could not be produced.
    #[error("CA certificate unavailable: {0}")]
    CaUnavailable(String),

    /// No CRL is published by the active CA.
    #[error("CRL unavailable: {0}")]
    CrlUnavailable(String),
}

impl IssueError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::BadPkiRequest,
            Self::Unauthorized(_) => ErrorCode::VerifyCertificateRequest,
            Self::Signing(_) | Self::Backend(_) => ErrorCode::GetCertificate,
            Self::CaUnavailable(_) | Self::CrlUnavailable(_) => ErrorCode::RequestCaCertificate,
        }
    }
}

impl From<rcgen::Error> for IssueError {
    fn from(err: rcgen::Error) -> Self {
        Self::Signing(err.to_string())
    }
}
