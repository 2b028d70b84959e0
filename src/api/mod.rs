//! HTTP issuance API.
//!
//! `POST /v1/pki/cloud-cert` issues a leaf for `{"name", "ttl"}`;
//! `GET /v1/pki/ca` and `GET /v1/pki/crl` return PEM. Failures carry
//! `{"error": <code>, "message": ..}` with the code's fixed status.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::build_router;
pub use server::{serve, serve_with_shutdown};
