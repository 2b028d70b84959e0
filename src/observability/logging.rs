//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins when set;
//! otherwise the level is `info`, or `debug` with `--debug`.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{BootstrapConfig, TrustMode};

fn env_filter(debug: bool) -> EnvFilter {
    let default_level = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber.
///
/// Returns `false` if one was already installed (e.g. by a test harness).
pub fn init_logging(debug: bool, json: bool) -> bool {
    let builder = fmt().with_env_filter(env_filter(debug)).with_target(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}

/// Log configuration at startup
pub fn log_config_info(config: &BootstrapConfig) {
    let mode = match &config.trust {
        TrustMode::Native(_) => "native",
        TrustMode::Vault(_) => "vault",
    };
    tracing::info!(
        tls_address = %config.server.tls_addr,
        insecure_address = %config.server.insecure_addr,
        dns_name = %config.server.dns_name,
        base_dns = %config.base_dns,
        trust_mode = mode,
        "trustroot configuration"
    );
    if let TrustMode::Native(native) = &config.trust {
        for candidate in &native.candidates {
            tracing::debug!(
                label = %candidate.label,
                cert_path = %candidate.cert_path.display(),
                key_path = %candidate.key_path.display(),
                "CA candidate"
            );
        }
    }
}
