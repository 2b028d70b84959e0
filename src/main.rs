use clap::Parser;
use tracing::{error, info};
use trustroot::{
    api,
    bootstrap::bootstrap,
    config::Cli,
    observability::{init_logging, log_config_info},
    APP_NAME, VERSION,
};

fn install_rustls_provider() {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none() {
        // Losing the race to another installer is fine.
        let _ = ring::default_provider().install_default();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_rustls_provider();

    // Load .env file if it exists (optional - won't fail if missing)
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_json);
    info!(app_name = APP_NAME, version = VERSION, "Starting trustroot");

    let config = cli.into_config()?;
    log_config_info(&config);

    let ready = bootstrap(&config)
        .await
        .inspect_err(|e| error!(error = %e, "Bootstrap failed"))?;

    let served = api::serve(&config.server, ready.issuer.clone()).await;
    ready.shutdown().await;
    served?;

    info!("trustroot stopped");
    Ok(())
}
