//! Lifeboat server binary.

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = lifeboat_server::run().await {
        tracing::error!("server failed: {err}");
        std::process::exit(1);
    }
}
