use std::sync::Arc;

use record_service::api;
use record_service::config::Config;
use record_service::store::RecordStore;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "record_service=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(port = config.port, "record service starting");

    let store = Arc::new(RecordStore::new());
    if let Some(path) = &config.seed_path {
        let seeded = store
            .seed_from_file(path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to seed records: {e}"))?;
        info!(path = %path.display(), records = seeded, "Seeded records");
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(addr = %listener.local_addr()?, "record service listening");
    axum::serve(listener, api::app(store)).await?;
    Ok(())
}
