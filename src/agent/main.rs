/**
 * garage-sync Agent Entry Point
 *
 * Headless sync agent: restores the mutation queue from SQLite, watches
 * reachability of the entity proxy and drains the queue until interrupted.
 */

#[cfg(feature = "agent")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::Arc;
    use std::time::Duration;

    use garage_sync::client::sync::ReachabilityProbe;
    use garage_sync::client::{Config, HttpEntityApi, HttpProbe, LocalDatabase, OfflineManager};

    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = Config::load()?;
    if let Some(source) = config.source() {
        tracing::info!(path = %source.display(), "loaded configuration file");
    }

    let database_path = config.database_path();
    let store = Arc::new(LocalDatabase::open(&database_path).await?);
    tracing::info!(path = %database_path.display(), "opened mutation queue");

    let remote = Arc::new(HttpEntityApi::new(
        config.api_base_url()?,
        config.api_token().map(str::to_string),
    ));

    let app = config.app();
    let probe: Option<Arc<dyn ReachabilityProbe>> = match config.probe_url() {
        Some(url) => Some(Arc::new(HttpProbe::new(url, Duration::from_secs(5))?)),
        None => None,
    };

    let manager = OfflineManager::open(app.clone(), store, remote, probe).await?;
    manager.start_probing();
    manager.start_auto_sync(app.sync_interval());
    tracing::info!(
        interval_secs = app.sync_interval_secs,
        pending = manager.queue().len().await,
        "sync agent running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    manager.dispose().await;

    Ok(())
}

#[cfg(not(feature = "agent"))]
fn main() {
    eprintln!("The sync agent requires the 'agent' feature to be enabled.");
    eprintln!("Run with: cargo run --bin garage-sync-agent --features agent");
    std::process::exit(1);
}
