use std::sync::Arc;

use tracing::{info, warn};

use trazalink::backend::BackendClient;
use trazalink::bus::EventBus;
use trazalink::config::Config;
use trazalink::gateway::GatewayClient;
use trazalink::i18n::Language;
use trazalink::manager::Manager;
use trazalink::server::ApiServer;
use trazalink::store::{self, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Trazalink daemon starting...");

    let config = Config::from_env()?;

    info!("Initializing store at {}", config.db_path.display());
    let store = Arc::new(Store::new(&config.db_path).await?);
    store.init().await?;

    // A persisted language preference wins over the configured default.
    let language = match store.get(store::KEY_LANGUAGE).await {
        Ok(Some(code)) => Language::from_code(&code),
        _ => config.default_language,
    };

    let bus = Arc::new(EventBus::new());
    let backend = Arc::new(BackendClient::new(&config.backend_url)?);
    let gateway = Arc::new(GatewayClient::new(&config.gateway_url)?);

    let manager = Arc::new(Manager::new(
        backend,
        gateway,
        store.clone(),
        bus.clone(),
        config.model.clone(),
        language,
    ));

    // Pick up a previous login if the token is still good.
    if !manager.restore_session().await {
        info!("No persisted session; waiting for login through the UI");
    }

    let server = ApiServer::new(manager, bus, store);
    let app = server.router();

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Starting dashboard API on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                warn!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
