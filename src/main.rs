use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orbit_reader::config::Config;
use orbit_reader::reader::Reader;
use orbit_reader::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orbit_reader=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("ORBIT_CONFIG").unwrap_or_else(|_| "orbit.toml".to_string());
    let mut config = if Path::new(&config_path).exists() {
        Config::load(&config_path)?
    } else {
        info!("No config at {}, using defaults", config_path);
        Config::default()
    };
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        config.database_url = database_url;
    }
    info!("Loaded {} seed folders from configuration", config.folders.len());

    let reader = Arc::new(Reader::open(&config).await?);
    info!("Store initialized");

    // Pull remote state once the server is up
    let startup_reader = reader.clone();
    let delay = Duration::from_millis(config.sync.startup_pull_delay_ms);
    tokio::spawn(async move {
        startup_reader.startup_pull(delay).await;
    });

    let state = Arc::new(AppState { reader });

    let app = routes::router(state)
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
