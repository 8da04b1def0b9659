use axum::serve;
use entity_repo_server::config::AppConfig;
use entity_repo_server::logic::ContainerMetadataCache;
use entity_repo_server::{build_app, build_state};
use log::info;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Default to Info for everything, RUST_LOG overrides
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load()?;
    info!(
        "Configuration loaded: server={}:{}, route prefix '{}'",
        config.server.host,
        config.server.port,
        config.route_prefix()
    );

    let bind_address = config.server_address();
    let service_root = config.service_root();

    let cache = ContainerMetadataCache::new();
    let state = build_state(config, &cache)?;
    info!(
        "Container '{}' ready with {} entity sets",
        state.container.name(),
        state.container.entity_sets().len()
    );

    let listener = TcpListener::bind(&bind_address).await?;
    info!("Entity repository server running on http://{}", bind_address);
    info!("Service root: {}", service_root);

    serve(listener, build_app(state)).await?;

    Ok(())
}
