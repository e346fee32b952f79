use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url_mapper::{
    config,
    routes::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let container = config::init_container().await?;
    let app = routes::router(AppState::from_container(&container));

    let listener = TcpListener::bind(container.read(config::addr_capsule)).await?;
    info!(addr = %listener.local_addr()?, "Started listening on TCP");
    axum::serve(listener, app).await?;
    Ok(())
}
