use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use stash_sorter::api;
use stash_sorter::config::Config;
use stash_sorter::desktop::Desktop;
use stash_sorter::scanner::Sorter;
use stash_sorter::state::{Controller, StatusSink};
use stash_sorter::system::SystemDesktop;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let default_filter = if config.debug {
        "info,stash_sorter=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!(
        "stash-sorter starting, grid: {}x{}, window: {:?}, progressive: {}, listen: {}",
        config.inventory.rows,
        config.inventory.columns,
        config.window_title,
        config.progressive_scan,
        config.listen_addr,
    );

    let uncalibrated: Vec<&str> = config
        .stash_tabs
        .iter()
        .filter(|(_, tab)| !tab.is_calibrated())
        .map(|(label, _)| label.as_str())
        .collect();
    if !uncalibrated.is_empty() {
        tracing::warn!("uncalibrated stash tabs: {}", uncalibrated.join(", "));
    }

    let desktop: Arc<dyn Desktop> =
        Arc::new(SystemDesktop::launch().context("failed to start desktop backend")?);

    let sorter = Sorter::new(desktop, config.clone(), StatusSink::new());
    let controller = Arc::new(Controller::new(sorter));

    let app = api::router(controller, config.auth_token.clone()).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .context(format!("failed to bind to {}", config.listen_addr))?;

    tracing::info!("listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
