use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{AnalyticsService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facekitd starting");

    let config = config::Config::load().context("loading configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        session_bus = config.session_bus,
        max_faces = config.max_faces,
        "configuration loaded"
    );

    // Models load on this thread so startup fails fast.
    let models = engine::Models::load(&config).context("loading models")?;
    let attributes_loaded = models.attributes_loaded();
    let engine = engine::spawn_engine(models)?;
    let service = AnalyticsService::new(engine, attributes_loaded);

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on D-Bus"))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "facekitd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facekitd shutting down");

    Ok(())
}
