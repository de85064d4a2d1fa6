use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

const BUS_NAME: &str = "org.facelog.Attendance1";
const OBJECT_PATH: &str = "/org/facelog/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facelogd starting");

    let config = config::Config::load()?;
    tracing::info!(
        db = %config.db_path.display(),
        dimension = config.dimension,
        wait_secs = config.wait_window.as_secs(),
        check_type = %config.check_type,
        "configuration loaded"
    );

    let store = store::SqliteStore::open(&config.db_path, config.dimension, &config.check_type)
        .context("opening attendance database")?;
    let engine = engine::spawn_engine(store, config.dimension, config.wait_window)?;

    if config.auto_start_session {
        // Without a roster there is nothing to match against.
        let size = engine
            .start_session()
            .await
            .context("starting detection session")?;
        tracing::info!(identities = size, "detection session ready");
    }

    let service = dbus_interface::AttendanceService::new(engine.clone(), config.check_type.clone());
    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = BUS_NAME, system = config.system_bus, "facelogd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facelogd shutting down");

    if let Err(e) = engine.stop_session().await {
        tracing::warn!(error = %e, "failed to stop session cleanly");
    }

    Ok(())
}
