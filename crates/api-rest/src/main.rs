//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the patient portal REST API on its own, without the reconciliation scheduler.
//!
//! ## Intended use
//! Useful for development and debugging when only the HTTP surface (with OpenAPI/Swagger UI) is
//! needed. The workspace's main `clinic-run` binary runs the API and the scheduler together.

use api_rest::{router, AppState};
use clinic_core::collaborators::{NoReviews, TracingIntegrationGateway, TracingNotifier};
use clinic_core::{AppointmentWorkflow, ClinicConfig, ClinicStore, PatientPortal, SystemClock};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the clinic REST API server
///
/// # Environment Variables
/// - `CLINIC_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `CLINIC_SNAPSHOT_PATH`: Store snapshot to load at startup (optional)
/// - `CLINIC_*`: Core configuration, see [`ClinicConfig::from_env_lookup`]
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration or the snapshot cannot be read, or
/// - the server address cannot be bound or the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("clinic_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("CLINIC_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let cfg = Arc::new(ClinicConfig::from_env_lookup(|key| std::env::var(key).ok())?);

    let store = match std::env::var("CLINIC_SNAPSHOT_PATH").ok() {
        Some(path) if Path::new(&path).exists() => {
            tracing::info!("-- Loading store snapshot from {}", path);
            ClinicStore::load_snapshot(Path::new(&path))?
        }
        _ => ClinicStore::new(),
    };

    let workflow = AppointmentWorkflow::new(
        Arc::new(store),
        cfg,
        Arc::new(SystemClock),
        Arc::new(TracingNotifier),
        Arc::new(TracingIntegrationGateway),
        Arc::new(NoReviews),
    );
    let app = router(AppState::new(PatientPortal::new(workflow)));

    tracing::info!("-- Starting clinic REST API on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
