//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! This binary is useful for development and debugging when you only want the
//! REST server (with OpenAPI/Swagger UI) with default core configuration. The
//! workspace's main `rx-run` binary is the deployment entry point.

use api_rest::{router, AppState};
use rx_core::{CoreConfig, PharmacyService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the rx REST API server
///
/// Starts the REST API server on the configured address (default:
/// 0.0.0.0:3000). Provides HTTP endpoints for prescription, inventory and
/// dispensing operations with OpenAPI/Swagger documentation.
///
/// # Environment Variables
/// - `RX_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `API_KEY`: When set, mutating endpoints require a matching `x-api-key`
///   header
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("RX_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("-- Starting rx REST API on {}", addr);

    let service = PharmacyService::new(&CoreConfig::default());
    let app = router(AppState { service });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
