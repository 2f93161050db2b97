use api_rest::{router, AppState};
use rx_core::{CoreConfig, PharmacyService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the rx application
///
/// Starts the REST server that backs the clinic UI's prescription, inventory
/// and dispensing screens, with OpenAPI/Swagger documentation.
///
/// # Environment Variables
/// - `RX_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `RX_EXPIRY_WARNING_DAYS`: Horizon for the expiring-soon stock flag
///   (default: 90)
/// - `API_KEY`: When set, mutating endpoints require a matching `x-api-key`
///   header
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If server startup or runtime fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("rx=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("RX_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("++ Starting rx REST on {}", rest_addr);

    let expiry_warning_days = match std::env::var("RX_EXPIRY_WARNING_DAYS") {
        Ok(value) => value.parse()?,
        Err(_) => rx_core::config::DEFAULT_EXPIRY_WARNING_DAYS,
    };
    let cfg = CoreConfig::new(
        expiry_warning_days,
        rx_core::config::DEFAULT_LOCK_RETRIES,
        rx_core::config::DEFAULT_LOCK_BACKOFF,
    )?;

    let service = PharmacyService::new(&cfg);
    let app = router(AppState { service });

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
