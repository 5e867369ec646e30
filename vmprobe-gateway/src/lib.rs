//! HTTP front door of the vmprobe inventory probe.
//!
//! Validates requests at the boundary, runs each scan as its own task,
//! refuses a second scan of a VM that is already being scanned, and maps the
//! scan error taxonomy onto structured HTTP errors.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod logging;
pub mod pool;
pub mod routes;

use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use vmprobe_scanner::{load_manifest, GuestfishLauncher, HypervisorConnector, ProbeConfig, ScanCoordinator};

pub use error::GatewayError;
pub use logging::init_tracing;
pub use pool::{ScanGuard, ScanRegistry};
pub use routes::{create_router, AppState};

/// Wires a loaded configuration into handler state: the manifest is read
/// once, here, and every scan inspects guests through guestfish.
#[must_use]
pub fn app_state(config: ProbeConfig, connector: Arc<dyn HypervisorConnector>) -> AppState {
    let manifest = load_manifest(&config.general.manifest_path);
    let engines = Arc::new(GuestfishLauncher::new(&config.inspector));
    let coordinator = ScanCoordinator::new(connector, engines, Arc::new(config), manifest);
    AppState::new(Arc::new(coordinator))
}

/// Loads `config_path`, initialises logging and serves the API on the
/// configured listen address until the server fails.
///
/// The hypervisor transport is supplied by the embedding binary.
///
/// # Errors
/// Returns [`GatewayError::Config`] for an unusable configuration,
/// [`GatewayError::Tracing`] when logging cannot be set up,
/// [`GatewayError::Bind`] when the address is unavailable and
/// [`GatewayError::Server`] when serving stops.
pub async fn run(config_path: impl AsRef<Path>, connector: Arc<dyn HypervisorConnector>) -> Result<(), GatewayError> {
    let config = ProbeConfig::load(config_path).await?;
    init_tracing(&config.general)?;

    let addr = config.general.listen_addr.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| GatewayError::Bind { addr: addr.clone(), source })?;
    serve(listener, app_state(config, connector)).await.map_err(GatewayError::Server)
}

/// Serves the API on `listener` until the server fails.
///
/// # Errors
/// Returns the I/O error that stopped the server.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, "vmprobe-gateway listening");
    axum::serve(listener, create_router(state)).await
}
