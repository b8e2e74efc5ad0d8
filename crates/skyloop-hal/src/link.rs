//! [`VehicleLink`] – the single shared handle to the vehicle.
//!
//! Every command primitive is fallible and asynchronous.  Only the action
//! executor issues commands through a link, one at a time; the link itself
//! therefore does not serialise callers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use skyloop_types::{SkyError, TelemetrySnapshot};
use tracing::{info, warn};

use crate::sim::{SimConfig, SimVehicle};

/// Address prefix served by the built-in simulator.
pub const SIM_SCHEME: &str = "sim://";

/// Command and telemetry surface of a connected vehicle.
#[async_trait]
pub trait VehicleLink: Send + Sync {
    /// Read one complete telemetry snapshot.  Readings the link cannot
    /// produce are left absent; `Err` means no snapshot at all.
    async fn capture_telemetry(&self) -> Result<TelemetrySnapshot, SkyError>;

    async fn arm(&self) -> Result<(), SkyError>;

    async fn disarm(&self) -> Result<(), SkyError>;

    /// Set the takeoff altitude and start the takeoff.
    async fn takeoff(&self, altitude_m: f64) -> Result<(), SkyError>;

    async fn goto_location(
        &self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
        yaw_deg: f64,
    ) -> Result<(), SkyError>;

    async fn land(&self) -> Result<(), SkyError>;

    async fn return_to_launch(&self) -> Result<(), SkyError>;

    /// Switch to the position-hold (loiter) mode.
    async fn hold(&self) -> Result<(), SkyError>;

    /// Cut the motors immediately, in the air or not.
    async fn kill(&self) -> Result<(), SkyError>;
}

/// Open a link to the vehicle at `address`.
///
/// # Errors
///
/// Returns [`SkyError::Connection`] when no transport serves the address.
pub async fn connect(address: &str) -> Result<Arc<dyn VehicleLink>, SkyError> {
    info!(address, "connecting to vehicle");
    if let Some(rest) = address.strip_prefix(SIM_SCHEME) {
        if !rest.is_empty() {
            warn!(address, "sim:// takes no parameters; ignoring '{rest}'");
        }
        let vehicle: Arc<dyn VehicleLink> = Arc::new(SimVehicle::new(SimConfig::default()));
        info!("connected to simulated quadrotor");
        return Ok(vehicle);
    }
    Err(SkyError::Connection(format!(
        "no transport available for vehicle address '{address}'"
    )))
}

/// Poll `link` until it reports both a usable global position estimate and
/// a home position, or until `timeout` elapses.
///
/// Telemetry errors while waiting are logged and polling continues.
///
/// # Errors
///
/// Returns [`SkyError::Connection`] on timeout.
pub async fn wait_until_ready(
    link: &dyn VehicleLink,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), SkyError> {
    let deadline = tokio::time::Instant::now().checked_add(timeout);
    loop {
        match link.capture_telemetry().await {
            Ok(snap) => {
                if snap.global_position_ok() == Some(true) && snap.home_position_ok() == Some(true)
                {
                    info!("vehicle has a good global position estimate and home position");
                    return Ok(());
                }
            }
            Err(e) => warn!(error = %e, "telemetry unavailable while waiting for vehicle readiness"),
        }
        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            return Err(SkyError::Connection(format!(
                "vehicle did not report global and home position within {:.0}s",
                timeout.as_secs_f64()
            )));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
