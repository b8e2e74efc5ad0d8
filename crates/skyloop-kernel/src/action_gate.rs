//! [`gate`] – single interception point between the oracle and the executor.
//!
//! The oracle's opinion is advisory only.  Before a [`ProposedAction`]
//! reaches the vehicle it must pass through [`gate`], which checks the
//! action's preconditions against the current [`TelemetrySnapshot`]:
//!
//! | Action | Required state |
//! |--------|----------------|
//! | `Takeoff` | armed, on the ground, positive altitude |
//! | `Arm` | disarmed, on the ground |
//! | `Disarm` | armed, on the ground |
//! | `Goto` | armed, in the air, global position OK, valid lat/lon/alt |
//! | `Land` | armed, in the air |
//! | `ReturnToLaunch` | armed, in the air, home position OK |
//! | `Hold`, `Error` | always allowed |
//!
//! A reading that is absent from the snapshot never satisfies a
//! precondition.  A `Takeoff` proposed while the vehicle is still disarmed on
//! the ground is answered with [`GateDecision::SubstituteArm`]: the caller
//! arms this cycle and lets the takeoff be re-evaluated next cycle, once
//! telemetry has confirmed the arm.
//!
//! # Example
//!
//! ```
//! use skyloop_kernel::{gate, GateDecision};
//! use skyloop_types::{ProposedAction, TelemetrySnapshot};
//!
//! let mut snap = TelemetrySnapshot::empty(1);
//! snap.armed = Some(false);
//! snap.in_air = Some(false);
//!
//! // Landing a vehicle that is not flying is refused.
//! assert!(matches!(gate(&ProposedAction::Land, &snap), GateDecision::Deny { .. }));
//!
//! // Arming it is fine.
//! assert!(matches!(gate(&ProposedAction::Arm, &snap), GateDecision::Allow(_)));
//! ```

use skyloop_types::{ProposedAction, TelemetrySnapshot};
use tracing::debug;

/// Outcome of gating one proposed action.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// The action may be issued to the vehicle as-is.
    Allow(ProposedAction),
    /// The action must not reach the vehicle; the executor holds instead.
    Deny { reason: String },
    /// Arm now; `deferred` (the original takeoff) is retried next cycle.
    SubstituteArm { deferred: ProposedAction },
}

/// Decide whether `proposed` may be executed given `snapshot`.
///
/// Pure: the same inputs always yield the same decision.
pub fn gate(proposed: &ProposedAction, snapshot: &TelemetrySnapshot) -> GateDecision {
    let decision = match proposed {
        ProposedAction::Takeoff { altitude_m } => gate_takeoff(proposed, *altitude_m, snapshot),
        ProposedAction::Arm => check(proposed, || {
            require(snapshot.armed, false, "armed")?;
            require(snapshot.in_air, false, "in_air")
        }),
        ProposedAction::Disarm => check(proposed, || {
            require(snapshot.armed, true, "armed")?;
            require(snapshot.in_air, false, "in_air")
        }),
        ProposedAction::Goto {
            latitude_deg,
            longitude_deg,
            altitude_m,
        } => check(proposed, || {
            require(snapshot.armed, true, "armed")?;
            require(snapshot.in_air, true, "in_air")?;
            require(snapshot.global_position_ok(), true, "global_position_ok")?;
            valid_coordinate(*latitude_deg, 90.0, "latitude_deg")?;
            valid_coordinate(*longitude_deg, 180.0, "longitude_deg")?;
            valid_altitude(*altitude_m)
        }),
        ProposedAction::Land => check(proposed, || {
            require(snapshot.armed, true, "armed")?;
            require(snapshot.in_air, true, "in_air")
        }),
        ProposedAction::ReturnToLaunch => check(proposed, || {
            require(snapshot.armed, true, "armed")?;
            require(snapshot.in_air, true, "in_air")?;
            require(snapshot.home_position_ok(), true, "home_position_ok")
        }),
        ProposedAction::Hold { .. } | ProposedAction::Error { .. } => {
            GateDecision::Allow(proposed.clone())
        }
    };

    debug!(action = %proposed.kind(), seq = snapshot.seq, decision = ?decision, "gate evaluated");
    decision
}

fn gate_takeoff(
    proposed: &ProposedAction,
    altitude_m: Option<f64>,
    snapshot: &TelemetrySnapshot,
) -> GateDecision {
    match (snapshot.armed, snapshot.in_air) {
        (Some(true), Some(false)) => match valid_altitude(altitude_m) {
            Ok(()) => GateDecision::Allow(proposed.clone()),
            Err(reason) => deny(proposed, reason),
        },
        // The altitude is checked once the vehicle is armed.
        (Some(false), Some(false)) => GateDecision::SubstituteArm {
            deferred: proposed.clone(),
        },
        (_, Some(true)) => deny(proposed, "in_air is true, expected false".to_string()),
        (armed, in_air) => deny(
            proposed,
            format!(
                "armed is {}, in_air is {}",
                describe(armed),
                describe(in_air)
            ),
        ),
    }
}

fn check(
    proposed: &ProposedAction,
    preconditions: impl FnOnce() -> Result<(), String>,
) -> GateDecision {
    match preconditions() {
        Ok(()) => GateDecision::Allow(proposed.clone()),
        Err(reason) => deny(proposed, reason),
    }
}

fn deny(proposed: &ProposedAction, reason: String) -> GateDecision {
    GateDecision::Deny {
        reason: format!("{} denied: {reason}", proposed.kind()),
    }
}

/// Unknown readings fail every precondition.
fn require(reading: Option<bool>, expected: bool, name: &str) -> Result<(), String> {
    match reading {
        Some(v) if v == expected => Ok(()),
        Some(v) => Err(format!("{name} is {v}, expected {expected}")),
        None => Err(format!("{name} is unknown, expected {expected}")),
    }
}

fn valid_coordinate(value: Option<f64>, limit: f64, name: &str) -> Result<(), String> {
    match value {
        Some(v) if v.is_finite() && v.abs() <= limit => Ok(()),
        Some(v) => Err(format!("{name} {v} out of range")),
        None => Err(format!("{name} missing")),
    }
}

fn valid_altitude(value: Option<f64>) -> Result<(), String> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => Ok(()),
        Some(v) => Err(format!("altitude_m {v} must be a positive number")),
        None => Err("altitude_m missing".to_string()),
    }
}

fn describe(reading: Option<bool>) -> String {
    reading.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}
