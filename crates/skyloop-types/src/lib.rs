use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Geodetic position of the vehicle.  Altitude is relative to the home
/// (launch) position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub relative_altitude_m: f64,
}

/// Velocity in the local North-East-Down frame, metres per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityNed {
    pub north_m_s: f64,
    pub east_m_s: f64,
    pub down_m_s: f64,
}

/// Euler attitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    /// 0–100.
    pub remaining_percent: u8,
    pub voltage_v: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsInfo {
    pub num_satellites: u32,
    /// 0: no fix, 1: no GPS, 2: 2D fix, 3: 3D fix.
    pub fix_type: u8,
}

/// Autopilot health flags.  Each flag is reported independently; a flag the
/// link could not read stays `None` rather than defaulting to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub armable: Option<bool>,
    pub global_position_ok: Option<bool>,
    pub local_position_ok: Option<bool>,
    pub home_position_ok: Option<bool>,
}

/// Autopilot flight mode as reported by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    Unknown,
    Ready,
    Takeoff,
    Hold,
    Mission,
    ReturnToLaunch,
    Land,
    Offboard,
    FollowMe,
    Manual,
    Altctl,
    Posctl,
    Acro,
    Stabilized,
}

impl FlightMode {
    /// `true` for the modes in which the autopilot flies a commanded
    /// position on its own.  A goto in transit is considered interrupted as
    /// soon as the vehicle leaves these modes.
    pub fn is_guided(self) -> bool {
        matches!(
            self,
            FlightMode::Hold | FlightMode::Mission | FlightMode::Offboard | FlightMode::Posctl
        )
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlightMode::Unknown => "UNKNOWN",
            FlightMode::Ready => "READY",
            FlightMode::Takeoff => "TAKEOFF",
            FlightMode::Hold => "HOLD",
            FlightMode::Mission => "MISSION",
            FlightMode::ReturnToLaunch => "RETURN_TO_LAUNCH",
            FlightMode::Land => "LAND",
            FlightMode::Offboard => "OFFBOARD",
            FlightMode::FollowMe => "FOLLOW_ME",
            FlightMode::Manual => "MANUAL",
            FlightMode::Altctl => "ALTCTL",
            FlightMode::Posctl => "POSCTL",
            FlightMode::Acro => "ACRO",
            FlightMode::Stabilized => "STABILIZED",
        };
        f.write_str(name)
    }
}

/// One consistent read of vehicle state, taken once per control cycle.
///
/// Every reading is optional: a sub-reading the link could not produce is
/// `None` and is treated as *unknown* by every downstream decision.  A
/// snapshot is never mutated after capture; the next cycle replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Monotonic capture counter assigned by the link.
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
    pub position: Option<Position>,
    pub velocity_ned: Option<VelocityNed>,
    pub attitude: Option<Attitude>,
    pub battery: Option<Battery>,
    pub flight_mode: Option<FlightMode>,
    pub gps: Option<GpsInfo>,
    pub health: Option<Health>,
    pub in_air: Option<bool>,
    pub armed: Option<bool>,
}

impl TelemetrySnapshot {
    /// A snapshot with every reading absent.
    pub fn empty(seq: u64) -> Self {
        Self {
            seq,
            captured_at: Utc::now(),
            position: None,
            velocity_ned: None,
            attitude: None,
            battery: None,
            flight_mode: None,
            gps: None,
            health: None,
            in_air: None,
            armed: None,
        }
    }

    pub fn relative_altitude_m(&self) -> Option<f64> {
        self.position.map(|p| p.relative_altitude_m)
    }

    pub fn global_position_ok(&self) -> Option<bool> {
        self.health.and_then(|h| h.global_position_ok)
    }

    pub fn home_position_ok(&self) -> Option<bool> {
        self.health.and_then(|h| h.home_position_ok)
    }
}

/// The closed set of actions the advisory oracle may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Takeoff,
    Arm,
    Disarm,
    Goto,
    Land,
    ReturnToLaunch,
    Hold,
    Error,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionKind::Takeoff => "takeoff",
            ActionKind::Arm => "arm",
            ActionKind::Disarm => "disarm",
            ActionKind::Goto => "goto",
            ActionKind::Land => "land",
            ActionKind::ReturnToLaunch => "rtl",
            ActionKind::Hold => "hold",
            ActionKind::Error => "error",
        };
        f.write_str(label)
    }
}

/// One action proposed by the oracle for the current cycle.
///
/// Parameters stay optional here: the oracle is untrusted and may omit them.
/// Whether a missing parameter is acceptable is decided by the precondition
/// gate, not by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProposedAction {
    Takeoff {
        altitude_m: Option<f64>,
    },
    Arm,
    Disarm,
    Goto {
        latitude_deg: Option<f64>,
        longitude_deg: Option<f64>,
        altitude_m: Option<f64>,
    },
    Land,
    #[serde(rename = "rtl")]
    ReturnToLaunch,
    Hold {
        reason: String,
    },
    Error {
        message: String,
    },
}

impl ProposedAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            ProposedAction::Takeoff { .. } => ActionKind::Takeoff,
            ProposedAction::Arm => ActionKind::Arm,
            ProposedAction::Disarm => ActionKind::Disarm,
            ProposedAction::Goto { .. } => ActionKind::Goto,
            ProposedAction::Land => ActionKind::Land,
            ProposedAction::ReturnToLaunch => ActionKind::ReturnToLaunch,
            ProposedAction::Hold { .. } => ActionKind::Hold,
            ProposedAction::Error { .. } => ActionKind::Error,
        }
    }

    /// Shorthand for a hold with the given reason.
    pub fn hold(reason: impl Into<String>) -> Self {
        ProposedAction::Hold {
            reason: reason.into(),
        }
    }

    /// Shorthand for an error action with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        ProposedAction::Error {
            message: message.into(),
        }
    }
}

/// State of the single outstanding vehicle maneuver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    Arming,
    TakingOff,
    InAir,
    GoingToTarget,
    AtTarget,
    Landing,
    OnGround,
    ReturningToLaunch,
    Holding,
    Disarmed,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::Arming => "arming",
            ExecutorState::TakingOff => "taking_off",
            ExecutorState::InAir => "in_air",
            ExecutorState::GoingToTarget => "going_to_location",
            ExecutorState::AtTarget => "at_target",
            ExecutorState::Landing => "landing",
            ExecutorState::OnGround => "on_ground",
            ExecutorState::ReturningToLaunch => "returning_to_launch",
            ExecutorState::Holding => "holding",
            ExecutorState::Disarmed => "disarmed",
        };
        f.write_str(label)
    }
}

/// Global error type spanning vehicle-link failures, rejected commands and
/// maneuver outcomes.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkyError {
    #[error("Vehicle connection failed: {0}")]
    Connection(String),

    #[error("Vehicle rejected {command}: {details}")]
    CommandRejected { command: String, details: String },

    #[error("{maneuver} timed out after {secs:.1}s")]
    Timeout { maneuver: String, secs: f64 },

    #[error("{maneuver} interrupted: flight mode changed to {flight_mode}")]
    Interrupted {
        maneuver: String,
        flight_mode: FlightMode,
    },

    #[error("Telemetry unavailable: {0}")]
    TelemetryUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_reports_everything_unknown() {
        let snap = TelemetrySnapshot::empty(7);
        assert_eq!(snap.seq, 7);
        assert_eq!(snap.relative_altitude_m(), None);
        assert_eq!(snap.global_position_ok(), None);
        assert_eq!(snap.home_position_ok(), None);
        assert_eq!(snap.armed, None);
    }

    #[test]
    fn partial_health_keeps_missing_flags_unknown() {
        let mut snap = TelemetrySnapshot::empty(1);
        snap.health = Some(Health {
            global_position_ok: Some(true),
            ..Health::default()
        });
        assert_eq!(snap.global_position_ok(), Some(true));
        assert_eq!(snap.home_position_ok(), None);
    }

    #[test]
    fn snapshot_serializes_absent_readings_as_null() {
        let snap = TelemetrySnapshot::empty(3);
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json["battery"].is_null());
        assert!(json["in_air"].is_null());
    }

    #[test]
    fn proposed_action_serializes_with_action_tag() {
        let json = serde_json::to_string(&ProposedAction::Takeoff {
            altitude_m: Some(10.0),
        })
        .unwrap();
        assert!(json.contains(r#""action":"takeoff""#));
        assert!(json.contains(r#""altitude_m":10.0"#));

        let rtl = serde_json::to_string(&ProposedAction::ReturnToLaunch).unwrap();
        assert_eq!(rtl, r#"{"action":"rtl"}"#);
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(ProposedAction::Arm.kind(), ActionKind::Arm);
        assert_eq!(ProposedAction::hold("x").kind(), ActionKind::Hold);
        assert_eq!(ProposedAction::error("x").kind(), ActionKind::Error);
        assert_eq!(ActionKind::ReturnToLaunch.to_string(), "rtl");
    }

    #[test]
    fn guided_modes() {
        assert!(FlightMode::Hold.is_guided());
        assert!(FlightMode::Posctl.is_guided());
        assert!(!FlightMode::ReturnToLaunch.is_guided());
        assert!(!FlightMode::Manual.is_guided());
    }

    #[test]
    fn flight_mode_serde_uses_autopilot_names() {
        let json = serde_json::to_string(&FlightMode::ReturnToLaunch).unwrap();
        assert_eq!(json, r#""RETURN_TO_LAUNCH""#);
        assert_eq!(FlightMode::ReturnToLaunch.to_string(), "RETURN_TO_LAUNCH");
    }

    #[test]
    fn sky_error_display() {
        let err = SkyError::CommandRejected {
            command: "arm".to_string(),
            details: "pre-arm checks failed".to_string(),
        };
        assert!(err.to_string().contains("pre-arm checks failed"));

        let err = SkyError::Interrupted {
            maneuver: "goto".to_string(),
            flight_mode: FlightMode::Manual,
        };
        assert!(err.to_string().contains("MANUAL"));
    }
}
