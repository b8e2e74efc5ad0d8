//! In-process quadrotor simulator for headless runs and tests.
//!
//! [`SimVehicle`] implements [`VehicleLink`] with a coarse kinematic model:
//! constant climb, cruise and descent rates, instantaneous mode changes and a
//! linear battery drain while armed.  Time is measured with
//! [`tokio::time::Instant`], so tests running on a paused runtime advance the
//! simulation deterministically through `tokio::time::sleep`.
//!
//! Every command issued is appended to a log (see
//! [`SimVehicle::command_log`]) whether or not the vehicle accepted it, and a
//! handful of faults can be injected to exercise failure paths.
//!
//! # Example
//!
//! ```rust
//! use skyloop_hal::{SimConfig, SimVehicle, VehicleCommand, VehicleLink};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sim = SimVehicle::new(SimConfig::default());
//! sim.arm().await.expect("sim arm must succeed");
//! assert_eq!(sim.command_log(), vec![VehicleCommand::Arm]);
//! # }
//! ```

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use skyloop_kernel::haversine_m;
use skyloop_types::{
    Attitude, Battery, FlightMode, GpsInfo, Health, Position, SkyError, TelemetrySnapshot,
    VelocityNed,
};
use tokio::time::Instant;
use tracing::debug;

use crate::link::VehicleLink;

/// Within this horizontal distance the simulator snaps onto its target.
const SNAP_DISTANCE_M: f64 = 0.05;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Kinematic parameters of the simulated airframe.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub home_latitude_deg: f64,
    pub home_longitude_deg: f64,
    pub climb_rate_m_s: f64,
    pub cruise_speed_m_s: f64,
    pub descent_rate_m_s: f64,
    pub battery_drain_pct_per_min: f64,
    /// Time after creation before the GPS reports a usable global position.
    pub gps_warmup: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            home_latitude_deg: 47.397742,
            home_longitude_deg: 8.545594,
            climb_rate_m_s: 3.0,
            cruise_speed_m_s: 10.0,
            descent_rate_m_s: 2.0,
            battery_drain_pct_per_min: 2.0,
            gps_warmup: Duration::ZERO,
        }
    }
}

/// One command as received by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleCommand {
    Arm,
    Disarm,
    Takeoff {
        altitude_m: f64,
    },
    Goto {
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
    },
    Land,
    ReturnToLaunch,
    Hold,
    Kill,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Motion {
    Climb { altitude_m: f64 },
    Goto { lat: f64, lon: f64, altitude_m: f64 },
    Descend,
    Return,
}

struct SimState {
    seq: u64,
    created: Instant,
    last_update: Instant,
    armed: bool,
    in_air: bool,
    lat: f64,
    lon: f64,
    alt: f64,
    velocity: VelocityNed,
    mode: FlightMode,
    motion: Option<Motion>,
    battery_pct: f64,
    reject_arm: bool,
    reject_rtl: bool,
    telemetry_down: bool,
    log: Vec<VehicleCommand>,
}

// ────────────────────────────────────────────────────────────────────────────
// SimVehicle
// ────────────────────────────────────────────────────────────────────────────

/// A simulated multirotor behind the [`VehicleLink`] trait.
pub struct SimVehicle {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl SimVehicle {
    /// Create a disarmed vehicle sitting on its home position.
    pub fn new(config: SimConfig) -> Self {
        let now = Instant::now();
        let state = SimState {
            seq: 0,
            created: now,
            last_update: now,
            armed: false,
            in_air: false,
            lat: config.home_latitude_deg,
            lon: config.home_longitude_deg,
            alt: 0.0,
            velocity: VelocityNed {
                north_m_s: 0.0,
                east_m_s: 0.0,
                down_m_s: 0.0,
            },
            mode: FlightMode::Ready,
            motion: None,
            battery_pct: 100.0,
            reject_arm: false,
            reject_rtl: false,
            telemetry_down: false,
            log: Vec::new(),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Every command received so far, oldest first.
    pub fn command_log(&self) -> Vec<VehicleCommand> {
        self.lock().log.clone()
    }

    /// Make `arm` fail as if pre-arm checks were not passing.
    pub fn set_reject_arm(&self, reject: bool) {
        self.lock().reject_arm = reject;
    }

    /// Make `return_to_launch` fail.
    pub fn set_reject_rtl(&self, reject: bool) {
        self.lock().reject_rtl = reject;
    }

    /// Make `capture_telemetry` fail.
    pub fn set_telemetry_down(&self, down: bool) {
        self.lock().telemetry_down = down;
    }

    /// Switch flight mode behind the executor's back, as an RC pilot taking
    /// over would.  Any maneuver in progress stops.
    pub fn force_flight_mode(&self, mode: FlightMode) {
        let mut s = self.lock();
        self.step(&mut s);
        s.mode = mode;
        s.motion = None;
    }

    pub fn set_battery_percent(&self, percent: u8) {
        let mut s = self.lock();
        self.step(&mut s);
        s.battery_pct = f64::from(percent.min(100));
    }

    // The lock is never held across an await point.
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `cmd`, bring the physics up to date and return the state.
    fn command(&self, cmd: VehicleCommand) -> MutexGuard<'_, SimState> {
        debug!(command = ?cmd, "sim vehicle received command");
        let mut s = self.lock();
        self.step(&mut s);
        s.log.push(cmd);
        s
    }

    /// Advance the kinematic model to now.
    fn step(&self, s: &mut SimState) {
        let now = Instant::now();
        let dt = now.duration_since(s.last_update).as_secs_f64();
        s.last_update = now;
        if dt <= 0.0 {
            return;
        }
        if s.armed {
            s.battery_pct = (s.battery_pct - self.config.battery_drain_pct_per_min * dt / 60.0).max(0.0);
        }

        let (start_lat, start_lon, start_alt) = (s.lat, s.lon, s.alt);
        match s.motion {
            Some(Motion::Climb { altitude_m }) => {
                s.alt = approach(s.alt, altitude_m, self.config.climb_rate_m_s * dt);
                s.in_air = s.alt > 0.0;
                if s.alt >= altitude_m {
                    s.motion = None;
                    s.mode = FlightMode::Hold;
                }
            }
            Some(Motion::Goto {
                lat,
                lon,
                altitude_m,
            }) => {
                let horizontal_done = self.fly_towards(s, lat, lon, dt);
                s.alt = approach(s.alt, altitude_m, self.config.climb_rate_m_s * dt);
                if horizontal_done && s.alt == altitude_m {
                    s.motion = None;
                }
            }
            Some(Motion::Descend) => self.descend(s, dt),
            Some(Motion::Return) => {
                let (home_lat, home_lon) =
                    (self.config.home_latitude_deg, self.config.home_longitude_deg);
                if self.fly_towards(s, home_lat, home_lon, dt) {
                    self.descend(s, dt);
                }
            }
            None => {}
        }

        // Rough NED velocity from the displacement over this step.
        let north = haversine_m(start_lat, start_lon, s.lat, start_lon) * (s.lat - start_lat).signum();
        let east = haversine_m(s.lat, start_lon, s.lat, s.lon) * (s.lon - start_lon).signum();
        s.velocity = VelocityNed {
            north_m_s: north / dt,
            east_m_s: east / dt,
            down_m_s: (start_alt - s.alt) / dt,
        };
    }

    /// Move horizontally towards the target; `true` once it is reached.
    fn fly_towards(&self, s: &mut SimState, lat: f64, lon: f64, dt: f64) -> bool {
        let distance = haversine_m(s.lat, s.lon, lat, lon);
        let step = self.config.cruise_speed_m_s * dt;
        if distance <= step.max(SNAP_DISTANCE_M) {
            s.lat = lat;
            s.lon = lon;
            true
        } else {
            let fraction = step / distance;
            s.lat += (lat - s.lat) * fraction;
            s.lon += (lon - s.lon) * fraction;
            false
        }
    }

    fn descend(&self, s: &mut SimState, dt: f64) {
        s.alt = approach(s.alt, 0.0, self.config.descent_rate_m_s * dt);
        if s.alt <= 0.0 {
            s.alt = 0.0;
            s.in_air = false;
            s.motion = None;
        }
    }

    fn snapshot(&self, s: &mut SimState) -> TelemetrySnapshot {
        s.seq += 1;
        let gps_ready = s.created.elapsed() >= self.config.gps_warmup;
        TelemetrySnapshot {
            seq: s.seq,
            captured_at: Utc::now(),
            position: Some(Position {
                latitude_deg: s.lat,
                longitude_deg: s.lon,
                relative_altitude_m: s.alt,
            }),
            velocity_ned: Some(s.velocity),
            attitude: Some(Attitude {
                roll_deg: 0.0,
                pitch_deg: 0.0,
                yaw_deg: 0.0,
            }),
            battery: Some(Battery {
                remaining_percent: s.battery_pct.round() as u8,
                voltage_v: 10.5 + 2.1 * s.battery_pct / 100.0,
            }),
            flight_mode: Some(s.mode),
            gps: Some(GpsInfo {
                num_satellites: if gps_ready { 10 } else { 3 },
                fix_type: if gps_ready { 3 } else { 1 },
            }),
            health: Some(Health {
                armable: Some(!s.reject_arm && gps_ready),
                global_position_ok: Some(gps_ready),
                local_position_ok: Some(true),
                home_position_ok: Some(gps_ready),
            }),
            in_air: Some(s.in_air),
            armed: Some(s.armed),
        }
    }
}

fn approach(current: f64, target: f64, max_step: f64) -> f64 {
    if (target - current).abs() <= max_step {
        target
    } else {
        current + max_step.copysign(target - current)
    }
}

fn rejected(command: &str, details: &str) -> SkyError {
    SkyError::CommandRejected {
        command: command.to_string(),
        details: details.to_string(),
    }
}

#[async_trait]
impl VehicleLink for SimVehicle {
    async fn capture_telemetry(&self) -> Result<TelemetrySnapshot, SkyError> {
        let mut s = self.lock();
        if s.telemetry_down {
            return Err(SkyError::TelemetryUnavailable(
                "simulated telemetry outage".to_string(),
            ));
        }
        self.step(&mut s);
        Ok(self.snapshot(&mut s))
    }

    async fn arm(&self) -> Result<(), SkyError> {
        let mut s = self.command(VehicleCommand::Arm);
        if s.reject_arm {
            return Err(rejected("arm", "pre-arm checks failed"));
        }
        if s.in_air {
            return Err(rejected("arm", "vehicle is in the air"));
        }
        s.armed = true;
        Ok(())
    }

    async fn disarm(&self) -> Result<(), SkyError> {
        let mut s = self.command(VehicleCommand::Disarm);
        if s.in_air {
            return Err(rejected("disarm", "vehicle is in the air"));
        }
        s.armed = false;
        Ok(())
    }

    async fn takeoff(&self, altitude_m: f64) -> Result<(), SkyError> {
        let mut s = self.command(VehicleCommand::Takeoff { altitude_m });
        if !s.armed {
            return Err(rejected("takeoff", "vehicle is not armed"));
        }
        if s.in_air {
            return Err(rejected("takeoff", "vehicle is already in the air"));
        }
        s.mode = FlightMode::Takeoff;
        s.motion = Some(Motion::Climb { altitude_m });
        Ok(())
    }

    async fn goto_location(
        &self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
        _yaw_deg: f64,
    ) -> Result<(), SkyError> {
        let mut s = self.command(VehicleCommand::Goto {
            latitude_deg,
            longitude_deg,
            altitude_m,
        });
        if !s.armed || !s.in_air {
            return Err(rejected("goto", "vehicle is not flying"));
        }
        s.mode = FlightMode::Hold;
        s.motion = Some(Motion::Goto {
            lat: latitude_deg,
            lon: longitude_deg,
            altitude_m,
        });
        Ok(())
    }

    async fn land(&self) -> Result<(), SkyError> {
        let mut s = self.command(VehicleCommand::Land);
        if !s.in_air {
            return Err(rejected("land", "vehicle is not in the air"));
        }
        s.mode = FlightMode::Land;
        s.motion = Some(Motion::Descend);
        Ok(())
    }

    async fn return_to_launch(&self) -> Result<(), SkyError> {
        let mut s = self.command(VehicleCommand::ReturnToLaunch);
        if s.reject_rtl {
            return Err(rejected("return_to_launch", "simulated RTL failure"));
        }
        if !s.in_air {
            return Err(rejected("return_to_launch", "vehicle is not in the air"));
        }
        s.mode = FlightMode::ReturnToLaunch;
        s.motion = Some(Motion::Return);
        Ok(())
    }

    async fn hold(&self) -> Result<(), SkyError> {
        let mut s = self.command(VehicleCommand::Hold);
        s.mode = FlightMode::Hold;
        s.motion = None;
        Ok(())
    }

    async fn kill(&self) -> Result<(), SkyError> {
        let mut s = self.command(VehicleCommand::Kill);
        s.armed = false;
        s.in_air = false;
        s.alt = 0.0;
        s.motion = None;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
