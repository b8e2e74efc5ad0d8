//! [`ActionExecutor`] – the only component that commands the vehicle.
//!
//! Each maneuver issues one command and then, for the long-running ones,
//! monitors telemetry until the maneuver completes, is interrupted, or its
//! timeout elapses.  The executor records where it believes the vehicle is
//! in an [`ExecutorState`]; the state only changes as a consequence of an
//! operation in this module.
//!
//! ```text
//! Idle ─arm→ Arming ─(telemetry: armed)→ OnGround ─takeoff→ TakingOff → InAir
//! InAir ─goto→ GoingToTarget → AtTarget | Holding
//! InAir ─land→ Landing → OnGround          InAir ─rtl→ ReturningToLaunch → OnGround
//! any ─hold→ Holding                       any ─disarm/kill→ Disarmed
//! ```
//!
//! On a timeout the executor makes a best-effort hold request, moves to
//! `Holding` and reports [`SkyError::Timeout`].

use std::sync::Arc;
use std::time::Duration;

use skyloop_hal::VehicleLink;
use skyloop_kernel::arrived;
use skyloop_types::{ExecutorState, FlightMode, ProposedAction, SkyError, TelemetrySnapshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Fraction of the requested altitude at which a takeoff counts as done.
pub const TAKEOFF_REACHED_FRACTION: f64 = 0.95;

/// Hold reason used when the oracle reports an error.
pub const INTERVENTION_REASON: &str = "LLM requested human intervention due to error.";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound on each monitored maneuver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManeuverTimeouts {
    pub takeoff: Duration,
    pub goto: Duration,
    pub land: Duration,
    pub rtl: Duration,
}

impl Default for ManeuverTimeouts {
    fn default() -> Self {
        Self {
            takeoff: Duration::from_secs(60),
            goto: Duration::from_secs(300),
            land: Duration::from_secs(120),
            rtl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorConfig {
    /// Delay between telemetry reads while monitoring a maneuver.
    pub poll_interval: Duration,
    pub timeouts: ManeuverTimeouts,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeouts: ManeuverTimeouts::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion predicates
// ─────────────────────────────────────────────────────────────────────────────

/// Verdict of one telemetry read during a maneuver.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Progress {
    Pending,
    Done,
    Interrupted(FlightMode),
}

/// `true` once relative altitude reaches 95 % of `target_m`.
pub fn takeoff_reached(snapshot: &TelemetrySnapshot, target_m: f64) -> bool {
    snapshot
        .relative_altitude_m()
        .is_some_and(|alt| alt >= target_m * TAKEOFF_REACHED_FRACTION)
}

/// `true` once telemetry positively reports the vehicle on the ground.
pub fn landed(snapshot: &TelemetrySnapshot) -> bool {
    snapshot.in_air == Some(false)
}

fn goto_progress(snapshot: &TelemetrySnapshot, lat: f64, lon: f64, alt: f64) -> Progress {
    if snapshot
        .position
        .is_some_and(|p| arrived(&p, lat, lon, alt))
    {
        return Progress::Done;
    }
    // An unknown mode is not evidence of an override.
    match snapshot.flight_mode {
        Some(mode) if !mode.is_guided() => Progress::Interrupted(mode),
        _ => Progress::Pending,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionExecutor
// ─────────────────────────────────────────────────────────────────────────────

/// Issues commands through a [`VehicleLink`] and tracks [`ExecutorState`].
pub struct ActionExecutor {
    vehicle: Arc<dyn VehicleLink>,
    state: ExecutorState,
    config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(vehicle: Arc<dyn VehicleLink>, config: ExecutorConfig) -> Self {
        Self {
            vehicle,
            state: ExecutorState::Idle,
            config,
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Read-only telemetry pass-through.
    pub async fn capture(&self) -> Result<TelemetrySnapshot, SkyError> {
        self.vehicle.capture_telemetry().await
    }

    /// Fold confirmed telemetry into the state.
    ///
    /// `Arming` is the only state that waits on telemetry rather than on a
    /// monitored maneuver: a confirmed arm moves it to `OnGround`, a
    /// confirmed disarm back to `Idle`.
    pub fn reconcile(&mut self, snapshot: &TelemetrySnapshot) {
        if self.state != ExecutorState::Arming {
            return;
        }
        match snapshot.armed {
            Some(true) => self.transition(ExecutorState::OnGround),
            Some(false) => {
                warn!("arm not confirmed by telemetry");
                self.transition(ExecutorState::Idle);
            }
            None => {}
        }
    }

    /// Carry out an action that has already passed the precondition gate.
    ///
    /// # Errors
    ///
    /// Whatever the underlying operation returns.
    pub async fn execute(&mut self, action: &ProposedAction) -> Result<(), SkyError> {
        match action {
            ProposedAction::Takeoff {
                altitude_m: Some(alt),
            } => self.takeoff(*alt).await,
            ProposedAction::Arm => self.arm().await,
            ProposedAction::Disarm => self.disarm().await,
            ProposedAction::Goto {
                latitude_deg: Some(lat),
                longitude_deg: Some(lon),
                altitude_m: Some(alt),
            } => self.goto_location(*lat, *lon, *alt).await,
            ProposedAction::Land => self.land().await,
            ProposedAction::ReturnToLaunch => self.return_to_launch().await,
            ProposedAction::Hold { reason } => self.hold(reason).await,
            ProposedAction::Error { message } => {
                error!(message = %message, "oracle reported an error; holding for operator");
                self.hold(INTERVENTION_REASON).await
            }
            ProposedAction::Takeoff { .. } | ProposedAction::Goto { .. } => {
                self.hold(&format!("{} is missing parameters", action.kind()))
                    .await
            }
        }
    }

    // ── Ground operations ────────────────────────────────────────────────────

    /// Send the arm command.  The state stays `Arming` until telemetry
    /// confirms it (see [`reconcile`](Self::reconcile)).
    pub async fn arm(&mut self) -> Result<(), SkyError> {
        self.transition(ExecutorState::Arming);
        if let Err(e) = self.vehicle.arm().await {
            warn!(error = %e, "arm failed");
            self.transition(ExecutorState::Idle);
            return Err(e);
        }
        info!("arm command accepted");
        Ok(())
    }

    pub async fn disarm(&mut self) -> Result<(), SkyError> {
        self.vehicle.disarm().await?;
        info!("disarmed");
        self.transition(ExecutorState::Disarmed);
        Ok(())
    }

    /// Cut the motors.
    pub async fn kill(&mut self) -> Result<(), SkyError> {
        self.vehicle.kill().await?;
        warn!("motors killed");
        self.transition(ExecutorState::Disarmed);
        Ok(())
    }

    // ── Monitored maneuvers ──────────────────────────────────────────────────

    /// Take off and wait until 95 % of `altitude_m` is reached.
    pub async fn takeoff(&mut self, altitude_m: f64) -> Result<(), SkyError> {
        let previous = self.state;
        self.transition(ExecutorState::TakingOff);
        if let Err(e) = self.vehicle.takeoff(altitude_m).await {
            self.transition(previous);
            return Err(e);
        }
        info!(altitude_m, "taking off");

        let timeout = self.config.timeouts.takeoff;
        self.monitor("takeoff", timeout, |snap| {
            if takeoff_reached(snap, altitude_m) {
                Progress::Done
            } else {
                Progress::Pending
            }
        })
        .await?;
        info!(altitude_m, "takeoff altitude reached");
        self.transition(ExecutorState::InAir);
        Ok(())
    }

    /// Fly to the target and wait for arrival (within 2 m horizontally and
    /// 1 m vertically).  If the flight mode leaves autonomous control on the
    /// way, the executor holds without commanding anything and reports
    /// [`SkyError::Interrupted`].
    pub async fn goto_location(
        &mut self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
    ) -> Result<(), SkyError> {
        let previous = self.state;
        self.transition(ExecutorState::GoingToTarget);
        if let Err(e) = self
            .vehicle
            .goto_location(latitude_deg, longitude_deg, altitude_m, 0.0)
            .await
        {
            self.transition(previous);
            return Err(e);
        }
        info!(latitude_deg, longitude_deg, altitude_m, "going to location");

        let timeout = self.config.timeouts.goto;
        self.monitor("goto", timeout, |snap| {
            goto_progress(snap, latitude_deg, longitude_deg, altitude_m)
        })
        .await?;
        info!("arrived at target");
        self.transition(ExecutorState::AtTarget);
        Ok(())
    }

    pub async fn land(&mut self) -> Result<(), SkyError> {
        self.land_within(self.config.timeouts.land).await
    }

    /// Land and wait up to `timeout` for touchdown.
    pub async fn land_within(&mut self, timeout: Duration) -> Result<(), SkyError> {
        let previous = self.state;
        self.transition(ExecutorState::Landing);
        if let Err(e) = self.vehicle.land().await {
            self.transition(previous);
            return Err(e);
        }
        info!("landing");
        self.monitor("land", timeout, landed_progress).await?;
        info!("landed");
        self.transition(ExecutorState::OnGround);
        Ok(())
    }

    pub async fn return_to_launch(&mut self) -> Result<(), SkyError> {
        self.return_to_launch_within(self.config.timeouts.rtl).await
    }

    /// Return to launch and wait up to `timeout` for touchdown.  A rejected
    /// RTL command is reported as-is; it is not retried.
    pub async fn return_to_launch_within(&mut self, timeout: Duration) -> Result<(), SkyError> {
        let previous = self.state;
        self.transition(ExecutorState::ReturningToLaunch);
        if let Err(e) = self.vehicle.return_to_launch().await {
            warn!(error = %e, "return to launch rejected");
            self.transition(previous);
            return Err(e);
        }
        info!("returning to launch");
        self.monitor("return to launch", timeout, landed_progress)
            .await?;
        info!("landed at launch");
        self.transition(ExecutorState::OnGround);
        Ok(())
    }

    /// Hold position.  The hold command is skipped when telemetry already
    /// shows the vehicle in the hold mode.
    pub async fn hold(&mut self, reason: &str) -> Result<(), SkyError> {
        info!(reason = %reason, "holding");
        let already_holding = match self.vehicle.capture_telemetry().await {
            Ok(snap) => snap.flight_mode == Some(FlightMode::Hold),
            Err(e) => {
                debug!(error = %e, "flight mode unknown before hold");
                false
            }
        };
        if !already_holding {
            self.vehicle.hold().await?;
        }
        self.transition(ExecutorState::Holding);
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn transition(&mut self, next: ExecutorState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "executor state");
            self.state = next;
        }
    }

    /// Poll telemetry until `progress` reports completion.
    ///
    /// Telemetry errors are logged and polling continues.  On interruption
    /// the state becomes `Holding` with no command issued; on timeout a hold
    /// is requested first.
    async fn monitor<F>(&mut self, maneuver: &str, timeout: Duration, mut progress: F) -> Result<(), SkyError>
    where
        F: FnMut(&TelemetrySnapshot) -> Progress,
    {
        // A timeout too large to represent never expires.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.vehicle.capture_telemetry().await {
                Ok(snap) => match progress(&snap) {
                    Progress::Done => return Ok(()),
                    Progress::Interrupted(flight_mode) => {
                        warn!(maneuver, %flight_mode, "maneuver interrupted by flight mode change");
                        self.transition(ExecutorState::Holding);
                        return Err(SkyError::Interrupted {
                            maneuver: maneuver.to_string(),
                            flight_mode,
                        });
                    }
                    Progress::Pending => {}
                },
                Err(e) => warn!(maneuver, error = %e, "telemetry unavailable while monitoring"),
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(maneuver, timeout_secs = timeout.as_secs_f64(), "maneuver timed out; holding");
                if let Err(e) = self.vehicle.hold().await {
                    warn!(error = %e, "hold after timeout failed");
                }
                self.transition(ExecutorState::Holding);
                return Err(SkyError::Timeout {
                    maneuver: maneuver.to_string(),
                    secs: timeout.as_secs_f64(),
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

fn landed_progress(snapshot: &TelemetrySnapshot) -> Progress {
    if landed(snapshot) {
        Progress::Done
    } else {
        Progress::Pending
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use skyloop_hal::{SimConfig, SimVehicle, VehicleCommand};
    use skyloop_types::Position;

    fn sim_executor() -> (Arc<SimVehicle>, ActionExecutor) {
        let sim = Arc::new(SimVehicle::new(SimConfig::default()));
        let executor = ActionExecutor::new(sim.clone(), ExecutorConfig::default());
        (sim, executor)
    }

    async fn airborne(altitude_m: f64) -> (Arc<SimVehicle>, ActionExecutor) {
        let (sim, mut executor) = sim_executor();
        executor.arm().await.unwrap();
        let snap = executor.capture().await.unwrap();
        executor.reconcile(&snap);
        executor.takeoff(altitude_m).await.unwrap();
        (sim, executor)
    }

    fn at(lat: f64, lon: f64, alt: f64) -> TelemetrySnapshot {
        let mut snap = TelemetrySnapshot::empty(1);
        snap.position = Some(Position {
            latitude_deg: lat,
            longitude_deg: lon,
            relative_altitude_m: alt,
        });
        snap
    }

    // ------------------------------------------------------------------ predicates

    #[test]
    fn takeoff_reached_at_95_percent() {
        assert!(!takeoff_reached(&at(0.0, 0.0, 9.4), 10.0));
        assert!(takeoff_reached(&at(0.0, 0.0, 9.5), 10.0));
        assert!(!takeoff_reached(&TelemetrySnapshot::empty(1), 10.0));
    }

    #[test]
    fn landed_requires_a_known_reading() {
        let mut snap = TelemetrySnapshot::empty(1);
        assert!(!landed(&snap));
        snap.in_air = Some(true);
        assert!(!landed(&snap));
        snap.in_air = Some(false);
        assert!(landed(&snap));
    }

    #[test]
    fn goto_progress_detects_mode_override_but_not_unknown_mode() {
        let mut snap = at(10.0, 10.0, 30.0);
        assert_eq!(goto_progress(&snap, 10.1, 10.0, 30.0), Progress::Pending);
        snap.flight_mode = Some(FlightMode::Posctl);
        assert_eq!(goto_progress(&snap, 10.1, 10.0, 30.0), Progress::Pending);
        snap.flight_mode = Some(FlightMode::Manual);
        assert_eq!(
            goto_progress(&snap, 10.1, 10.0, 30.0),
            Progress::Interrupted(FlightMode::Manual)
        );
        assert_eq!(goto_progress(&snap, 10.0, 10.0, 30.0), Progress::Done);
    }

    // ------------------------------------------------------------------ arming

    #[tokio::test(start_paused = true)]
    async fn arm_waits_for_telemetry_confirmation() {
        let (_sim, mut executor) = sim_executor();
        assert_eq!(executor.state(), ExecutorState::Idle);
        executor.arm().await.unwrap();
        assert_eq!(executor.state(), ExecutorState::Arming);

        let snap = executor.capture().await.unwrap();
        executor.reconcile(&snap);
        assert_eq!(executor.state(), ExecutorState::OnGround);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_arm_reverts_to_idle() {
        let (sim, mut executor) = sim_executor();
        sim.set_reject_arm(true);
        let err = executor.arm().await.unwrap_err();
        assert!(matches!(err, SkyError::CommandRejected { .. }));
        assert_eq!(executor.state(), ExecutorState::Idle);
    }

    #[test]
    fn reconcile_unconfirmed_arm_returns_to_idle() {
        let (_sim, mut executor) = sim_executor();
        executor.state = ExecutorState::Arming;
        let mut snap = TelemetrySnapshot::empty(1);
        executor.reconcile(&snap);
        assert_eq!(executor.state(), ExecutorState::Arming);
        snap.armed = Some(false);
        executor.reconcile(&snap);
        assert_eq!(executor.state(), ExecutorState::Idle);
    }

    // ------------------------------------------------------------------ maneuvers

    #[tokio::test(start_paused = true)]
    async fn takeoff_reaches_in_air() {
        let (_sim, executor) = airborne(10.0).await;
        assert_eq!(executor.state(), ExecutorState::InAir);
        let alt = executor.capture().await.unwrap().relative_altitude_m().unwrap();
        assert!(alt >= 9.5, "altitude {alt}");
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_never_expires() {
        let sim = Arc::new(SimVehicle::new(SimConfig::default()));
        let config = ExecutorConfig {
            timeouts: ManeuverTimeouts {
                takeoff: Duration::MAX,
                ..ManeuverTimeouts::default()
            },
            ..ExecutorConfig::default()
        };
        let mut executor = ActionExecutor::new(sim.clone(), config);
        executor.arm().await.unwrap();
        let snap = executor.capture().await.unwrap();
        executor.reconcile(&snap);

        executor.takeoff(10.0).await.expect("takeoff completes");
        assert_eq!(executor.state(), ExecutorState::InAir);
        assert!(!sim.command_log().contains(&VehicleCommand::Hold));
    }

    #[tokio::test(start_paused = true)]
    async fn takeoff_rejected_restores_previous_state() {
        let (_sim, mut executor) = sim_executor();
        let err = executor.takeoff(10.0).await.unwrap_err();
        assert!(matches!(err, SkyError::CommandRejected { .. }));
        assert_eq!(executor.state(), ExecutorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn takeoff_timeout_holds() {
        let sim = Arc::new(SimVehicle::new(SimConfig {
            climb_rate_m_s: 0.1,
            ..SimConfig::default()
        }));
        let mut executor = ActionExecutor::new(
            sim.clone(),
            ExecutorConfig {
                timeouts: ManeuverTimeouts {
                    takeoff: Duration::from_secs(5),
                    ..ManeuverTimeouts::default()
                },
                ..ExecutorConfig::default()
            },
        );
        executor.arm().await.unwrap();
        let err = executor.takeoff(50.0).await.unwrap_err();
        assert!(matches!(err, SkyError::Timeout { ref maneuver, .. } if maneuver == "takeoff"));
        assert_eq!(executor.state(), ExecutorState::Holding);
        assert_eq!(sim.command_log().last(), Some(&VehicleCommand::Hold));
    }

    #[tokio::test(start_paused = true)]
    async fn goto_arrives_at_target() {
        let (_sim, mut executor) = airborne(10.0).await;
        let home = executor.capture().await.unwrap().position.unwrap();
        // Roughly 200 m north.
        let target_lat = home.latitude_deg + 0.0018;
        executor
            .goto_location(target_lat, home.longitude_deg, 20.0)
            .await
            .unwrap();
        assert_eq!(executor.state(), ExecutorState::AtTarget);
    }

    #[tokio::test(start_paused = true)]
    async fn goto_interrupted_by_mode_change_holds_without_command() {
        let (sim, mut executor) = airborne(10.0).await;
        let home = executor.capture().await.unwrap().position.unwrap();

        let pilot = {
            let sim = sim.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                sim.force_flight_mode(FlightMode::Manual);
            })
        };
        let err = executor
            .goto_location(home.latitude_deg + 0.01, home.longitude_deg, 10.0)
            .await
            .unwrap_err();
        pilot.await.unwrap();

        assert!(matches!(
            err,
            SkyError::Interrupted {
                flight_mode: FlightMode::Manual,
                ..
            }
        ));
        assert_eq!(executor.state(), ExecutorState::Holding);
        assert!(matches!(sim.command_log().last(), Some(VehicleCommand::Goto { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn land_reaches_on_ground() {
        let (_sim, mut executor) = airborne(6.0).await;
        executor.land().await.unwrap();
        assert_eq!(executor.state(), ExecutorState::OnGround);
        assert_eq!(executor.capture().await.unwrap().in_air, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn rtl_flies_home_and_lands() {
        let (_sim, mut executor) = airborne(10.0).await;
        let home = executor.capture().await.unwrap().position.unwrap();
        executor
            .goto_location(home.latitude_deg + 0.001, home.longitude_deg, 10.0)
            .await
            .unwrap();
        executor.return_to_launch().await.unwrap();
        assert_eq!(executor.state(), ExecutorState::OnGround);
        let pos = executor.capture().await.unwrap().position.unwrap();
        assert!(arrived(&pos, home.latitude_deg, home.longitude_deg, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_rtl_is_not_retried() {
        let (sim, mut executor) = airborne(10.0).await;
        sim.set_reject_rtl(true);
        assert!(executor.return_to_launch().await.is_err());
        assert_eq!(executor.state(), ExecutorState::InAir);
        let rtl_attempts = sim
            .command_log()
            .iter()
            .filter(|c| **c == VehicleCommand::ReturnToLaunch)
            .count();
        assert_eq!(rtl_attempts, 1);
    }

    // ------------------------------------------------------------------ hold / execute

    #[tokio::test(start_paused = true)]
    async fn hold_skips_command_when_already_holding() {
        let (sim, mut executor) = airborne(10.0).await;
        // The sim switches to hold once the full takeoff altitude is reached.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let before = sim.command_log().len();
        executor.hold("nothing to do").await.unwrap();
        assert_eq!(sim.command_log().len(), before);
        assert_eq!(executor.state(), ExecutorState::Holding);
    }

    #[tokio::test(start_paused = true)]
    async fn hold_commands_hold_when_in_another_mode() {
        let (sim, mut executor) = sim_executor();
        executor.hold("waiting").await.unwrap();
        assert_eq!(sim.command_log(), vec![VehicleCommand::Hold]);
        assert_eq!(executor.state(), ExecutorState::Holding);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_error_action_holds() {
        let (sim, mut executor) = sim_executor();
        executor
            .execute(&ProposedAction::error("GPS lost"))
            .await
            .unwrap();
        assert_eq!(executor.state(), ExecutorState::Holding);
        assert_eq!(sim.command_log(), vec![VehicleCommand::Hold]);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_takeoff_without_altitude_holds() {
        let (sim, mut executor) = sim_executor();
        executor
            .execute(&ProposedAction::Takeoff { altitude_m: None })
            .await
            .unwrap();
        assert_eq!(executor.state(), ExecutorState::Holding);
        assert!(!sim.command_log().iter().any(|c| matches!(c, VehicleCommand::Takeoff { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn kill_disarms() {
        let (sim, mut executor) = airborne(5.0).await;
        executor.kill().await.unwrap();
        assert_eq!(executor.state(), ExecutorState::Disarmed);
        let snap = sim.capture_telemetry().await.unwrap();
        assert_eq!(snap.armed, Some(false));
    }
}
