//! [`ControlLoop`] – the periodic Observe–Advise–Gate–Act cycle.
//!
//! Each cycle:
//!
//! 1. **Observe** – capture one [`TelemetrySnapshot`]; a failed capture
//!    skips the rest of the cycle.
//! 2. **Advise** – read the operator command from the [`CommandMailbox`] and
//!    ask the [`Oracle`] for a [`ProposedAction`].
//! 3. **Gate** – check the proposal against the snapshot with
//!    [`skyloop_kernel::gate`].
//! 4. **Act** – hand the decision to the [`ActionExecutor`]: execute it,
//!    hold with the denial reason, or arm in place of a premature takeoff.
//!
//! Cycles run back to back with a fixed pause in between, so a long
//! maneuver delays the next cycle rather than overlapping it.
//!
//! # Shutdown failsafe
//!
//! However [`ControlLoop::run`] ends (stop signal, run duration, or the
//! caller dropping the run future and calling [`ControlLoop::failsafe`]
//! itself), the failsafe sequence runs exactly once: a vehicle still armed
//! in the air returns to launch (landing in place if that fails), then it
//! is disarmed and the motors are cut.

use std::time::Duration;

use skyloop_kernel::{GateDecision, gate};
use skyloop_types::{ActionKind, ProposedAction, SkyError, TelemetrySnapshot};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::executor::ActionExecutor;
use crate::mailbox::CommandMailbox;
use crate::oracle::Oracle;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`ControlLoop`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlLoopConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub update_interval: Duration,
    /// Stop after this long; `None` runs until a stop is requested.
    pub run_duration: Option<Duration>,
    /// Bound on each of the failsafe's RTL and land attempts.
    pub failsafe_wait: Duration,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(3),
            run_duration: None,
            failsafe_wait: Duration::from_secs(120),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// What one cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No telemetry this cycle; nothing was proposed or executed.
    Skipped { reason: String },
    /// The gate allowed the action and the executor completed it.
    Executed(ActionKind),
    /// The gate refused the action; the executor was asked to hold.
    Denied { reason: String },
    /// A takeoff was proposed while disarmed; the vehicle was armed instead.
    ArmSubstituted,
    /// The executor reported an error for `action`.
    Failed { action: ActionKind, error: SkyError },
}

/// How the failsafe got the vehicle down, if it needed to.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// Not armed and airborne (or unknown), so no recovery was attempted.
    NotNeeded,
    ReturnedToLaunch,
    /// RTL failed; landing in place succeeded.
    Landed,
    /// Both RTL and land failed; the land error is kept.
    Failed(SkyError),
}

/// Result of [`ControlLoop::failsafe`].
#[derive(Debug, Clone, PartialEq)]
pub enum FailsafeOutcome {
    /// The failsafe had already run; nothing was commanded.
    AlreadyRan,
    Completed {
        recovery: Recovery,
        /// Error from the final disarm / kill step, if any.
        shutdown_error: Option<SkyError>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ─────────────────────────────────────────────────────────────────────────────

/// Drives the vehicle from operator commands through the oracle.
pub struct ControlLoop {
    executor: ActionExecutor,
    oracle: Box<dyn Oracle>,
    mailbox: CommandMailbox,
    config: ControlLoopConfig,
    /// Altitude of a takeoff replaced by an arm, offered to the next cycle.
    deferred_takeoff_m: Option<f64>,
    failsafe_done: bool,
    started: Instant,
    cycles: u64,
}

impl ControlLoop {
    pub fn new(
        executor: ActionExecutor,
        oracle: Box<dyn Oracle>,
        mailbox: CommandMailbox,
        config: ControlLoopConfig,
    ) -> Self {
        Self {
            executor,
            oracle,
            mailbox,
            config,
            deferred_takeoff_m: None,
            failsafe_done: false,
            started: Instant::now(),
            cycles: 0,
        }
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one full cycle.  Never fails: every problem is logged and
    /// reflected in the returned [`CycleOutcome`].
    pub async fn cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;

        // ── 1. Observe ────────────────────────────────────────────────────────
        let snapshot = match self.executor.capture().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "telemetry capture failed; skipping cycle");
                return CycleOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };
        self.executor.reconcile(&snapshot);
        self.log_telemetry(&snapshot);

        // ── 2. Advise ─────────────────────────────────────────────────────────
        let command = self.mailbox.read();
        let proposed = self.oracle.advise(&snapshot, &command).await;
        let proposed = self.apply_deferred_takeoff(proposed);
        info!(
            command = %command,
            suggestion = %serde_json::to_string(&proposed).unwrap_or_else(|_| format!("{proposed:?}")),
            "oracle suggestion"
        );

        // ── 3. Gate ───────────────────────────────────────────────────────────
        let decision = gate(&proposed, &snapshot);

        // ── 4. Act ────────────────────────────────────────────────────────────
        match decision {
            GateDecision::Allow(action) => {
                let kind = action.kind();
                match self.executor.execute(&action).await {
                    Ok(()) => CycleOutcome::Executed(kind),
                    Err(e) => {
                        warn!(action = %kind, error = %e, "action failed");
                        CycleOutcome::Failed { action: kind, error: e }
                    }
                }
            }
            GateDecision::Deny { reason } => {
                warn!(reason = %reason, "action denied");
                if let Err(e) = self.executor.hold(&reason).await {
                    warn!(error = %e, "hold after denial failed");
                }
                CycleOutcome::Denied { reason }
            }
            GateDecision::SubstituteArm { deferred } => {
                info!("takeoff requested while disarmed; arming first");
                if let ProposedAction::Takeoff { altitude_m } = deferred {
                    self.deferred_takeoff_m = altitude_m;
                }
                match self.executor.arm().await {
                    Ok(()) => CycleOutcome::ArmSubstituted,
                    Err(e) => {
                        self.deferred_takeoff_m = None;
                        CycleOutcome::Failed {
                            action: ActionKind::Arm,
                            error: e,
                        }
                    }
                }
            }
        }
    }

    /// Cycle until `shutdown` turns `true` or the run duration elapses, then
    /// run the failsafe.
    ///
    /// A stop request cancels an in-progress maneuver; the failsafe then
    /// takes over.  If the sender behind `shutdown` is dropped without
    /// requesting a stop, the loop keeps running.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> FailsafeOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("control_loop", %run_id);
        async move {
            self.started = Instant::now();
            let deadline = self
                .config
                .run_duration
                .and_then(|d| self.started.checked_add(d));
            info!(
                update_interval_secs = self.config.update_interval.as_secs_f64(),
                run_duration_secs = self.config.run_duration.map(|d| d.as_secs_f64()),
                "control loop started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut shutdown) => {
                        info!("stop requested");
                        break;
                    }
                    _ = until(deadline) => {
                        info!("run duration reached");
                        break;
                    }
                    outcome = self.cycle() => debug!(?outcome, "cycle finished"),
                }
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut shutdown) => {
                        info!("stop requested");
                        break;
                    }
                    _ = until(deadline) => {
                        info!("run duration reached");
                        break;
                    }
                    _ = tokio::time::sleep(self.config.update_interval) => {}
                }
            }

            info!(cycles = self.cycles, "control loop finished");
            self.failsafe().await
        }
        .instrument(span)
        .await
    }

    /// Bring the vehicle to a safe state.  Runs once; later calls return
    /// [`FailsafeOutcome::AlreadyRan`] without commanding anything.
    ///
    /// Unreadable armed / in-air state is treated as "not airborne", and the
    /// disarm / kill step is attempted regardless of how recovery went.
    pub async fn failsafe(&mut self) -> FailsafeOutcome {
        if self.failsafe_done {
            debug!("failsafe already ran");
            return FailsafeOutcome::AlreadyRan;
        }
        self.failsafe_done = true;
        info!("running shutdown failsafe");

        let (armed, in_air) = match self.executor.capture().await {
            Ok(s) => (s.armed.unwrap_or(false), s.in_air.unwrap_or(false)),
            Err(e) => {
                warn!(error = %e, "vehicle state unreadable during failsafe; assuming on ground");
                (false, false)
            }
        };

        let recovery = if armed && in_air {
            self.recover().await
        } else {
            Recovery::NotNeeded
        };

        let shutdown_error = match self.disarm_and_kill().await {
            Ok(()) => {
                info!("vehicle disarmed and motors stopped");
                None
            }
            Err(e) => {
                error!(error = %e, "final disarm / kill failed");
                Some(e)
            }
        };

        FailsafeOutcome::Completed {
            recovery,
            shutdown_error,
        }
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    /// A takeoff without an altitude inherits the one deferred by an arm
    /// substitution in the previous cycle.  The memory lasts one cycle.
    fn apply_deferred_takeoff(&mut self, proposed: ProposedAction) -> ProposedAction {
        let deferred = self.deferred_takeoff_m.take();
        match proposed {
            ProposedAction::Takeoff { altitude_m: None } if deferred.is_some() => {
                debug!(altitude_m = ?deferred, "reusing deferred takeoff altitude");
                ProposedAction::Takeoff {
                    altitude_m: deferred,
                }
            }
            other => other,
        }
    }

    async fn recover(&mut self) -> Recovery {
        let wait = self.config.failsafe_wait;
        warn!("vehicle armed and airborne; returning to launch");
        match self.executor.return_to_launch_within(wait).await {
            Ok(()) => return Recovery::ReturnedToLaunch,
            Err(e) => warn!(error = %e, "failsafe RTL failed; landing in place"),
        }
        match self.executor.land_within(wait).await {
            Ok(()) => Recovery::Landed,
            Err(e) => {
                error!(error = %e, "failsafe land failed");
                Recovery::Failed(e)
            }
        }
    }

    async fn disarm_and_kill(&mut self) -> Result<(), SkyError> {
        self.executor.disarm().await?;
        self.executor.kill().await
    }

    fn log_telemetry(&self, s: &TelemetrySnapshot) {
        info!(
            seq = s.seq,
            elapsed_s = self.started.elapsed().as_secs(),
            state = %self.executor.state(),
            mode = %reading(s.flight_mode),
            armed = %reading(s.armed),
            in_air = %reading(s.in_air),
            alt_m = %reading(s.relative_altitude_m().map(|a| format!("{a:.1}"))),
            lat = %reading(s.position.map(|p| format!("{:.6}", p.latitude_deg))),
            lon = %reading(s.position.map(|p| format!("{:.6}", p.longitude_deg))),
            battery_pct = %reading(s.battery.map(|b| b.remaining_percent)),
            gps_fix = %reading(s.gps.map(|g| g.fix_type)),
            satellites = %reading(s.gps.map(|g| g.num_satellites)),
            "telemetry"
        );
    }
}

/// Display an optional reading, `N/A` when absent.
fn reading<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.to_string())
}

/// Resolves once a stop is requested; never resolves if the sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
