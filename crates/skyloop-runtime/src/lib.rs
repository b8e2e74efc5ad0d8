//! `skyloop-runtime` – The Advisory Control Loop
//!
//! Everything that runs between "the vehicle is connected" and "the process
//! exits".
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`][control_loop::ControlLoop]: the
//!   Observe–Advise–Gate–Act cycle and the once-only shutdown failsafe.
//! - [`executor`] – [`ActionExecutor`][executor::ActionExecutor]: the only
//!   component that commands the vehicle.  Monitors long maneuvers against
//!   telemetry and tracks an [`ExecutorState`][skyloop_types::ExecutorState].
//! - [`oracle`] – the [`Oracle`][oracle::Oracle] trait and
//!   [`OllamaOracle`][oracle::OllamaOracle], which asks a local
//!   [Ollama](https://ollama.com) model for the next action and normalises
//!   whatever comes back into a [`ProposedAction`][skyloop_types::ProposedAction].
//! - [`mailbox`] – [`CommandMailbox`][mailbox::CommandMailbox]: the
//!   last-write-wins slot holding the operator's latest command.
//! - [`operator_input`] – background listener moving typed lines into the
//!   mailbox without ever blocking the loop.
//! - [`observability`] – [`init_tracing`][observability::init_tracing]:
//!   console logging plus optional OTLP span export.
//!
//! # Gating
//!
//! No proposal reaches the vehicle without passing
//! [`skyloop_kernel::gate`]; [`GateDecision`] is re-exported here for
//! callers inspecting cycle outcomes.

pub mod control_loop;
pub mod executor;
pub mod mailbox;
pub mod observability;
pub mod operator_input;
pub mod oracle;

pub use control_loop::{ControlLoop, ControlLoopConfig, CycleOutcome, FailsafeOutcome, Recovery};
pub use executor::{ActionExecutor, ExecutorConfig, ManeuverTimeouts};
pub use mailbox::{CommandMailbox, DEFAULT_COMMAND};
pub use observability::{TracerProviderGuard, init_tracing};
pub use operator_input::spawn_listener;
pub use oracle::{OllamaOracle, Oracle, OracleError};

pub use skyloop_kernel::GateDecision;
