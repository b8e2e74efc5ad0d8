//! `skyloop-kernel` – Safety Authority
//!
//! The pure decision layer of skyloop.  It never talks to the vehicle and
//! never calls the oracle; it only judges.
//!
//! # Modules
//!
//! - [`action_gate`] – [`gate`][action_gate::gate]: the single interception
//!   point every [`ProposedAction`][skyloop_types::ProposedAction] must pass
//!   before the executor may issue it.  Returns a
//!   [`GateDecision`][action_gate::GateDecision]: allow, deny with a reason,
//!   or substitute an arm for a takeoff that arrived too early.
//! - [`geo`] – great-circle distance and the arrival predicate used to decide
//!   when a goto maneuver has reached its target.

pub mod action_gate;
pub mod geo;

pub use action_gate::{GateDecision, gate};
pub use geo::{EARTH_RADIUS_M, arrived, haversine_m};
