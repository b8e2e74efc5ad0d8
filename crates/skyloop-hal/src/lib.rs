//! `skyloop-hal` – Vehicle Link Boundary
//!
//! The rest of skyloop never speaks to an autopilot directly.  It holds a
//! [`VehicleLink`] and calls its command primitives; transports implement
//! the trait.
//!
//! # Modules
//!
//! - [`link`] – the [`VehicleLink`] trait, [`connect`] (address → link) and
//!   [`wait_until_ready`], which blocks until the vehicle reports a usable
//!   global and home position.
//! - [`sim`] – [`SimVehicle`][sim::SimVehicle], a kinematic quadrotor used
//!   behind the `sim://` address and as the test fixture for the runtime.

pub mod link;
pub mod sim;

pub use link::{VehicleLink, connect, wait_until_ready};
pub use sim::{SimConfig, SimVehicle, VehicleCommand};
