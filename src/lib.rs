//! Closed-loop laser power control driven by live image analysis.
//!
//! An analysis loop turns camera frames into a scalar activity estimate, a fixed-period
//! control loop feeds that estimate to a controller, and the controller's command is
//! applied to the laser. [`coordinator::Coordinator`] wires and runs the two loops.

pub mod component_a;
pub mod component_b;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod utils;
