
// Component B: laser control side.
// Drains the analyzer once per tick, runs the controller (PI, self-tuning PI,
// open-loop variants) and commands the laser.
pub mod controller;
pub mod self_tuning;
pub mod open_loop;
pub mod actuator;
pub mod control_loop;
