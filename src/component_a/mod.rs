
// Component A: image analysis side.
// Frames arrive from a camera (pushed through a latest-frame slot or polled),
// the analysis loop feeds the newest one to the analyzer and tracks throughput.

pub mod frame;
pub mod frame_slot;
pub mod analyzer;
pub mod integrator;
pub mod analysis_loop;
pub mod camera;
