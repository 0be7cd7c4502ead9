// Whole-body motion: poses, named choreography and interpolation

pub mod choreography;
pub mod pose;
pub mod trajectory;

pub use choreography::{Choreography, PoseName, SequenceName, Side, Turn, Waypoint};
pub use pose::{ActuatorId, Pose};
pub use trajectory::{Trajectory, interpolate};
