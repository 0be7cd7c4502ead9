// Motor control module for the quadroll leg servos
//
// Provides:
// - Calibration table (per-leg joint IDs and safe tick limits)
// - Degree/tick conversion and the clamped target rule
// - Dynamixel Protocol 2.0 serial implementation
// - High-level motor driver API

pub mod calibration;
mod driver;
pub mod dynamixel;
pub mod kinematics;

pub use calibration::{Axis, AxisLimits, Calibration, Direction, JointCalibration, Leg, LegCalibration};
pub use driver::MotorDriver;
pub use dynamixel::{DynamixelBus, DynamixelError};
pub use kinematics::{degrees_to_ticks, step_joint, target_for, ticks_to_degrees};
