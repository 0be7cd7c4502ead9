// Inertial sensing for the rolling shell
//
// Provides:
// - LSM6DS register-level driver over embedded-hal I2C
// - Windowed tilt classifier deciding which side is on the ground

pub mod classifier;
pub mod lsm6ds;

pub use classifier::{Classification, ClassifierConfig, Decision, OrientationClassifier, RawImuSample};
pub use lsm6ds::Lsm6ds;
