pub mod config;
pub mod hardware;
pub mod imu;
pub mod messages;
pub mod motion;
pub mod motor;
pub mod runtime;
pub mod sequencer;
pub mod sim;
