// Timeouts, topics, device defaults and the loadable robot configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::imu::classifier::ClassifierConfig;
use crate::motion::choreography::{GaitConfig, RecordedPoses, RollConfig};
use crate::motion::trajectory::DEFAULT_STEPS;
use crate::motor::calibration::Calibration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Upper bound on one bus or sensor transaction
pub const DEVICE_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD: &str = "quadroll/cmd"; // commands
pub const TOPIC_REPLY: &str = "quadroll/reply"; // per-command replies
pub const TOPIC_TELEMETRY: &str = "quadroll/state/telemetry"; // sequencer state
pub const TOPIC_HEALTH: &str = "quadroll/state/health"; // health status

// Motor configuration
// Serial port for the Dynamixel adapter
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";
pub const MOTOR_BAUDRATE: u32 = crate::motor::dynamixel::DEFAULT_BAUDRATE;

// IMU configuration
pub const IMU_BUS: &str = "/dev/i2c-1";
pub const IMU_ADDRESS: u8 = 0x6A;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Interpolated move parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    pub steps: usize,
    pub step_delay_ms: u64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            step_delay_ms: 20,
        }
    }
}

impl TrajectoryConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

/// Everything measured or tuned on one physical robot
///
/// `Default` is the calibrated unit; a JSON file may override any group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub calibration: Calibration,
    pub classifier: ClassifierConfig,
    pub gait: GaitConfig,
    pub roll: RollConfig,
    pub trajectory: TrajectoryConfig,
    pub poses: RecordedPoses,
}

impl RobotConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading robot config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calibration.validate().map_err(ConfigError::Invalid)?;
        self.classifier.validate().map_err(ConfigError::Invalid)?;
        if self.trajectory.steps == 0 {
            return Err(ConfigError::Invalid("trajectory steps must be at least 1".to_string()));
        }
        let degrees = [
            ("gait front lift", self.gait.front.lift_degrees),
            ("gait front swing", self.gait.front.swing_degrees),
            ("gait back lift", self.gait.back.lift_degrees),
            ("gait back swing", self.gait.back.swing_degrees),
            ("roll fold", self.roll.fold_degrees),
            ("roll propel", self.roll.propel_degrees),
            ("roll down", self.roll.down_degrees.unwrap_or(0.0)),
        ];
        for (name, value) in degrees {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!("{} must be a non-negative angle, got {}", name, value)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        RobotConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RobotConfig::from_json(r#"{"roll": {"fold_degrees": 45.0, "propel_degrees": 20.0, "down_degrees": 10.0, "propel_hold_ms": 500, "return_settle_ms": 100}}"#).unwrap();
        assert_eq!(config.roll.fold_degrees, 45.0);
        assert_eq!(config.roll.down_degrees, Some(10.0));
        assert_eq!(config.calibration, Calibration::default());
        assert_eq!(config.trajectory.steps, DEFAULT_STEPS);
    }

    #[test]
    fn test_default_round_trips_through_json() {
        let json = serde_json::to_string(&RobotConfig::default()).unwrap();
        assert_eq!(RobotConfig::from_json(&json).unwrap(), RobotConfig::default());
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let err = RobotConfig::from_json(
            r#"{"classifier": {"window_size": 2, "blue_under": [{"min": 0.0, "max": 90.0}], "yellow_under": [{"min": 45.0, "max": 60.0}]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = RobotConfig::default();
        config.classifier.window_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_negative_angle_rejected() {
        let mut config = RobotConfig::default();
        config.gait.back.lift_degrees = -5.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_wrong_swing_count_is_parse_error() {
        let mut value = serde_json::to_value(RobotConfig::default()).unwrap();
        value["gait"]["forward_swing"] = serde_json::json!(["toward_high", "toward_low"]);
        let err = RobotConfig::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
