// Tilt-based orientation classifier
//
// Converts raw IMU counts to physical units, computes the tilt about the
// X axis from gravity, averages it over a small window and decides which
// half of the shell is touching the ground.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::motion::choreography::Side;

/// One raw reading: three gyro axes then three accel axes, sensor counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawImuSample {
    pub gyro: [i16; 3],
    pub accel: [i16; 3],
}

/// Count-to-unit factors and fixed bias offsets measured on the unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImuScale {
    /// deg/s per count (±250 dps full scale)
    pub gyro_dps_per_count: f64,
    /// m/s² per count (±2 g full scale)
    pub accel_mps2_per_count: f64,
    /// Subtracted after scaling, deg/s
    pub gyro_bias: [f64; 3],
    /// Subtracted after scaling, m/s²
    pub accel_bias: [f64; 3],
}

impl Default for ImuScale {
    fn default() -> Self {
        Self {
            gyro_dps_per_count: 250.0 / 32768.0,
            accel_mps2_per_count: 2.0 / 32768.0 * 9.81,
            gyro_bias: [0.0, 0.0, -0.37],
            accel_bias: [0.0, 0.0, 0.2],
        }
    }
}

/// Reading converted to deg/s and m/s²
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuReading {
    pub gyro_dps: [f64; 3],
    pub accel_mps2: [f64; 3],
}

impl ImuReading {
    pub fn from_raw(raw: &RawImuSample, scale: &ImuScale) -> Self {
        let mut gyro_dps = [0.0; 3];
        let mut accel_mps2 = [0.0; 3];
        for axis in 0..3 {
            gyro_dps[axis] = raw.gyro[axis] as f64 * scale.gyro_dps_per_count - scale.gyro_bias[axis];
            accel_mps2[axis] =
                raw.accel[axis] as f64 * scale.accel_mps2_per_count - scale.accel_bias[axis];
        }
        Self {
            gyro_dps,
            accel_mps2,
        }
    }

    /// Rotation about X from the gravity vector, degrees in [-180, 180]
    pub fn tilt_degrees(&self) -> f64 {
        self.accel_mps2[1].atan2(self.accel_mps2[2]).to_degrees()
    }
}

/// Inclusive range of tilt angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleRange {
    pub min: f64,
    pub max: f64,
}

impl AngleRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, angle: f64) -> bool {
        angle >= self.min && angle <= self.max
    }

    fn overlaps(&self, other: &AngleRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Valid samples averaged per decision
    pub window_size: usize,
    #[serde(default)]
    pub scale: ImuScale,
    pub blue_under: Vec<AngleRange>,
    pub yellow_under: Vec<AngleRange>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            window_size: 2,
            scale: ImuScale::default(),
            blue_under: vec![AngleRange::new(-180.0, -122.0), AngleRange::new(123.0, 180.0)],
            yellow_under: vec![AngleRange::new(-54.0, 58.0)],
        }
    }
}

impl ClassifierConfig {
    /// Ranges must be well formed and no angle may mean both sides
    pub fn validate(&self) -> Result<(), String> {
        if self.window_size == 0 {
            return Err("classifier window size must be at least 1".to_string());
        }
        for range in self.blue_under.iter().chain(&self.yellow_under) {
            if !(range.min <= range.max) {
                return Err(format!("angle range [{}, {}] is empty", range.min, range.max));
            }
            if range.min < -180.0 || range.max > 180.0 {
                return Err(format!(
                    "angle range [{}, {}] outside [-180, 180]",
                    range.min, range.max
                ));
            }
        }
        for blue in &self.blue_under {
            if let Some(yellow) = self.yellow_under.iter().find(|y| y.overlaps(blue)) {
                return Err(format!(
                    "blue range [{}, {}] overlaps yellow range [{}, {}]",
                    blue.min, blue.max, yellow.min, yellow.max
                ));
            }
        }
        Ok(())
    }
}

/// Which side is on the ground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    YellowUnder,
    BlueUnder,
    Ambiguous,
}

impl Classification {
    /// Side to push, if the orientation is known
    pub fn side(self) -> Option<Side> {
        match self {
            Classification::YellowUnder => Some(Side::Yellow),
            Classification::BlueUnder => Some(Side::Blue),
            Classification::Ambiguous => None,
        }
    }
}

/// Result of one completed window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub classification: Classification,
    pub average_tilt: f64,
}

/// Windowed classifier; only decides on full windows of valid samples
#[derive(Debug, Clone)]
pub struct OrientationClassifier {
    config: ClassifierConfig,
    sum: f64,
    count: usize,
    rejected: u64,
    last_tilt: Option<f64>,
}

impl OrientationClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            sum: 0.0,
            count: 0,
            rejected: 0,
            last_tilt: None,
        }
    }

    pub fn classify(&self, angle: f64) -> Classification {
        if self.config.blue_under.iter().any(|r| r.contains(angle)) {
            Classification::BlueUnder
        } else if self.config.yellow_under.iter().any(|r| r.contains(angle)) {
            Classification::YellowUnder
        } else {
            Classification::Ambiguous
        }
    }

    /// Feed one raw sample; `None` marks a failed read and is skipped
    pub fn observe(&mut self, sample: Option<&RawImuSample>) -> Option<Decision> {
        match sample {
            Some(raw) => {
                let tilt = ImuReading::from_raw(raw, &self.config.scale).tilt_degrees();
                self.observe_tilt(tilt)
            }
            None => {
                self.rejected += 1;
                None
            }
        }
    }

    /// Feed one tilt angle in degrees
    ///
    /// The window average is arithmetic, not circular: readings that
    /// straddle the +/-180 wrap (179 and -179) average to about 0. Keep the
    /// range tables in mind when retuning near the seam.
    pub fn observe_tilt(&mut self, tilt: f64) -> Option<Decision> {
        if !tilt.is_finite() {
            self.rejected += 1;
            return None;
        }
        self.last_tilt = Some(tilt);
        self.sum += tilt;
        self.count += 1;

        if self.count < self.config.window_size {
            return None;
        }

        let average_tilt = self.sum / self.count as f64;
        self.sum = 0.0;
        self.count = 0;

        let classification = self.classify(average_tilt);
        debug!("Average tilt {:.1} deg -> {:?}", average_tilt, classification);
        Some(Decision {
            classification,
            average_tilt,
        })
    }

    /// Valid samples currently held in the window
    pub fn pending(&self) -> usize {
        self.count
    }

    /// Samples dropped as invalid since startup
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn last_tilt(&self) -> Option<f64> {
        self.last_tilt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> OrientationClassifier {
        OrientationClassifier::new(ClassifierConfig::default())
    }

    #[test]
    fn test_blue_under_at_140() {
        let mut c = classifier();
        assert!(c.observe_tilt(135.0).is_none());
        let decision = c.observe_tilt(145.0).unwrap();
        assert_eq!(decision.classification, Classification::BlueUnder);
        assert!((decision.average_tilt - 140.0).abs() < 1e-9);
    }

    #[test]
    fn test_yellow_under_at_10() {
        let mut c = classifier();
        c.observe_tilt(5.0);
        let decision = c.observe_tilt(15.0).unwrap();
        assert_eq!(decision.classification, Classification::YellowUnder);
    }

    #[test]
    fn test_ambiguous_at_90() {
        let mut c = classifier();
        c.observe_tilt(90.0);
        let decision = c.observe_tilt(90.0).unwrap();
        assert_eq!(decision.classification, Classification::Ambiguous);
        assert_eq!(decision.classification.side(), None);
    }

    #[test]
    fn test_range_edges_inclusive() {
        let c = classifier();
        assert_eq!(c.classify(-180.0), Classification::BlueUnder);
        assert_eq!(c.classify(-122.0), Classification::BlueUnder);
        assert_eq!(c.classify(-121.5), Classification::Ambiguous);
        assert_eq!(c.classify(123.0), Classification::BlueUnder);
        assert_eq!(c.classify(-54.0), Classification::YellowUnder);
        assert_eq!(c.classify(58.0), Classification::YellowUnder);
        assert_eq!(c.classify(58.5), Classification::Ambiguous);
        assert_eq!(c.classify(180.0), Classification::BlueUnder);
    }

    #[test]
    fn test_ranges_are_disjoint() {
        let config = ClassifierConfig::default();
        assert!(config.validate().is_ok());
        let mut angle = -180.0;
        while angle <= 180.0 {
            let blue = config.blue_under.iter().any(|r| r.contains(angle));
            let yellow = config.yellow_under.iter().any(|r| r.contains(angle));
            assert!(!(blue && yellow), "{} is both blue and yellow", angle);
            angle += 0.25;
        }
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let config = ClassifierConfig {
            yellow_under: vec![AngleRange::new(-54.0, 130.0)],
            ..ClassifierConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ClassifierConfig {
            window_size: 0,
            ..ClassifierConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_average_does_not_wrap_at_180() {
        let mut c = classifier();
        c.observe_tilt(179.0);
        let decision = c.observe_tilt(-179.0).unwrap();
        assert!(decision.average_tilt.abs() < 1e-9);
        assert_eq!(decision.classification, Classification::YellowUnder);
    }

    #[test]
    fn test_fires_once_per_window() {
        let mut c = OrientationClassifier::new(ClassifierConfig {
            window_size: 3,
            ..ClassifierConfig::default()
        });
        let fired: Vec<bool> = (0..9).map(|_| c.observe_tilt(10.0).is_some()).collect();
        assert_eq!(
            fired,
            vec![false, false, true, false, false, true, false, false, true]
        );
    }

    #[test]
    fn test_invalid_samples_do_not_count_or_poison() {
        let mut c = classifier();
        assert!(c.observe(None).is_none());
        assert!(c.observe_tilt(10.0).is_none());
        assert!(c.observe(None).is_none());
        assert!(c.observe_tilt(f64::NAN).is_none());
        assert_eq!(c.pending(), 1);
        let decision = c.observe_tilt(20.0).unwrap();
        assert!((decision.average_tilt - 15.0).abs() < 1e-9);
        assert_eq!(c.rejected(), 3);

        // The next window starts clean
        c.observe_tilt(140.0);
        let decision = c.observe_tilt(140.0).unwrap();
        assert_eq!(decision.classification, Classification::BlueUnder);
    }

    #[test]
    fn test_raw_sample_tilt() {
        let scale = ImuScale {
            accel_bias: [0.0; 3],
            ..ImuScale::default()
        };
        // Gravity straight down the Z axis
        let flat = RawImuSample {
            gyro: [0; 3],
            accel: [0, 0, 16384],
        };
        assert!(ImuReading::from_raw(&flat, &scale).tilt_degrees().abs() < 1e-9);

        // Gravity along +Y: rolled a quarter turn
        let side = RawImuSample {
            gyro: [0; 3],
            accel: [0, 16384, 0],
        };
        assert!((ImuReading::from_raw(&side, &scale).tilt_degrees() - 90.0).abs() < 1e-9);

        let reading = ImuReading::from_raw(&flat, &ImuScale::default());
        assert!((reading.accel_mps2[2] - (9.81 - 0.2)).abs() < 1e-9);
        assert!((reading.gyro_dps[2] - 0.37).abs() < 1e-9);
    }

    #[test]
    fn test_raw_upside_down_is_blue() {
        let mut c = classifier();
        let upside_down = RawImuSample {
            gyro: [0; 3],
            accel: [0, 2000, -16000],
        };
        c.observe(Some(&upside_down));
        let decision = c.observe(Some(&upside_down)).unwrap();
        assert_eq!(decision.classification, Classification::BlueUnder);
    }
}
