// Per-leg calibration table
//
// Every leg has three joints: roll (lift up/down), yaw (swing forward/back)
// and fold (retraction for rolling). Each joint has a pair of limit ticks
// recorded on the physical unit. The numeric ordering of the pair differs
// from joint to joint, so nothing here assumes that "high" is the larger tick.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::motion::pose::{ActuatorId, MAX_TICK, id};

/// Leg number as labelled on the chassis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Leg {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
}

impl Leg {
    pub const ALL: [Leg; 4] = [Leg::One, Leg::Two, Leg::Three, Leg::Four];

    pub fn number(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Leg {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Leg::One),
            2 => Ok(Leg::Two),
            3 => Ok(Leg::Three),
            4 => Ok(Leg::Four),
            _ => Err(format!("leg number {} outside 1..=4", n)),
        }
    }
}

impl From<Leg> for u8 {
    fn from(leg: Leg) -> u8 {
        leg.number()
    }
}

/// Joint role within a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Lift: low limit = down, high limit = up
    Roll,
    /// Swing: low limit = clockwise, high limit = counter-clockwise
    Yaw,
    /// Retraction: low limit = clockwise, high limit = counter-clockwise
    Fold,
}

/// Which calibrated limit a move heads towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    TowardLow,
    TowardHigh,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::TowardLow => Direction::TowardHigh,
            Direction::TowardHigh => Direction::TowardLow,
        }
    }
}

/// Calibrated limit pair for one joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub low: u16,
    pub high: u16,
}

impl AxisLimits {
    pub const fn new(low: u16, high: u16) -> Self {
        Self { low, high }
    }

    /// True when travelling towards `high` increases the tick value
    pub fn ascending(&self) -> bool {
        self.high > self.low
    }

    pub fn min(&self) -> u16 {
        self.low.min(self.high)
    }

    pub fn max(&self) -> u16 {
        self.low.max(self.high)
    }

    pub fn contains(&self, tick: u16) -> bool {
        (self.min()..=self.max()).contains(&tick)
    }
}

/// One joint: which actuator drives it and where it must stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointCalibration {
    pub id: ActuatorId,
    pub limits: AxisLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegCalibration {
    pub roll: JointCalibration,
    pub yaw: JointCalibration,
    pub fold: JointCalibration,
}

impl LegCalibration {
    pub fn joint(&self, axis: Axis) -> &JointCalibration {
        match axis {
            Axis::Roll => &self.roll,
            Axis::Yaw => &self.yaw,
            Axis::Fold => &self.fold,
        }
    }
}

/// Calibration for all four legs, indexed by leg number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    legs: [LegCalibration; 4],
}

impl Calibration {
    pub fn new(legs: [LegCalibration; 4]) -> Result<Self, String> {
        let calibration = Self { legs };
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn leg(&self, leg: Leg) -> &LegCalibration {
        &self.legs[leg as usize - 1]
    }

    pub fn joint(&self, leg: Leg, axis: Axis) -> &JointCalibration {
        self.leg(leg).joint(axis)
    }

    /// Every actuator must drive exactly one joint and every limit must be a real tick
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for leg in Leg::ALL {
            for axis in [Axis::Roll, Axis::Yaw, Axis::Fold] {
                let joint = self.joint(leg, axis);
                if !seen.insert(joint.id) {
                    return Err(format!("actuator {} assigned to more than one joint", joint.id));
                }
                let AxisLimits { low, high } = joint.limits;
                if low > MAX_TICK || high > MAX_TICK {
                    return Err(format!(
                        "leg {} {:?} limits ({}, {}) outside 0..={}",
                        leg.number(),
                        axis,
                        low,
                        high,
                        MAX_TICK
                    ));
                }
                if low == high {
                    return Err(format!("leg {} {:?} has a zero-width range", leg.number(), axis));
                }
            }
        }
        Ok(())
    }
}

const fn joint(n: u8, low: u16, high: u16) -> JointCalibration {
    JointCalibration {
        id: id(n),
        limits: AxisLimits::new(low, high),
    }
}

impl Default for Calibration {
    /// Limits recorded on the current build (rolling-mode down positions for legs 1 and 2)
    fn default() -> Self {
        Self {
            legs: [
                LegCalibration {
                    roll: joint(2, 1020, 3074),
                    yaw: joint(1, 1858, 3010),
                    fold: joint(3, 990, 3072),
                },
                LegCalibration {
                    roll: joint(5, 2919, 1039),
                    yaw: joint(4, 1063, 2236),
                    fold: joint(6, 1028, 3080),
                },
                LegCalibration {
                    roll: joint(8, 2051, 3204),
                    yaw: joint(7, 1877, 3092),
                    fold: joint(9, 3082, 1024),
                },
                LegCalibration {
                    roll: joint(11, 2044, 957),
                    yaw: joint(10, 2004, 3215),
                    fold: joint(12, 3093, 1041),
                },
            ],
        }
    }
}
