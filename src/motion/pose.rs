// Full-body pose snapshots
//
// A pose maps every actuator ID (1..=12) to an absolute tick in 0..=4095.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of actuators on the robot (3 per leg, 4 legs)
pub const NUM_ACTUATORS: usize = 12;

/// Highest valid tick (one full revolution is 4096 ticks)
pub const MAX_TICK: u16 = 4095;

/// Identity of one actuator on the bus, always within 1..=12
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ActuatorId(u8);

impl ActuatorId {
    pub const fn new(id: u8) -> Option<Self> {
        if id >= 1 && id as usize <= NUM_ACTUATORS {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Every actuator ID in ascending order
    pub fn all() -> impl Iterator<Item = ActuatorId> {
        (1..=NUM_ACTUATORS as u8).map(ActuatorId)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    const fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl TryFrom<u8> for ActuatorId {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id).ok_or_else(|| format!("actuator ID {} outside 1..={}", id, NUM_ACTUATORS))
    }
}

impl From<ActuatorId> for u8 {
    fn from(id: ActuatorId) -> u8 {
        id.0
    }
}

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Absolute tick target for all twelve actuators
///
/// Serialized as a plain array ordered by ID (index 0 is actuator 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u16; NUM_ACTUATORS]", into = "[u16; NUM_ACTUATORS]")]
pub struct Pose {
    ticks: [u16; NUM_ACTUATORS],
}

impl Pose {
    /// Build a pose from ticks ordered by actuator ID, clamping to the tick domain
    pub fn from_ticks(ticks: [u16; NUM_ACTUATORS]) -> Self {
        Self {
            ticks: ticks.map(|t| t.min(MAX_TICK)),
        }
    }

    /// Pose with every actuator at the same tick
    pub fn uniform(tick: u16) -> Self {
        Self::from_ticks([tick; NUM_ACTUATORS])
    }

    pub fn get(&self, id: ActuatorId) -> u16 {
        self.ticks[id.index()]
    }

    /// Return a copy with one actuator moved
    pub fn with(mut self, id: ActuatorId, tick: u16) -> Self {
        self.ticks[id.index()] = tick.min(MAX_TICK);
        self
    }

    pub fn set(&mut self, id: ActuatorId, tick: u16) {
        self.ticks[id.index()] = tick.min(MAX_TICK);
    }

    /// (id, tick) pairs in ascending ID order
    pub fn iter(&self) -> impl Iterator<Item = (ActuatorId, u16)> + '_ {
        ActuatorId::all().map(|id| (id, self.get(id)))
    }
}

impl Default for Pose {
    /// Mid-range on every joint
    fn default() -> Self {
        Self::uniform(2048)
    }
}

impl TryFrom<[u16; NUM_ACTUATORS]> for Pose {
    type Error = String;

    fn try_from(ticks: [u16; NUM_ACTUATORS]) -> Result<Self, Self::Error> {
        if let Some(t) = ticks.iter().find(|&&t| t > MAX_TICK) {
            return Err(format!("tick {} outside 0..={}", t, MAX_TICK));
        }
        Ok(Self { ticks })
    }
}

impl From<Pose> for [u16; NUM_ACTUATORS] {
    fn from(pose: Pose) -> Self {
        pose.ticks
    }
}

/// Shorthand for IDs known at compile time
pub(crate) const fn id(n: u8) -> ActuatorId {
    match ActuatorId::new(n) {
        Some(id) => id,
        None => panic!("actuator ID out of range"),
    }
}
