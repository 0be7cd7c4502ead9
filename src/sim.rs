// In-memory stand-ins for the servo bus and the IMU
//
// Used by `--simulate` and by the runtime tests. The bus moves every
// servo to its goal instantly; the IMU replays a list of tilt angles.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::hardware::{ActuatorBus, BusError, InertialSensor, Readback, SensorError};
use crate::imu::classifier::{ImuScale, RawImuSample};
use crate::motion::pose::{ActuatorId, Pose};

#[derive(Debug, Clone)]
pub struct SimState {
    pub pose: Pose,
    pub torque: [bool; 12],
    /// Servos that never answer
    pub offline: Vec<ActuatorId>,
    /// Time lost waiting on each offline servo, like a serial read timeout
    pub offline_delay: Duration,
    pub writes: Vec<Pose>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            pose: Pose::default(),
            torque: [false; 12],
            offline: Vec::new(),
            offline_delay: Duration::ZERO,
            writes: Vec::new(),
        }
    }
}

/// Simulated servo bus; clones of `state()` observe every write
#[derive(Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    pub fn new(initial: Pose) -> Self {
        let bus = Self::default();
        bus.with_state(|s| s.pose = initial);
        bus
    }

    pub fn state(&self) -> Arc<Mutex<SimState>> {
        Arc::clone(&self.state)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    /// Block for the timeouts a real bus would spend on offline servos in `ids`
    fn wait_for_offline(&self, ids: impl IntoIterator<Item = ActuatorId>) {
        let delay = self.with_state(|s| {
            let silent = ids.into_iter().filter(|id| s.offline.contains(id)).count();
            s.offline_delay * silent as u32
        });
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

impl ActuatorBus for SimulatedBus {
    fn enumerate(&mut self) -> Result<Vec<ActuatorId>, BusError> {
        self.wait_for_offline(ActuatorId::all());
        Ok(self.with_state(|s| ActuatorId::all().filter(|id| !s.offline.contains(id)).collect()))
    }

    fn read_positions(&mut self, ids: &[ActuatorId]) -> Result<Readback, BusError> {
        self.wait_for_offline(ids.iter().copied());
        Ok(self.with_state(|s| {
            let mut readback = Readback::default();
            for &id in ids {
                if s.offline.contains(&id) {
                    readback.missing.push(id);
                } else {
                    readback.positions.push((id, s.pose.get(id)));
                }
            }
            readback
        }))
    }

    fn write_positions(&mut self, pose: &Pose) -> Result<(), BusError> {
        self.with_state(|s| {
            for (id, tick) in pose.iter() {
                if !s.offline.contains(&id) {
                    s.pose.set(id, tick);
                }
            }
            s.writes.push(*pose);
        });
        Ok(())
    }

    fn set_torque(&mut self, ids: &[ActuatorId], enabled: bool) -> Vec<(ActuatorId, Result<(), BusError>)> {
        self.wait_for_offline(ids.iter().copied());
        self.with_state(|s| {
            ids.iter()
                .map(|&id| {
                    if s.offline.contains(&id) {
                        (id, Err(BusError::Unresponsive { id: id.get() }))
                    } else {
                        s.torque[id.get() as usize - 1] = enabled;
                        (id, Ok(()))
                    }
                })
                .collect()
        })
    }
}

/// Replays tilt angles in a loop; `None` entries simulate failed reads
pub struct SimulatedImu {
    script: Vec<Option<f64>>,
    next: usize,
    scale: ImuScale,
}

impl SimulatedImu {
    pub fn new(script: Vec<Option<f64>>, scale: ImuScale) -> Self {
        Self { script, next: 0, scale }
    }

    /// Rest on yellow, roll over to blue, then sit on the edge
    pub fn rolling(scale: ImuScale) -> Self {
        let script = [10.0, 10.0, 140.0, 140.0, 90.0, 90.0].map(Some).to_vec();
        Self::new(script, scale)
    }

    /// Raw counts whose gravity vector reads as `degrees` of tilt
    pub fn sample_for(degrees: f64, scale: &ImuScale) -> RawImuSample {
        const G: f64 = 9.81;
        let rad = degrees.to_radians();
        let counts = |v: f64, axis: usize| {
            ((v + scale.accel_bias[axis]) / scale.accel_mps2_per_count)
                .round()
                .clamp(i16::MIN as f64, i16::MAX as f64) as i16
        };
        let gyro_counts = |axis: usize| (scale.gyro_bias[axis] / scale.gyro_dps_per_count).round() as i16;
        RawImuSample {
            gyro: [gyro_counts(0), gyro_counts(1), gyro_counts(2)],
            accel: [counts(0.0, 0), counts(G * rad.sin(), 1), counts(G * rad.cos(), 2)],
        }
    }
}

impl InertialSensor for SimulatedImu {
    fn read_sample(&mut self) -> Result<RawImuSample, SensorError> {
        if self.script.is_empty() {
            return Err(SensorError::Bus("empty simulation script".to_string()));
        }
        let entry = self.script[self.next % self.script.len()];
        self.next += 1;
        match entry {
            Some(degrees) => Ok(Self::sample_for(degrees, &self.scale)),
            None => Err(SensorError::ReadInvalid { register: 0x28 }),
        }
    }
}
