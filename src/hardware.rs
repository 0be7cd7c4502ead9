// Hardware seams: the servo bus and the inertial sensor
//
// Drivers are blocking. `Device` runs each call on tokio's blocking pool
// under a timeout so a stuck transaction surfaces as an error instead of
// stalling the control loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::imu::classifier::RawImuSample;
use crate::motion::pose::{ActuatorId, Pose};

/// Servo bus failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Actuator bus unavailable: {0}")]
    Unavailable(String),

    #[error("Actuator {id} unresponsive")]
    Unresponsive { id: u8 },

    #[error("Bus transport error: {0}")]
    Transport(String),

    #[error("Bus protocol error: {0}")]
    Protocol(String),

    #[error("Bus transaction timed out")]
    Timeout,

    #[error("Bus worker crashed")]
    Crashed,
}

/// Inertial sensor failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum SensorError {
    #[error("Invalid read from sensor register 0x{register:02X}")]
    ReadInvalid { register: u8 },

    #[error("Sensor bus error: {0}")]
    Bus(String),

    #[error("Sensor read timed out")]
    Timeout,

    #[error("Sensor worker crashed")]
    Crashed,
}

/// Why a device call never produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    Timeout,
    Crashed,
}

impl From<DeviceFault> for BusError {
    fn from(fault: DeviceFault) -> Self {
        match fault {
            DeviceFault::Timeout => BusError::Timeout,
            DeviceFault::Crashed => BusError::Crashed,
        }
    }
}

impl From<DeviceFault> for SensorError {
    fn from(fault: DeviceFault) -> Self {
        match fault {
            DeviceFault::Timeout => SensorError::Timeout,
            DeviceFault::Crashed => SensorError::Crashed,
        }
    }
}

/// Positions read back from the bus
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readback {
    pub positions: Vec<(ActuatorId, u16)>,
    /// Asked for but did not answer this cycle
    pub missing: Vec<ActuatorId>,
}

/// Servo network operations the sequencer relies on
pub trait ActuatorBus: Send + 'static {
    /// Ping every possible ID and return the ones that answered
    fn enumerate(&mut self) -> Result<Vec<ActuatorId>, BusError>;

    fn read_positions(&mut self, ids: &[ActuatorId]) -> Result<Readback, BusError>;

    fn write_positions(&mut self, pose: &Pose) -> Result<(), BusError>;

    fn set_torque(&mut self, ids: &[ActuatorId], enabled: bool) -> Vec<(ActuatorId, Result<(), BusError>)>;
}

/// Source of raw six-axis IMU samples
pub trait InertialSensor: Send + 'static {
    fn read_sample(&mut self) -> Result<RawImuSample, SensorError>;
}

/// A blocking driver owned by a worker slot, called with a deadline
pub struct Device<T> {
    inner: Arc<Mutex<T>>,
    timeout: Duration,
}

impl<T> Clone for Device<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            timeout: self.timeout,
        }
    }
}

impl<T: Send + 'static> Device<T> {
    pub fn new(driver: T, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(driver)),
            timeout,
        }
    }

    /// Run `f` against the driver on the blocking pool
    ///
    /// If the deadline passes the call keeps running in the background and
    /// holds the driver; later calls queue behind it under their own deadline.
    pub async fn call<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<DeviceFault> + Send + 'static,
    {
        self.call_within(self.timeout, f).await
    }

    /// Like `call`, with a deadline sized by the caller to the work in `f`
    pub async fn call_within<R, E, F>(&self, deadline: Duration, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<DeviceFault> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || {
            let mut driver = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut *driver)
        });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(_join)) => Err(DeviceFault::Crashed.into()),
            Err(_elapsed) => Err(DeviceFault::Timeout.into()),
        }
    }
}
