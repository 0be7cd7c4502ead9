// High-level motor driver for the twelve leg servos
//
// Wraps the Dynamixel protocol in the operations the sequencer needs:
// enumerate, read positions, write a full pose, switch torque.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::dynamixel::{DEFAULT_TIMEOUT_MS, DynamixelBus, DynamixelError, Register};
use crate::hardware::{ActuatorBus, BusError, Readback};
use crate::motion::pose::{ActuatorId, MAX_TICK, Pose};

impl From<DynamixelError> for BusError {
    fn from(e: DynamixelError) -> Self {
        match e {
            DynamixelError::Timeout { id } => BusError::Unresponsive { id },
            DynamixelError::MotorError { id, .. } => BusError::Unresponsive { id },
            DynamixelError::Serial(e) => BusError::Transport(e.to_string()),
            DynamixelError::Io(e) => BusError::Transport(e.to_string()),
            other => BusError::Protocol(other.to_string()),
        }
    }
}

/// Driver for the twelve servos of the quadruped
pub struct MotorDriver {
    bus: DynamixelBus,
    port: String,
}

impl MotorDriver {
    /// Worst-case wait for one servo that does not answer
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TIMEOUT_MS);

    /// Open the servo bus; failure here is fatal for the caller
    pub fn open(port: &str, baudrate: u32) -> Result<Self, BusError> {
        info!("Opening motor bus on {} at {} baud", port, baudrate);
        let bus = DynamixelBus::open_with_baudrate(port, baudrate)
            .map_err(|e| BusError::Unavailable(format!("{}: {}", port, e)))?;
        Ok(Self {
            bus,
            port: port.to_string(),
        })
    }
}

impl ActuatorBus for MotorDriver {
    fn enumerate(&mut self) -> Result<Vec<ActuatorId>, BusError> {
        info!("Scanning for connected servos...");
        let mut found = Vec::new();
        for id in ActuatorId::all() {
            match self.bus.ping(id.get()) {
                Ok(true) => {
                    debug!("Servo {} responding", id);
                    found.push(id);
                }
                Ok(false) => warn!("Servo {} not responding to ping", id),
                Err(e @ (DynamixelError::Serial(_) | DynamixelError::Io(_))) => return Err(e.into()),
                Err(e) => warn!("Servo {} ping failed: {}", id, e),
            }
        }
        info!("Found servos {:?}", found.iter().map(|id| id.get()).collect::<Vec<_>>());
        Ok(found)
    }

    fn read_positions(&mut self, ids: &[ActuatorId]) -> Result<Readback, BusError> {
        let raw_ids: Vec<u8> = ids.iter().map(|id| id.get()).collect();
        let results = self.bus.sync_read_u32(Register::PresentPosition, &raw_ids)?;

        let mut readback = Readback::default();
        for (id, (_, result)) in ids.iter().zip(results) {
            // A garbled status packet desyncs the stream; ask that servo alone
            let result = match result {
                Err(DynamixelError::InvalidResponse { .. } | DynamixelError::ChecksumMismatch { .. }) => {
                    self.bus.get_position(id.get())
                }
                other => other,
            };
            match result {
                // Position mode reports a signed 32-bit value within one turn
                Ok(value) => {
                    let tick = (value as i32).clamp(0, MAX_TICK as i32) as u16;
                    readback.positions.push((*id, tick));
                }
                Err(e) => {
                    debug!("No position from servo {}: {}", id, e);
                    readback.missing.push(*id);
                }
            }
        }
        Ok(readback)
    }

    fn write_positions(&mut self, pose: &Pose) -> Result<(), BusError> {
        let data: Vec<(u8, u32)> = pose.iter().map(|(id, tick)| (id.get(), tick as u32)).collect();
        self.bus.sync_write_u32(Register::GoalPosition, &data)?;
        Ok(())
    }

    fn set_torque(&mut self, ids: &[ActuatorId], enabled: bool) -> Vec<(ActuatorId, Result<(), BusError>)> {
        ids.iter()
            .map(|&id| {
                let result = if enabled {
                    self.bus.enable_torque(id.get())
                } else {
                    self.bus.disable_torque(id.get())
                };
                match &result {
                    Ok(()) => info!("Servo {} torque {}", id, if enabled { "enabled" } else { "disabled" }),
                    Err(e) => warn!("Servo {} torque change failed: {}", id, e),
                }
                (id, result.map_err(BusError::from))
            })
            .collect()
    }
}

impl Drop for MotorDriver {
    fn drop(&mut self) {
        // Torque is left as-is so the robot does not collapse on shutdown
        info!("Closing motor bus on {}", self.port);
    }
}
