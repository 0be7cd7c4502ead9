// Dynamixel Protocol 2.0 serial implementation
//
// Packet format: [0xFF, 0xFF, 0xFD, 0x00, ID, Len_L, Len_H, Instruction, Params..., CRC_L, CRC_H]
// Length counts instruction + params + CRC. Params are byte-stuffed so the
// header sequence never appears inside a packet.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default serial configuration for the leg servos
pub const DEFAULT_BAUDRATE: u32 = 57_600;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Packet header bytes (including the reserved byte)
const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// Broadcast ID used by sync instructions
pub const BROADCAST_ID: u8 = 0xFE;

/// Status packets carry this in the instruction slot
const STATUS_INSTRUCTION: u8 = 0x55;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncRead = 0x82,
    SyncWrite = 0x83,
}

/// Control table addresses (X-series, RAM area)
#[repr(u16)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    TorqueEnable = 64,     // 1 byte: 0=off, 1=on
    GoalPosition = 116,    // 4 bytes
    PresentPosition = 132, // 4 bytes, read-only
}

/// Error types for Dynamixel communication
#[derive(Debug, thiserror::Error)]
pub enum DynamixelError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from motor {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("CRC mismatch for motor {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Motor {id} returned error status: 0x{status:02X}")]
    MotorError { id: u8, status: u8 },

    #[error("Timeout waiting for response from motor {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, DynamixelError>;

/// Dynamixel bus - handles serial communication with the servos
pub struct DynamixelBus {
    port: Box<dyn SerialPort>,
}

impl DynamixelBus {
    /// Open the servo bus at the given baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// CRC-16 (polynomial 0x8005, initial value 0) over header through last param
    fn crc16(data: &[u8]) -> u16 {
        let mut crc: u16 = 0;
        for &byte in data {
            crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 {
                    (crc << 1) ^ 0x8005
                } else {
                    crc << 1
                };
            }
        }
        crc
    }

    /// Insert 0xFD after every 0xFF 0xFF 0xFD run
    fn stuff(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 2);
        for &byte in data {
            out.push(byte);
            if out.len() >= 3 && out[out.len() - 3..] == HEADER[..3] {
                out.push(0xFD);
            }
        }
        out
    }

    /// Drop the 0xFD inserted by `stuff`
    fn unstuff(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        let mut i = 0;
        while i < data.len() {
            out.push(data[i]);
            if out.len() >= 3 && out[out.len() - 3..] == HEADER[..3] && data.get(i + 1) == Some(&0xFD) {
                i += 1;
            }
            i += 1;
        }
        out
    }

    /// Build a packet with header, stuffing and CRC
    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(params.len() + 1);
        body.push(instruction as u8);
        body.extend_from_slice(params);
        let body = Self::stuff(&body);

        let length = (body.len() + 2) as u16; // instruction + params + crc
        let mut packet = Vec::with_capacity(7 + body.len() + 2);

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.extend_from_slice(&length.to_le_bytes());
        packet.extend_from_slice(&body);

        let crc = Self::crc16(&packet);
        packet.extend_from_slice(&crc.to_le_bytes());

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_exact_or_timeout(&mut self, buf: &mut [u8], id: u8) -> Result<()> {
        self.port.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                DynamixelError::Timeout { id }
            } else {
                DynamixelError::Io(e)
            }
        })
    }

    /// Read a status packet and return its (unstuffed) parameters
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.read_exact_or_timeout(&mut header, expected_id)?;

        if header != HEADER {
            return Err(DynamixelError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 3];
        self.read_exact_or_timeout(&mut id_length, expected_id)?;
        let id = id_length[0];
        let length = u16::from_le_bytes([id_length[1], id_length[2]]) as usize;

        if id != expected_id {
            return Err(DynamixelError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 4 {
            return Err(DynamixelError::InvalidResponse {
                id,
                reason: format!("Status length {} too short", length),
            });
        }

        // instruction + error + params + crc
        let mut remaining = vec![0u8; length];
        self.read_exact_or_timeout(&mut remaining, id)?;

        let crc_at = remaining.len() - 2;
        let mut crc_data = Vec::with_capacity(7 + crc_at);
        crc_data.extend_from_slice(&header);
        crc_data.extend_from_slice(&id_length);
        crc_data.extend_from_slice(&remaining[..crc_at]);
        let expected_crc = Self::crc16(&crc_data);
        let received_crc = u16::from_le_bytes([remaining[crc_at], remaining[crc_at + 1]]);

        if expected_crc != received_crc {
            return Err(DynamixelError::ChecksumMismatch { id });
        }

        if remaining[0] != STATUS_INSTRUCTION {
            return Err(DynamixelError::InvalidResponse {
                id,
                reason: format!("Not a status packet: 0x{:02X}", remaining[0]),
            });
        }

        // Bit 7 is the hardware alert flag, the rest is the error number
        let error_status = remaining[1];
        if error_status & 0x80 != 0 {
            debug!("Motor {} reports hardware alert", id);
        }
        if error_status & 0x7F != 0 {
            return Err(DynamixelError::MotorError {
                id,
                status: error_status,
            });
        }

        Ok(Self::unstuff(&remaining[2..crc_at]))
    }

    /// Ping a motor to check if it's connected
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(DynamixelError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write raw bytes starting at a register
    fn write_bytes(&mut self, id: u8, register: Register, data: &[u8]) -> Result<()> {
        let mut params = Vec::with_capacity(2 + data.len());
        params.extend_from_slice(&(register as u16).to_le_bytes());
        params.extend_from_slice(data);
        let packet = Self::build_packet(id, Instruction::Write, &params);
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    /// Write a single byte to a register
    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("Write u8 to motor {}: reg={:?}, value={}", id, register, value);
        self.write_bytes(id, register, &[value])
    }

    /// Read four bytes (little-endian) from a register
    pub fn read_u32(&mut self, id: u8, register: Register) -> Result<u32> {
        let mut params = [0u8; 4];
        params[..2].copy_from_slice(&(register as u16).to_le_bytes());
        params[2..].copy_from_slice(&4u16.to_le_bytes());
        let packet = Self::build_packet(id, Instruction::Read, &params);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.len() < 4 {
            return Err(DynamixelError::InvalidResponse {
                id,
                reason: format!("Expected 4 bytes, got {}", response.len()),
            });
        }
        Ok(u32::from_le_bytes([response[0], response[1], response[2], response[3]]))
    }

    /// Sync read: read the same 4-byte register from several motors
    ///
    /// Every motor answers with its own status packet, in request order.
    /// A motor that fails to answer does not stop the others being read.
    pub fn sync_read_u32(&mut self, register: Register, ids: &[u8]) -> Result<Vec<(u8, Result<u32>)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut params = Vec::with_capacity(4 + ids.len());
        params.extend_from_slice(&(register as u16).to_le_bytes());
        params.extend_from_slice(&4u16.to_le_bytes());
        params.extend_from_slice(ids);

        let packet = Self::build_packet(BROADCAST_ID, Instruction::SyncRead, &params);
        debug!("Sync read from {} motors: reg={:?}", ids.len(), register);
        self.send_packet(&packet)?;

        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            let value = self.read_response(id).and_then(|data| {
                if data.len() < 4 {
                    Err(DynamixelError::InvalidResponse {
                        id,
                        reason: format!("Expected 4 bytes, got {}", data.len()),
                    })
                } else {
                    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
                }
            });
            if let Err(DynamixelError::InvalidResponse { .. }) = &value {
                // Out of step with the response stream; discard what is left
                self.port.clear(serialport::ClearBuffer::Input)?;
            }
            results.push((id, value));
        }
        Ok(results)
    }

    /// Sync write: write the same 4-byte register to multiple motors efficiently
    /// data: [(id, value), ...]
    pub fn sync_write_u32(&mut self, register: Register, data: &[(u8, u32)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        // Sync write format:
        // [addr_lo, addr_hi, len_lo, len_hi, id1, d0, d1, d2, d3, id2, ...]
        let mut params = Vec::with_capacity(4 + data.len() * 5);
        params.extend_from_slice(&(register as u16).to_le_bytes());
        params.extend_from_slice(&4u16.to_le_bytes());

        for &(id, value) in data {
            params.push(id);
            params.extend_from_slice(&value.to_le_bytes());
        }

        let packet = Self::build_packet(BROADCAST_ID, Instruction::SyncWrite, &params);
        debug!("Sync write to {} motors: reg={:?}", data.len(), register);
        self.send_packet(&packet)?;

        // Sync write has no response
        Ok(())
    }

    // === High-level convenience methods ===

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)
    }

    /// Read the present position tick of one motor
    pub fn get_position(&mut self, id: u8) -> Result<u32> {
        self.read_u32(id, Register::PresentPosition)
    }
}
