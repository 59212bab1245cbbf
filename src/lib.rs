#![cfg_attr(not(feature = "std"), no_std)]

use embedded_io::{Read, Write};

use crate::comm::{
    CURRENT_REGISTER, Command, LOAD_REGISTER, MODEL_REGISTER, MOVING_REGISTER, POSITION_REGISTER,
    SPEED_REGISTER, STATUS_REGISTER, TEMPERATURE_REGISTER, VOLTAGE_REGISTER, send_ping, write_u8,
};

pub use crate::status::{Fault, ServoStatus};

mod comm;
pub mod bus;
pub mod events;
pub mod status;
pub mod telemetry;

#[cfg(feature = "std")]
pub mod logging;
#[cfg(feature = "std")]
pub mod session;
#[cfg(feature = "server")]
pub mod server;

#[cfg(all(test, feature = "std"))]
mod sim;

/// Size of the scratch buffer each open port carries for packets.
pub const BUFFER_SIZE: usize = 256;

/// Factory baud rate of STS servos.
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServoError {
    #[error("failed to transmit instruction packet")]
    WriteError,
    #[error("failed to read status packet")]
    ReadError,
    #[error("no status packet from servo {0}")]
    Timeout(u8),
    #[error("servo reported {0}")]
    StatusError(ServoStatus),
    #[error("malformed status packet")]
    ResponseParseError,
    #[error("invalid header bytes: {0:#X}, {1:#X}")]
    InvalidHeader(u8, u8),
    #[error("checksum mismatch: calculated {0:#X}, received {1:#X}")]
    ChecksumMismatch(u8, u8),
    #[error("status packet from servo {received}, expected {expected}")]
    IdMismatch { expected: u8, received: u8 },
    #[error("packet of {0} bytes does not fit")]
    PacketTooLarge(usize),
    #[error("Invalid ID range")]
    InvalidIdRange,
    #[error("invalid servo id {0}")]
    InvalidServoId(i64),
    #[error("port not connected")]
    NotConnected,
    #[cfg(feature = "std")]
    #[error("failed to open port {device}: {reason}")]
    PortOpen {
        device: std::string::String,
        reason: std::string::String,
    },
    #[cfg(feature = "std")]
    #[error("failed to set baud rate {baud_rate}: {reason}")]
    BaudRate {
        baud_rate: u32,
        reason: std::string::String,
    },
    #[cfg(feature = "std")]
    #[error("failed to list serial ports: {0}")]
    PortScan(std::string::String),
}

pub fn read_temperature<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<u8, ServoError> {
    read_u8_register(port, buffer, servo_id, TEMPERATURE_REGISTER)
}

pub fn read_voltage<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<u8, ServoError> {
    read_u8_register(port, buffer, servo_id, VOLTAGE_REGISTER)
}

pub fn read_current<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<u16, ServoError> {
    read_u16_register(port, buffer, servo_id, CURRENT_REGISTER)
}

pub fn is_moving<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<bool, ServoError> {
    read_u8_register(port, buffer, servo_id, MOVING_REGISTER).map(|value| value != 0)
}

pub fn has_error<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<bool, ServoError> {
    read_u8_register(port, buffer, servo_id, STATUS_REGISTER).map(|value| value != 0)
}

pub fn read_position<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<u16, ServoError> {
    read_u16_register(port, buffer, servo_id, POSITION_REGISTER)
}

pub fn read_speed<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<u16, ServoError> {
    read_u16_register(port, buffer, servo_id, SPEED_REGISTER)
}

pub fn read_load<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<u16, ServoError> {
    read_u16_register(port, buffer, servo_id, LOAD_REGISTER)
}

pub fn read_model_number<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<u16, ServoError> {
    read_u16_register(port, buffer, servo_id, MODEL_REGISTER)
}

pub fn read_u8_register<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
    register_id: u8,
) -> Result<u8, ServoError> {
    let result = Command::Read(servo_id, register_id, 1).send_command(port, buffer)?;
    result.data_as_u8().ok_or(ServoError::ResponseParseError)
}

pub fn read_u16_register<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
    register_id: u8,
) -> Result<u16, ServoError> {
    let result = Command::Read(servo_id, register_id, 2).send_command(port, buffer)?;
    result.data_as_u16().ok_or(ServoError::ResponseParseError)
}

/// Single-byte register write; the status byte of the reply is checked.
pub fn write_u8_register<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
    register_id: u8,
    value: u8,
) -> Result<(), ServoError> {
    write_u8(port, buffer, servo_id, register_id, value)?.is_error()
}

/// Presence check. A servo that answers with a fault flag is still present,
/// the flag is returned for the caller to report.
pub fn ping_servo<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<ServoStatus, ServoError> {
    send_ping(port, buffer, servo_id).map(|response| response.status())
}
