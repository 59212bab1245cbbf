use embedded_io::{Read, Write};

use crate::{
    ServoError, comm::GOAL_POSITION_REGISTER, has_error, is_moving, read_current, read_load,
    read_position, read_speed, read_temperature, read_u16_register, read_voltage,
};

/// Snapshot of a servo's live registers.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "server", derive(serde::Serialize))]
pub struct ServoTelemetry {
    pub id: u8,
    pub position: u16,
    pub goal_position: u16,
    pub speed: u16,
    pub temperature: u8,
    pub load: u16,
    pub voltage: u8,
    pub current: u16,
    pub is_moving: bool,
    pub has_error: bool,
}

pub fn read_telemetry<P: Read + Write>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<ServoTelemetry, ServoError> {
    Ok(ServoTelemetry {
        id: servo_id,
        position: read_position(port, buffer, servo_id)?,
        goal_position: read_u16_register(port, buffer, servo_id, GOAL_POSITION_REGISTER)?,
        speed: read_speed(port, buffer, servo_id)?,
        temperature: read_temperature(port, buffer, servo_id)?,
        load: read_load(port, buffer, servo_id)?,
        voltage: read_voltage(port, buffer, servo_id)?,
        current: read_current(port, buffer, servo_id)?,
        is_moving: is_moving(port, buffer, servo_id)?,
        has_error: has_error(port, buffer, servo_id)?,
    })
}
