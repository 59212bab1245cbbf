use embedded_io::{Error as _, ErrorKind, Read, ReadExactError, Write};

use log::{debug, trace};

use crate::{ServoError, status::ServoStatus};

const HEADER_BYTE: u8 = 0xff;

const PING_ID: u8 = 0x01;
const READ_DATA_ID: u8 = 0x02;
const WRITE_DATA_ID: u8 = 0x03;

/// Header, id and length bytes in front of the payload of every packet.
const PREAMBLE_LEN: usize = 4;

/// Input scanned for a header before a reply is given up on.
const MAX_SYNC_BYTES: usize = 64;

pub const MODEL_REGISTER: u8 = 0x03;
pub const ID_REGISTER: u8 = 0x05;
pub const ACCELERATION_REGISTER: u8 = 0x29;
pub const GOAL_POSITION_REGISTER: u8 = 0x2a;

pub const POSITION_REGISTER: u8 = 0x38;
pub const SPEED_REGISTER: u8 = 0x3a;
pub const LOAD_REGISTER: u8 = 0x3c;
pub const VOLTAGE_REGISTER: u8 = 0x3e;
pub const TEMPERATURE_REGISTER: u8 = 0x3f;
pub const STATUS_REGISTER: u8 = 0x41;
pub const MOVING_REGISTER: u8 = 0x42;
pub const CURRENT_REGISTER: u8 = 0x45;

/// Bit 15 marks a negative position or speed on the wire.
const SIGN_BIT: u16 = 0x8000;

pub(crate) enum Command<'a> {
    Ping(u8),
    Read(u8, u8, u8),
    Write(u8, u8, &'a [u8]),
}

impl<'cmd> Command<'cmd> {
    fn servo_id(&self) -> u8 {
        match self {
            Command::Ping(servo_id) | Command::Read(servo_id, _, _) | Command::Write(servo_id, _, _) => {
                *servo_id
            }
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Command::Ping(_) => 6,
            Command::Read(..) => 8,
            Command::Write(_, _, data) => 7 + data.len(),
        }
    }

    pub(crate) fn write_buffer(&self, buffer: &mut [u8]) -> Result<usize, ServoError> {
        let encoded_len = self.encoded_len();
        // the length byte covers instruction, parameters and checksum
        if encoded_len > buffer.len() || encoded_len - PREAMBLE_LEN > u8::MAX as usize {
            return Err(ServoError::PacketTooLarge(encoded_len));
        }
        buffer[0] = HEADER_BYTE;
        buffer[1] = HEADER_BYTE;
        buffer[2] = self.servo_id();
        buffer[3] = (encoded_len - PREAMBLE_LEN) as u8;
        match self {
            Command::Ping(_) => {
                buffer[4] = PING_ID;
            }
            Command::Read(_, addr, reply_length) => {
                buffer[4] = READ_DATA_ID;
                buffer[5] = *addr;
                buffer[6] = *reply_length;
            }
            Command::Write(_, addr, data) => {
                buffer[4] = WRITE_DATA_ID;
                buffer[5] = *addr;
                buffer[6..6 + data.len()].copy_from_slice(data);
            }
        };
        let checksum_index = encoded_len - 1;
        buffer[checksum_index] = calculate_checksum(&buffer[2..checksum_index]);
        Ok(encoded_len)
    }

    pub(crate) fn send_command<'a, P: Write + Read>(
        &self,
        mut port: P,
        buffer: &'a mut [u8],
    ) -> Result<CommandResponse<'a>, ServoError> {
        let servo_id = self.servo_id();
        let index = self.write_buffer(buffer)?;
        trace!("tx {:02x?}", &buffer[..index]);
        port.write_all(&buffer[..index])
            .map_err(|_| ServoError::WriteError)?;
        port.flush().map_err(|_| ServoError::WriteError)?;

        buffer[0] = HEADER_BYTE;
        buffer[1] = HEADER_BYTE;
        buffer[2] = find_header(&mut port, servo_id)?;
        receive(&mut port, &mut buffer[3..PREAMBLE_LEN], servo_id)?;
        let length = buffer[3] as usize;
        if length < 2 || PREAMBLE_LEN + length > buffer.len() {
            // consume the rest of the frame so the next reply starts aligned
            discard(&mut port, buffer, length, servo_id);
            return Err(ServoError::ResponseParseError);
        }
        receive(&mut port, &mut buffer[PREAMBLE_LEN..PREAMBLE_LEN + length], servo_id)?;
        trace!("rx {:02x?}", &buffer[..PREAMBLE_LEN + length]);
        CommandResponse::parse_response(&buffer[..PREAMBLE_LEN + length], servo_id)
    }
}

/// Skips input up to the next `FF FF` header and returns the id byte after
/// it. Runs of more than two header bytes are treated as one header.
fn find_header<P: Read>(port: &mut P, servo_id: u8) -> Result<u8, ServoError> {
    let mut last_two = [0u8; 2];
    let mut run = 0usize;
    for seen in 0..MAX_SYNC_BYTES {
        let mut byte = [0u8; 1];
        receive(port, &mut byte, servo_id)?;
        let byte = byte[0];
        if byte == HEADER_BYTE {
            run += 1;
        } else if run >= 2 {
            let stray = seen - run;
            if stray > 0 {
                debug!("skipped {} stray bytes before reply from servo {}", stray, servo_id);
            }
            return Ok(byte);
        } else {
            run = 0;
        }
        last_two = [last_two[1], byte];
    }
    Err(ServoError::InvalidHeader(last_two[0], last_two[1]))
}

fn discard<P: Read>(port: &mut P, scratch: &mut [u8], mut remaining: usize, servo_id: u8) {
    while remaining > 0 {
        let chunk = remaining.min(scratch.len());
        if receive(port, &mut scratch[..chunk], servo_id).is_err() {
            break;
        }
        remaining -= chunk;
    }
}

fn receive<P: Read>(port: &mut P, buffer: &mut [u8], servo_id: u8) -> Result<(), ServoError> {
    port.read_exact(buffer).map_err(|error| match error {
        ReadExactError::UnexpectedEof => ServoError::Timeout(servo_id),
        ReadExactError::Other(e) if e.kind() == ErrorKind::TimedOut => ServoError::Timeout(servo_id),
        ReadExactError::Other(_) => ServoError::ReadError,
    })
}

/// Inverted byte sum over everything between the header and the checksum.
pub(crate) fn calculate_checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |sum, value| sum.wrapping_add(*value))
}

#[derive(Debug)]
pub(crate) struct CommandResponse<'a> {
    status: ServoStatus,
    data: &'a [u8],
}

impl<'a> CommandResponse<'a> {
    /// `frame` is one complete status packet, header through checksum.
    fn parse_response(frame: &'a [u8], expected_id: u8) -> Result<CommandResponse<'a>, ServoError> {
        if frame.len() < PREAMBLE_LEN + 2 {
            return Err(ServoError::ResponseParseError);
        }
        let length = frame[3] as usize;
        if frame.len() != PREAMBLE_LEN + length {
            return Err(ServoError::ResponseParseError);
        }
        let checksum_index = 3 + length;
        let checksum = frame[checksum_index];
        let calculated_checksum = calculate_checksum(&frame[2..checksum_index]);
        if calculated_checksum != checksum {
            return Err(ServoError::ChecksumMismatch(calculated_checksum, checksum));
        }
        if frame[2] != expected_id {
            return Err(ServoError::IdMismatch {
                expected: expected_id,
                received: frame[2],
            });
        }

        Ok(Self {
            status: ServoStatus(frame[4]),
            data: &frame[5..checksum_index],
        })
    }

    pub(crate) fn is_error(&self) -> Result<(), ServoError> {
        if self.status.is_ok() {
            Ok(())
        } else {
            Err(ServoError::StatusError(self.status))
        }
    }

    pub(crate) fn data_as_u16(&self) -> Option<u16> {
        Some(u16::from_le_bytes(self.data.get(0..2)?.try_into().ok()?))
    }

    pub(crate) fn data_as_u8(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub(crate) fn status(&self) -> ServoStatus {
        self.status
    }
}

/// Sign-magnitude encoding used by the position and speed registers.
pub(crate) fn encode_signed(value: i32) -> u16 {
    if value < 0 {
        (value.unsigned_abs() as u16 & !SIGN_BIT) | SIGN_BIT
    } else {
        value as u16
    }
}

pub(crate) fn send_ping<'a, P: Write + Read>(
    port: &mut P,
    buffer: &'a mut [u8],
    servo_id: u8,
) -> Result<CommandResponse<'a>, ServoError> {
    Command::Ping(servo_id).send_command(port, buffer)
}

pub(crate) fn write_u8<'a, P: Write + Read>(
    port: &mut P,
    buffer: &'a mut [u8],
    servo_id: u8,
    register_id: u8,
    value: u8,
) -> Result<CommandResponse<'a>, ServoError> {
    Command::Write(servo_id, register_id, &[value]).send_command(port, buffer)
}

/// Acceleration, goal position, run time and goal speed in a single write.
pub(crate) fn write_position<'a, P: Write + Read>(
    port: &mut P,
    buffer: &'a mut [u8],
    servo_id: u8,
    position: i32,
    speed: u16,
    acceleration: u8,
) -> Result<CommandResponse<'a>, ServoError> {
    let mut data = [0u8; 7];
    data[0] = acceleration;
    data[1..3].copy_from_slice(&encode_signed(position).to_le_bytes());
    data[5..7].copy_from_slice(&speed.to_le_bytes());

    trace!("position write for servo {}: {:02x?}", servo_id, data);
    Command::Write(servo_id, ACCELERATION_REGISTER, &data).send_command(port, buffer)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::sim::SimulatedBus;

    #[test]
    fn ping_frame_layout() {
        let mut buffer = [0u8; 16];
        let len = Command::Ping(0x01).write_buffer(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], &[0xff, 0xff, 0x01, 0x02, 0x01, 0xfb]);
    }

    #[test]
    fn position_write_frame_layout() {
        // position 2048, speed 100, acceleration 20
        let mut data = [0u8; 7];
        data[0] = 20;
        data[1..3].copy_from_slice(&2048u16.to_le_bytes());
        data[5..7].copy_from_slice(&100u16.to_le_bytes());

        let cmd = Command::Write(1, ACCELERATION_REGISTER, &data);
        let mut buffer = [0u8; 64];
        let length = cmd.write_buffer(&mut buffer).unwrap();

        assert_eq!(length, 14, "header + id + len + instr + addr + 7 data + checksum");
        assert_eq!(buffer[3], 10, "length covers instruction, address, data and checksum");
        assert_eq!(buffer[4], WRITE_DATA_ID);
        assert_eq!(buffer[5], ACCELERATION_REGISTER);
        assert_eq!(&buffer[6..13], &[20, 0x00, 0x08, 0x00, 0x00, 100, 0x00]);
        let expected_checksum = !(1u8
            .wrapping_add(10)
            .wrapping_add(WRITE_DATA_ID)
            .wrapping_add(ACCELERATION_REGISTER)
            .wrapping_add(20)
            .wrapping_add(0x08)
            .wrapping_add(100));
        assert_eq!(buffer[13], expected_checksum);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut buffer = [0u8; 4];
        assert_eq!(
            Command::Ping(1).write_buffer(&mut buffer),
            Err(ServoError::PacketTooLarge(6))
        );
    }

    #[test]
    fn negative_positions_use_sign_bit() {
        assert_eq!(encode_signed(20), 20);
        assert_eq!(encode_signed(-20), 0x8014);
        assert_eq!(encode_signed(4095), 4095);
    }

    #[test]
    fn parses_status_packet_with_data() {
        let mut frame = [0xff, 0xff, 0x03, 0x04, 0x00, 0x09, 0x03, 0x00];
        frame[7] = calculate_checksum(&frame[2..7]);
        let response = CommandResponse::parse_response(&frame, 3).unwrap();
        assert!(response.status().is_ok());
        assert_eq!(response.data_as_u16(), Some(777));
    }

    #[test]
    fn rejects_corrupt_checksum() {
        let frame = [0xff, 0xff, 0x03, 0x02, 0x00, 0x00];
        assert!(matches!(
            CommandResponse::parse_response(&frame, 3),
            Err(ServoError::ChecksumMismatch(_, 0x00))
        ));
    }

    #[test]
    fn rejects_reply_from_other_servo() {
        let mut frame = [0xff, 0xff, 0x04, 0x02, 0x00, 0x00];
        frame[5] = calculate_checksum(&frame[2..5]);
        assert_eq!(
            CommandResponse::parse_response(&frame, 3).unwrap_err(),
            ServoError::IdMismatch {
                expected: 3,
                received: 4
            }
        );
    }

    #[test]
    fn silent_servo_times_out() {
        let mut bus = SimulatedBus::with_servos(&[]);
        let mut buffer = [0u8; 64];
        assert_eq!(
            send_ping(&mut bus, &mut buffer, 4).unwrap_err(),
            ServoError::Timeout(4)
        );
        assert_eq!(bus.instructions().len(), 1);
    }

    #[test]
    fn stray_bytes_before_reply_are_skipped() {
        let mut bus = SimulatedBus::with_servos(&[1]);
        bus.queue_input(&[0x00, 0xff]);
        let mut buffer = [0u8; 64];
        for _ in 0..3 {
            let response = send_ping(&mut bus, &mut buffer, 1).unwrap();
            assert!(response.status().is_ok());
        }
        assert_eq!(bus.pending_input(), 0);
    }

    #[test]
    fn oversized_reply_is_drained() {
        let mut bus = SimulatedBus::with_servos(&[1]);
        let mut frame = vec![0xff, 0xff, 0x01, 0x0a];
        frame.extend([0u8; 10]);
        bus.queue_input(&frame);
        let mut buffer = [0u8; 8];

        assert_eq!(
            send_ping(&mut bus, &mut buffer, 1).unwrap_err(),
            ServoError::ResponseParseError
        );
        // the real ping reply is next in line
        assert_eq!(bus.pending_input(), 6);
        assert!(send_ping(&mut bus, &mut buffer, 1).is_ok());
    }

    #[test]
    fn gives_up_on_endless_noise() {
        let mut bus = SimulatedBus::with_servos(&[]);
        bus.queue_input(&[0x55; 100]);
        let mut buffer = [0u8; 64];
        assert_eq!(
            send_ping(&mut bus, &mut buffer, 1).unwrap_err(),
            ServoError::InvalidHeader(0x55, 0x55)
        );
    }

    #[test]
    fn device_status_is_surfaced() {
        let mut bus = SimulatedBus::with_servos(&[1]);
        bus.set_status(1, ServoStatus(ServoStatus::OVERLOAD));
        let mut buffer = [0u8; 64];
        let response = write_position(&mut bus, &mut buffer, 1, 100, 100, 20).unwrap();
        assert_eq!(
            response.is_error(),
            Err(ServoError::StatusError(ServoStatus(ServoStatus::OVERLOAD)))
        );
    }
}
