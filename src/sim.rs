//! In-memory servo bus for tests.
//!
//! Decodes every instruction packet written to it, records it, and queues
//! the status packet a real servo would send back.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::{Arc, Mutex},
};

use crate::{
    comm::{ID_REGISTER, MODEL_REGISTER, calculate_checksum},
    events::EventSink,
    status::ServoStatus,
};

pub(crate) const SIM_MODEL_NUMBER: u16 = 777;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Instruction {
    pub servo_id: u8,
    pub instruction: u8,
    pub params: Vec<u8>,
}

impl Instruction {
    pub fn is_write(&self) -> bool {
        self.instruction == 0x03
    }

    /// Goal position carried by an acceleration-register position write.
    pub fn position(&self) -> Option<u16> {
        if self.is_write() && self.params.first() == Some(&0x29) && self.params.len() == 8 {
            Some(u16::from_le_bytes([self.params[2], self.params[3]]))
        } else {
            None
        }
    }
}

struct SimServo {
    status: ServoStatus,
    registers: [u8; 128],
}

impl SimServo {
    fn new() -> Self {
        let mut registers = [0u8; 128];
        registers[MODEL_REGISTER as usize..MODEL_REGISTER as usize + 2]
            .copy_from_slice(&SIM_MODEL_NUMBER.to_le_bytes());
        Self {
            status: ServoStatus::OK,
            registers,
        }
    }
}

#[derive(Default)]
struct SimState {
    servos: BTreeMap<u8, SimServo>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    instructions: Vec<Instruction>,
}

impl SimState {
    fn process(&mut self) {
        loop {
            if self.pending.len() < 4 {
                return;
            }
            let total = 4 + self.pending[3] as usize;
            if self.pending.len() < total {
                return;
            }
            let frame: Vec<u8> = self.pending.drain(..total).collect();
            let instruction = Instruction {
                servo_id: frame[2],
                instruction: frame[4],
                params: frame[5..total - 1].to_vec(),
            };
            let reply = self.answer(&instruction);
            self.instructions.push(instruction);
            if let Some((servo_id, status, data)) = reply {
                let mut packet = vec![0xff, 0xff, servo_id, (data.len() + 2) as u8, status.0];
                packet.extend_from_slice(&data);
                packet.push(calculate_checksum(&packet[2..]));
                self.rx.extend(packet);
            }
        }
    }

    fn answer(&mut self, instruction: &Instruction) -> Option<(u8, ServoStatus, Vec<u8>)> {
        let servo = self.servos.get_mut(&instruction.servo_id)?;
        let status = servo.status;
        match instruction.instruction {
            0x01 => Some((instruction.servo_id, status, Vec::new())),
            0x02 => {
                let addr = instruction.params[0] as usize;
                let len = instruction.params[1] as usize;
                Some((instruction.servo_id, status, servo.registers[addr..addr + len].to_vec()))
            }
            0x03 => {
                let addr = instruction.params[0] as usize;
                let data = &instruction.params[1..];
                servo.registers[addr..addr + data.len()].copy_from_slice(data);
                if addr == ID_REGISTER as usize {
                    let new_id = data[0];
                    if let Some(servo) = self.servos.remove(&instruction.servo_id) {
                        self.servos.insert(new_id, servo);
                    }
                }
                Some((instruction.servo_id, status, Vec::new()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SimError;

impl embedded_io::Error for SimError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::TimedOut
    }
}

/// Cloning shares the same simulated bus, so a test can keep a handle while
/// the session owns the port.
#[derive(Clone, Default)]
pub(crate) struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    pub fn with_servos(ids: &[u8]) -> Self {
        let bus = Self::default();
        for &id in ids {
            bus.with_state(|state| state.servos.insert(id, SimServo::new()));
        }
        bus
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_status(&self, servo_id: u8, status: ServoStatus) {
        self.with_state(|state| {
            if let Some(servo) = state.servos.get_mut(&servo_id) {
                servo.status = status;
            }
        })
    }

    pub fn set_register(&self, servo_id: u8, register: u8, value: u8) {
        self.with_state(|state| {
            if let Some(servo) = state.servos.get_mut(&servo_id) {
                servo.registers[register as usize] = value;
            }
        })
    }

    pub fn set_register_u16(&self, servo_id: u8, register: u8, value: u16) {
        let [low, high] = value.to_le_bytes();
        self.set_register(servo_id, register, low);
        self.set_register(servo_id, register + 1, high);
    }

    /// Queues bytes on the receive side ahead of any reply, like line noise
    /// or a reply that arrived after its reader gave up.
    pub fn queue_input(&self, bytes: &[u8]) {
        self.with_state(|state| state.rx.extend(bytes.iter().copied()))
    }

    pub fn clear_input(&self) {
        self.with_state(|state| state.rx.clear())
    }

    pub fn pending_input(&self) -> usize {
        self.with_state(|state| state.rx.len())
    }

    pub fn has_servo(&self, servo_id: u8) -> bool {
        self.with_state(|state| state.servos.contains_key(&servo_id))
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.with_state(|state| state.instructions.clone())
    }

    pub fn positions(&self) -> Vec<u16> {
        self.instructions().iter().filter_map(Instruction::position).collect()
    }
}

impl embedded_io::ErrorType for SimulatedBus {
    type Error = SimError;
}

impl embedded_io::Write for SimulatedBus {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.with_state(|state| {
            state.pending.extend_from_slice(buf);
            state.process();
        });
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for SimulatedBus {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.with_state(|state| {
            if state.rx.is_empty() {
                return Err(SimError);
            }
            let count = buf.len().min(state.rx.len());
            for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..count)) {
                *slot = byte;
            }
            Ok(count)
        })
    }
}

/// Event sink that keeps everything it is told.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub lines: RefCell<Vec<String>>,
    pub list_changes: Cell<usize>,
}

impl EventSink for RecordingSink {
    fn log(&self, message: fmt::Arguments<'_>) {
        self.lines.borrow_mut().push(message.to_string());
    }

    fn list_changed(&self) {
        self.list_changes.set(self.list_changes.get() + 1);
    }
}
