//! Bus-level operations: enumeration, id reassignment and motion.
//!
//! Everything here works on any `embedded_io` port plus a packet buffer, the
//! same way the register helpers in the crate root do. Progress is reported
//! through an [`EventSink`].

use core::{ops::RangeInclusive, time::Duration};

use embedded_io::{Read, Write};
use log::warn;

use crate::{
    ServoError,
    comm::{ID_REGISTER, write_position},
    events::EventSink,
    ping_servo, read_model_number,
    status::ServoStatus,
    write_u8_register,
};

pub const MIN_SERVO_ID: u8 = 1;
pub const MAX_SERVO_ID: u8 = 252;

/// Upper bound on servos one enumeration can return.
pub const MAX_SERVO_COUNT: usize = MAX_SERVO_ID as usize;

/// Ids probed when no range is configured.
pub const DEFAULT_PROBE_IDS: RangeInclusive<u8> = 1..=9;

pub const MAX_SWEEP_STEPS: usize = 32;

pub const SWEEP_STEPS: u8 = 10;
pub const SWEEP_SPEED: u16 = 100;
pub const SWEEP_ACCELERATION: u8 = 20;
pub const SWEEP_PAUSE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "server", derive(serde::Serialize))]
pub struct ServoRecord {
    pub id: u8,
    pub model_number: u16,
}

pub type ServoList = heapless::Vec<ServoRecord, MAX_SERVO_COUNT>;

/// Probes every id in `ids` and returns the ones that answered, ascending.
pub fn enumerate_servos<P: Write + Read, E: EventSink>(
    port: &mut P,
    buffer: &mut [u8],
    ids: RangeInclusive<u8>,
    events: &E,
) -> ServoList {
    let mut found = ServoList::new();
    for servo_id in ids {
        match probe_servo(port, buffer, servo_id) {
            Ok((record, status)) => {
                if status.is_ok() {
                    events.log(format_args!(
                        "Servo {} found: model number {}",
                        record.id, record.model_number
                    ));
                } else {
                    events.log(format_args!(
                        "Servo {} found: model number {}, status: {}",
                        record.id, record.model_number, status
                    ));
                }
                if found.push(record).is_err() {
                    warn!("servo list full, stopping enumeration at id {}", servo_id);
                    break;
                }
            }
            Err(e) => events.log(format_args!("Servo {} not found: {}", servo_id, e)),
        }
    }
    found
}

/// Ping followed by a read of the model number; both must answer.
pub fn probe_servo<P: Write + Read>(
    port: &mut P,
    buffer: &mut [u8],
    servo_id: u8,
) -> Result<(ServoRecord, ServoStatus), ServoError> {
    let status = ping_servo(port, buffer, servo_id)?;
    let model_number = read_model_number(port, buffer, servo_id)?;
    Ok((
        ServoRecord {
            id: servo_id,
            model_number,
        },
        status,
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdChange {
    pub old_id: u8,
    pub new_id: u8,
}

impl IdChange {
    /// The new id must be a valid bus address; the old id only has to fit
    /// the one-byte id field.
    pub fn new(old_id: i64, new_id: i64) -> Result<Self, ServoError> {
        if !(MIN_SERVO_ID as i64..=MAX_SERVO_ID as i64).contains(&new_id) {
            return Err(ServoError::InvalidIdRange);
        }
        let old_id = u8::try_from(old_id).map_err(|_| ServoError::InvalidServoId(old_id))?;
        Ok(Self {
            old_id,
            new_id: new_id as u8,
        })
    }
}

/// Rewrites the id register of `change.old_id`.
pub fn reassign_id<P: Write + Read, E: EventSink>(
    port: &mut P,
    buffer: &mut [u8],
    change: IdChange,
    events: &E,
) -> Result<(), ServoError> {
    if !(MIN_SERVO_ID..=MAX_SERVO_ID).contains(&change.new_id) {
        events.log(format_args!(
            "Failed to change ID: {} is out of the valid range",
            change.new_id
        ));
        return Err(ServoError::InvalidIdRange);
    }

    match write_u8_register(port, buffer, change.old_id, ID_REGISTER, change.new_id) {
        Ok(()) => {
            events.log(format_args!(
                "Changed servo ID from {} to {}",
                change.old_id, change.new_id
            ));
            events.list_changed();
            Ok(())
        }
        Err(e) => {
            events.log(format_args!(
                "Failed to change servo ID from {} to {}: {}",
                change.old_id, change.new_id, e
            ));
            Err(e)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    pub servo_id: u8,
    pub position: i32,
    pub speed: u16,
    pub acceleration: u8,
}

/// Outcome of one position command.
///
/// The transport result and the device status are independent: a failed
/// transport leaves `device` empty, a delivered command may still carry a
/// fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReport {
    pub position: i32,
    pub transport: Option<ServoError>,
    pub device: Option<ServoStatus>,
}

impl MoveReport {
    pub fn is_success(&self) -> bool {
        self.transport.is_none() && self.device.is_none()
    }

    /// Transport error first, then device fault.
    pub fn error(&self) -> Option<ServoError> {
        self.transport
            .clone()
            .or(self.device.map(ServoError::StatusError))
    }
}

pub fn move_servo<P: Write + Read, E: EventSink>(
    port: &mut P,
    buffer: &mut [u8],
    request: &MoveRequest,
    events: &E,
) -> MoveReport {
    let (transport, status) = match write_position(
        port,
        buffer,
        request.servo_id,
        request.position,
        request.speed,
        request.acceleration,
    ) {
        Ok(response) => (None, response.status()),
        Err(e) => (Some(e), ServoStatus::OK),
    };

    if let Some(e) = &transport {
        events.log(format_args!("[ERROR] servo {}: {}", request.servo_id, e));
    }
    let device = (!status.is_ok()).then_some(status);
    if let Some(status) = device {
        events.log(format_args!("[ERROR] servo {}: {}", request.servo_id, status));
    }
    if transport.is_none() && device.is_none() {
        events.log(format_args!(
            "[INFO] Servo ID {} moved successfully to {} units.",
            request.servo_id, request.position
        ));
    }

    MoveReport {
        position: request.position,
        transport,
        device,
    }
}

/// What a failed step means for the sweep as a whole.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(clap::ValueEnum))]
pub enum SweepPolicy {
    /// The sweep succeeds once every step has been issued.
    #[default]
    Ignore,
    /// Any failed step fails the sweep.
    FailOnError,
}

/// Open-loop ramp: step `i` commands `step_size * i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPlan {
    pub servo_id: u8,
    pub step_size: i32,
    pub steps: u8,
    pub speed: u16,
    pub acceleration: u8,
    pub pause: Duration,
}

impl SweepPlan {
    pub fn new(servo_id: u8, step_size: i32) -> Self {
        Self {
            servo_id,
            step_size,
            steps: SWEEP_STEPS,
            speed: SWEEP_SPEED,
            acceleration: SWEEP_ACCELERATION,
            pause: SWEEP_PAUSE,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn position(&self, step: u8) -> i32 {
        self.step_size.saturating_mul(step as i32)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub steps: heapless::Vec<MoveReport, MAX_SWEEP_STEPS>,
}

impl SweepReport {
    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|step| !step.is_success()).count()
    }

    pub fn is_success(&self, policy: SweepPolicy) -> bool {
        match policy {
            SweepPolicy::Ignore => true,
            SweepPolicy::FailOnError => self.failed_steps() == 0,
        }
    }
}

/// Runs the plan to completion. `pause` is called after every step; step
/// failures are recorded and never stop the ramp.
pub fn sweep<P: Write + Read, E: EventSink>(
    port: &mut P,
    buffer: &mut [u8],
    plan: &SweepPlan,
    events: &E,
    mut pause: impl FnMut(Duration),
) -> SweepReport {
    let steps = plan.steps.min(MAX_SWEEP_STEPS as u8);
    if steps < plan.steps {
        warn!("sweep limited to {} steps", steps);
    }
    events.log(format_args!(
        "[INFO] Sweeping servo ID {} in {} steps of {} units",
        plan.servo_id, steps, plan.step_size
    ));

    let mut report = SweepReport::default();
    for step in 0..steps {
        let request = MoveRequest {
            servo_id: plan.servo_id,
            position: plan.position(step),
            speed: plan.speed,
            acceleration: plan.acceleration,
        };
        let outcome = move_servo(port, buffer, &request, events);
        // capacity is MAX_SWEEP_STEPS and steps is clamped to it
        let _ = report.steps.push(outcome);
        pause(plan.pause);
    }
    report
}
