use core::fmt;

/// Fault bits carried in the error byte of every status packet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServoStatus(pub u8);

/// A single fault reported by a servo, in the order the bits are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Voltage,
    AngleSensor,
    Overheat,
    Overcurrent,
    Overload,
    Unknown(u8),
}

impl ServoStatus {
    pub const OK: ServoStatus = ServoStatus(0);

    pub const VOLTAGE: u8 = 1 << 0;
    pub const ANGLE_SENSOR: u8 = 1 << 1;
    pub const OVERHEAT: u8 = 1 << 2;
    pub const OVERCURRENT: u8 = 1 << 3;
    pub const OVERLOAD: u8 = 1 << 5;

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// First fault found in the status byte, `None` for a clean status.
    pub fn fault(self) -> Option<Fault> {
        const ORDER: [(u8, Fault); 5] = [
            (ServoStatus::VOLTAGE, Fault::Voltage),
            (ServoStatus::ANGLE_SENSOR, Fault::AngleSensor),
            (ServoStatus::OVERHEAT, Fault::Overheat),
            (ServoStatus::OVERCURRENT, Fault::Overcurrent),
            (ServoStatus::OVERLOAD, Fault::Overload),
        ];
        if self.is_ok() {
            return None;
        }
        ORDER
            .iter()
            .find(|(bit, _)| self.0 & bit != 0)
            .map(|(_, fault)| *fault)
            .or(Some(Fault::Unknown(self.0)))
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Voltage => f.write_str("input voltage error"),
            Fault::AngleSensor => f.write_str("angle sensor error"),
            Fault::Overheat => f.write_str("overheat error"),
            Fault::Overcurrent => f.write_str("overcurrent error"),
            Fault::Overload => f.write_str("overload error"),
            Fault::Unknown(bits) => write!(f, "unknown fault bits {bits:#04x}"),
        }
    }
}

impl fmt::Display for ServoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fault() {
            Some(fault) => fault.fmt(f),
            None => f.write_str("ok"),
        }
    }
}
