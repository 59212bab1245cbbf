use std::{ops::RangeInclusive, time::Duration};

use embedded_io::{ErrorType, Read, Write};
use embedded_io_adapters::std::FromStd;
use log::{info, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::{
    BUFFER_SIZE, DEFAULT_BAUD_RATE, ServoError,
    bus::{
        IdChange, MoveReport, MoveRequest, ServoRecord, SweepPlan, SweepReport, enumerate_servos,
        move_servo, reassign_id, sweep,
    },
    events::EventSink,
    telemetry::{ServoTelemetry, read_telemetry},
};

/// Source of bus handles: lists devices, opens them and sets their baud rate.
pub trait PortOpener: Clone + Send + Sync + 'static {
    type Port: Read + Write + Send + 'static;

    fn available_ports(&self) -> Result<Vec<String>, ServoError>;

    fn open(&self, device_name: &str) -> Result<Self::Port, ServoError>;

    fn set_baud_rate(&self, port: &mut Self::Port, baud_rate: u32) -> Result<(), ServoError>;

    /// Drops whatever is waiting in the receive buffer. Called before every
    /// instruction packet so a late or partial reply cannot be taken for
    /// the answer to the next one.
    fn clear_input(&self, _port: &mut Self::Port) -> Result<(), <Self::Port as ErrorType>::Error> {
        Ok(())
    }
}

/// Opens OS serial devices with the 8N1, no flow control framing STS
/// servos expect.
#[derive(Debug, Clone, Copy)]
pub struct SerialOpener {
    pub timeout: Duration,
}

impl Default for SerialOpener {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
        }
    }
}

impl PortOpener for SerialOpener {
    type Port = FromStd<Box<dyn SerialPort>>;

    fn available_ports(&self) -> Result<Vec<String>, ServoError> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|port| port.port_name).collect())
            .map_err(|e| ServoError::PortScan(e.to_string()))
    }

    fn open(&self, device_name: &str) -> Result<Self::Port, ServoError> {
        let port = serialport::new(device_name, DEFAULT_BAUD_RATE)
            .timeout(self.timeout)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| ServoError::PortOpen {
                device: device_name.to_string(),
                reason: e.to_string(),
            })?;

        info!("Port opened successfully: {}", device_name);
        Ok(FromStd::new(port))
    }

    fn set_baud_rate(&self, port: &mut Self::Port, baud_rate: u32) -> Result<(), ServoError> {
        port.inner_mut()
            .set_baud_rate(baud_rate)
            .map_err(|e| ServoError::BaudRate {
                baud_rate,
                reason: e.to_string(),
            })
    }

    fn clear_input(&self, port: &mut Self::Port) -> Result<(), std::io::Error> {
        port.inner_mut().clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Port view that clears stale input before each transmit.
struct FreshPort<'a, O: PortOpener> {
    opener: &'a O,
    port: &'a mut O::Port,
}

impl<O: PortOpener> ErrorType for FreshPort<'_, O> {
    type Error = <O::Port as ErrorType>::Error;
}

impl<O: PortOpener> Read for FreshPort<'_, O> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.port.read(buf)
    }
}

impl<O: PortOpener> Write for FreshPort<'_, O> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.opener.clear_input(self.port)?;
        self.port.write(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.port.flush()
    }
}

/// An open bus handle and the packet buffer used with it.
pub struct PortSession<P> {
    device_name: String,
    baud_rate: u32,
    port: P,
    buffer: [u8; BUFFER_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub device_name: String,
    pub is_open: bool,
    pub baud_rate: u32,
}

impl<P> PortSession<P> {
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            device_name: self.device_name.clone(),
            is_open: true,
            baud_rate: self.baud_rate,
        }
    }
}

/// The single logical servo bus: an opener plus at most one open session.
///
/// Every operation needs `&mut self`, so whoever owns the bus serializes
/// all traffic on it.
pub struct ServoBus<O: PortOpener> {
    opener: O,
    session: Option<PortSession<O::Port>>,
}

impl<O: PortOpener> ServoBus<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            session: None,
        }
    }

    /// Opens `device_name` and sets its baud rate. The current session is
    /// only replaced when both steps succeed.
    pub fn connect(&mut self, device_name: &str, baud_rate: u32) -> Result<(), ServoError> {
        let mut port = self.opener.open(device_name)?;
        self.opener.set_baud_rate(&mut port, baud_rate)?;
        if let Some(previous) = &self.session {
            info!("Replacing session on {}", previous.device_name);
        }
        self.session = Some(PortSession {
            device_name: device_name.to_string(),
            baud_rate,
            port,
            buffer: [0u8; BUFFER_SIZE],
        });
        info!("Connected to {} at {} baud", device_name, baud_rate);
        Ok(())
    }

    /// Releases the handle, returning what was open.
    pub fn close(&mut self) -> Option<SessionInfo> {
        let session = self.session.take()?;
        info!("Closed {}", session.device_name);
        Some(session.info())
    }

    /// Runs `f` against the open port; input is cleared before every packet.
    fn with_port<T>(
        &mut self,
        f: impl FnOnce(&mut FreshPort<'_, O>, &mut [u8]) -> T,
    ) -> Result<T, ServoError> {
        let session = self.session.as_mut().ok_or(ServoError::NotConnected)?;
        let mut port = FreshPort {
            opener: &self.opener,
            port: &mut session.port,
        };
        Ok(f(&mut port, &mut session.buffer))
    }

    /// Empty when no session is open.
    pub fn enumerate<E: EventSink>(&mut self, ids: RangeInclusive<u8>, events: &E) -> Vec<ServoRecord> {
        match self.with_port(|port, buffer| enumerate_servos(port, buffer, ids, events).to_vec()) {
            Ok(servos) => servos,
            Err(_) => {
                warn!("enumeration requested without an open port");
                Vec::new()
            }
        }
    }

    pub fn reassign<E: EventSink>(&mut self, change: IdChange, events: &E) -> Result<(), ServoError> {
        self.with_port(|port, buffer| reassign_id(port, buffer, change, events))?
    }

    pub fn move_to<E: EventSink>(&mut self, request: &MoveRequest, events: &E) -> Result<MoveReport, ServoError> {
        self.with_port(|port, buffer| move_servo(port, buffer, request, events))
    }

    pub fn sweep<E: EventSink>(
        &mut self,
        plan: &SweepPlan,
        events: &E,
        pause: impl FnMut(Duration),
    ) -> Result<SweepReport, ServoError> {
        self.with_port(|port, buffer| sweep(port, buffer, plan, events, pause))
    }

    pub fn telemetry(&mut self, servo_id: u8) -> Result<ServoTelemetry, ServoError> {
        self.with_port(|port, buffer| read_telemetry(port, buffer, servo_id))?
    }
}
