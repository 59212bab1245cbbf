use std::process::ExitCode;

use clap::Parser;
use stservo_bus::{
    DEFAULT_BAUD_RATE,
    bus::MoveRequest,
    events::LogSink,
    logging::init_console_logger,
    session::{SerialOpener, ServoBus},
};

/// Sends one absolute position command to a single servo.
#[derive(Debug, Parser)]
#[command(name = "move_servo", version)]
struct Args {
    /// Serial device the servo bus is attached to.
    #[arg(long, default_value = "COM8", env = "SERVO_PORT")]
    port: String,

    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, env = "SERVO_BAUD_RATE")]
    baud_rate: u32,

    #[arg(long, default_value_t = 2)]
    id: u8,

    /// Target position, 0..=4095 for a full turn.
    #[arg(long, default_value_t = 20, allow_negative_numbers = true)]
    position: i32,

    #[arg(long, default_value_t = 2400)]
    speed: u16,

    #[arg(long, default_value_t = 50)]
    acceleration: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_console_logger();

    let mut bus = ServoBus::new(SerialOpener::default());
    match bus.connect(&args.port, args.baud_rate) {
        Ok(()) => {
            println!("[INFO] Port opened successfully: {}", args.port);
            println!("[INFO] Baud rate set to {}", args.baud_rate);
        }
        Err(e) => {
            println!("[ERROR] {}", e);
            return ExitCode::FAILURE;
        }
    }

    let request = MoveRequest {
        servo_id: args.id,
        position: args.position,
        speed: args.speed,
        acceleration: args.acceleration,
    };
    // a failed move is reported and the port is still closed
    match bus.move_to(&request, &LogSink) {
        Ok(report) => {
            if let Some(e) = &report.transport {
                println!("[ERROR] {}", e);
            }
            if let Some(status) = report.device {
                println!("[ERROR] {}", status);
            }
            if report.is_success() {
                println!(
                    "[INFO] Servo ID {} moved successfully to {} units.",
                    request.servo_id, request.position
                );
            }
        }
        Err(e) => println!("[ERROR] {}", e),
    }

    if bus.close().is_some() {
        println!("[INFO] Port closed successfully");
    }
    ExitCode::SUCCESS
}
