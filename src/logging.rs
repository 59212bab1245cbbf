use std::{fs::OpenOptions, io, io::Write, path::Path};

use log::LevelFilter;

/// Appends `timestamp - message` lines to `path`. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_file_logger(path: &Path) -> io::Result<()> {
    let log_file = OpenOptions::new().create(true).append(true).open(path)?;

    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format(|buf, record| writeln!(buf, "{} - {}", buf.timestamp_millis(), record.args()))
        .try_init()
        .map_err(io::Error::other)
}

pub fn init_console_logger() {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}
