use core::fmt;

use log::{debug, info};

/// Observer side of the bus operations.
///
/// Operations report progress through `log` and announce that the set of
/// servo ids may have changed through `list_changed`. Delivery is best
/// effort; implementations must not block the bus.
pub trait EventSink {
    fn log(&self, message: fmt::Arguments<'_>);

    fn list_changed(&self);
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn log(&self, message: fmt::Arguments<'_>) {
        (**self).log(message)
    }

    fn list_changed(&self) {
        (**self).list_changed()
    }
}

/// Forwards everything to the `log` facade only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn log(&self, message: fmt::Arguments<'_>) {
        info!("{}", message);
    }

    fn list_changed(&self) {
        debug!("servo list changed");
    }
}
