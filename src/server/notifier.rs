use std::fmt;

use log::{debug, info};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::events::EventSink;

/// Frames pushed to observers on the events socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BusEvent {
    Log { message: String },
    RefreshServoList,
}

/// Fan-out of bus events to every subscribed observer.
///
/// Publishing never waits: an observer that is not subscribed at the time
/// misses the event, and a slow one that falls more than `capacity` events
/// behind loses the oldest.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<BusEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: BusEvent) {
        if self.sender.send(event).is_err() {
            debug!("no observers connected");
        }
    }

    /// Writes the message to the persistent log and pushes it to observers.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.publish(BusEvent::Log { message });
    }

    pub fn notify_list_changed(&self) {
        info!("servo list changed");
        self.publish(BusEvent::RefreshServoList);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for Notifier {
    fn log(&self, message: fmt::Arguments<'_>) {
        Notifier::log(self, message.to_string());
    }

    fn list_changed(&self) {
        self.notify_list_changed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_as_tagged_frames() {
        let log = BusEvent::Log {
            message: "Servo 3 found".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&log).unwrap(),
            r#"{"event":"log","data":{"message":"Servo 3 found"}}"#
        );
        assert_eq!(
            serde_json::to_string(&BusEvent::RefreshServoList).unwrap(),
            r#"{"event":"refresh_servo_list"}"#
        );
    }

    #[test]
    fn every_subscriber_sees_events_in_order() {
        let notifier = Notifier::default();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        EventSink::log(&notifier, format_args!("step {}", 1));
        notifier.notify_list_changed();

        for receiver in [&mut first, &mut second] {
            assert_eq!(
                receiver.try_recv().unwrap(),
                BusEvent::Log {
                    message: "step 1".to_string()
                }
            );
            assert_eq!(receiver.try_recv().unwrap(), BusEvent::RefreshServoList);
        }
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let notifier = Notifier::default();
        notifier.log("nobody listening");
        let mut late = notifier.subscribe();
        assert!(late.try_recv().is_err());
    }
}
