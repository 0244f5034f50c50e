//! Single-slot, last-value-wins hand-off between the poll loop and the display.

use crate::aggregator::AggregationError;
use crate::snapshot::Snapshot;
use std::sync::Arc;
use tokio::sync::watch;

/// Terminal state published once when monitoring stops on a fatal error.
#[derive(Debug, Clone, PartialEq)]
pub struct FatalNotice {
    pub message: String,
    pub error: Option<AggregationError>,
}

impl FatalNotice {
    pub fn from_error(error: AggregationError) -> Self {
        Self {
            message: error.user_message(),
            error: Some(error),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Publication {
    #[default]
    Pending,
    Sample(Arc<Snapshot>),
    Terminated(Arc<FatalNotice>),
}

impl Publication {
    #[cfg(test)]
    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            Publication::Sample(snap) => Some(snap),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Publication::Terminated(_))
    }
}

pub fn publish_channel() -> (Publisher, Subscriber) {
    let (tx, rx) = watch::channel(Publication::Pending);
    (Publisher { tx }, Subscriber { rx })
}

/// Producer half. Owned by exactly one poll loop.
#[derive(Debug)]
pub struct Publisher {
    tx: watch::Sender<Publication>,
}

impl Publisher {
    /// Replaces whatever is in the slot, read or not.
    pub fn publish(&self, snapshot: Snapshot) {
        self.tx.send_replace(Publication::Sample(Arc::new(snapshot)));
    }

    /// Publishes the terminal state. Consumes the publisher, so nothing can
    /// be published afterwards.
    pub fn terminate(self, notice: FatalNotice) {
        self.tx.send_replace(Publication::Terminated(Arc::new(notice)));
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> Subscriber {
        Subscriber {
            rx: self.tx.subscribe(),
        }
    }
}

/// Consumer half. Reads never block the producer.
#[derive(Debug, Clone)]
pub struct Subscriber {
    rx: watch::Receiver<Publication>,
}

impl Subscriber {
    /// The freshest publication. May return the same snapshot again when the
    /// producer has not published since the last read.
    pub fn latest(&mut self) -> Publication {
        self.rx.borrow_and_update().clone()
    }

    /// Waits for a publication not yet seen by this subscriber. Returns
    /// `None` once the publisher is gone and nothing new is left.
    pub async fn changed(&mut self) -> Option<Publication> {
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SensorField;
    use std::time::SystemTime;

    fn snap(cpu: f64) -> Snapshot {
        Snapshot {
            cpu_load_percent: cpu,
            cpu_temperature_celsius: None,
            gpu_name: None,
            gpu_load_percent: None,
            gpu_temperature_celsius: None,
            ram_used_percent: 10.0,
            sampled_at: SystemTime::now(),
            degraded: Vec::new(),
        }
    }

    #[test]
    fn starts_pending() {
        let (_tx, mut rx) = publish_channel();
        assert!(matches!(rx.latest(), Publication::Pending));
    }

    #[test]
    fn last_value_wins() {
        let (tx, mut rx) = publish_channel();
        tx.publish(snap(1.0));
        tx.publish(snap(2.0));

        let latest = rx.latest();
        assert_eq!(latest.snapshot().map(|s| s.cpu_load_percent), Some(2.0));
        // Re-reading without a new publish yields the same snapshot.
        let again = rx.latest();
        assert!(Arc::ptr_eq(
            latest.snapshot().expect("sample"),
            again.snapshot().expect("sample")
        ));
    }

    #[test]
    fn publishing_without_subscribers_does_not_fail() {
        let (tx, rx) = publish_channel();
        drop(rx);
        tx.publish(snap(3.0));
        let mut late = tx.subscribe();
        assert_eq!(
            late.latest().snapshot().map(|s| s.cpu_load_percent),
            Some(3.0)
        );
    }

    #[tokio::test]
    async fn terminal_state_survives_publisher_drop() {
        let (tx, mut rx) = publish_channel();
        tx.publish(snap(1.0));
        tx.terminate(FatalNotice::from_error(AggregationError::PrivilegeRequired {
            field: SensorField::CpuTemperature,
            detail: "denied".to_string(),
        }));

        let seen = rx.changed().await.expect("terminal publication");
        assert!(seen.is_terminal());
        assert!(rx.latest().is_terminal());
        assert!(rx.changed().await.is_none());
    }

    #[tokio::test]
    async fn changed_returns_none_when_publisher_dropped_silently() {
        let (tx, mut rx) = publish_channel();
        drop(tx);
        assert!(rx.changed().await.is_none());
        assert!(matches!(rx.latest(), Publication::Pending));
    }
}
