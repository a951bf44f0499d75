//! Notifications from detectors back to the hosting process
//!
//! Completion and failure are raised on the hardware callback thread, so
//! the channel-backed host forwards them to whoever runs the poll loop.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::capture::Capture;
use crate::error::DetectorError;

/// Calls a detector makes into its host
pub trait DetectorHost: Send + Sync {
    /// A session finished and its data products are ready for export
    fn capture_complete(&self, device: &str, capture: Capture);

    /// A session was ended by an error; no data products
    fn capture_failed(&self, device: &str, error: DetectorError);

    /// Progress of the running session
    fn capture_time_left(&self, device: &str, seconds: f64);
}

#[derive(Debug)]
pub enum HostEvent {
    CaptureComplete { device: String, capture: Capture },
    CaptureFailed { device: String, error: DetectorError },
    TimeLeft { device: String, seconds: f64 },
}

/// Host that queues every notification on a crossbeam channel
pub struct ChannelHost {
    tx: Sender<HostEvent>,
}

impl ChannelHost {
    pub fn new(capacity: usize) -> (Self, Receiver<HostEvent>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl DetectorHost for ChannelHost {
    fn capture_complete(&self, device: &str, capture: Capture) {
        let event = HostEvent::CaptureComplete {
            device: device.to_string(),
            capture,
        };
        if self.tx.send(event).is_err() {
            warn!("Host channel closed, dropping capture from {}", device);
        }
    }

    fn capture_failed(&self, device: &str, error: DetectorError) {
        let event = HostEvent::CaptureFailed {
            device: device.to_string(),
            error,
        };
        if self.tx.send(event).is_err() {
            warn!("Host channel closed, dropping failure from {}", device);
        }
    }

    fn capture_time_left(&self, device: &str, seconds: f64) {
        let event = HostEvent::TimeLeft {
            device: device.to_string(),
            seconds,
        };
        // Progress is disposable; never block the poll loop on it
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Host channel full, dropping progress"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_dropped_when_full() {
        let (host, rx) = ChannelHost::new(1);
        host.capture_time_left("RTL-SDR Receiver 0", 1.5);
        host.capture_time_left("RTL-SDR Receiver 0", 1.0);

        let events: Vec<HostEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            HostEvent::TimeLeft { seconds, .. } if *seconds == 1.5
        ));
    }

    #[test]
    fn test_failure_forwarded() {
        let (host, rx) = ChannelHost::new(4);
        host.capture_failed("dev", DetectorError::NotConnected);
        match rx.try_recv().unwrap() {
            HostEvent::CaptureFailed { device, error } => {
                assert_eq!(device, "dev");
                assert!(matches!(error, DetectorError::NotConnected));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
