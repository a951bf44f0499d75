//! Device registry - owns every detector for the life of the driver

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::DetectorError;
use crate::host::DetectorHost;
use crate::sdr::Tuner;

use super::detector::{DetectorOptions, RtlSdrDetector};
use super::state::CaptureParams;

/// Property changes a client can send to a device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyUpdate {
    CaptureSettings(CaptureParams),
    StartCapture(f64),
    AbortCapture,
}

/// Detectors keyed by device name
#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, RtlSdrDetector>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One detector per `(index, tuner)` pair
    pub fn from_tuners<I>(tuners: I, host: Arc<dyn DetectorHost>, options: &DetectorOptions) -> Self
    where
        I: IntoIterator<Item = (u32, Box<dyn Tuner>)>,
    {
        let mut registry = Self::new();
        for (index, tuner) in tuners {
            registry.insert(RtlSdrDetector::new(index, tuner, host.clone(), options.clone()));
        }
        registry
    }

    pub fn insert(&mut self, detector: RtlSdrDetector) {
        let name = detector.name().to_string();
        if self.devices.insert(name.clone(), detector).is_some() {
            warn!("Replaced existing device {}", name);
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&RtlSdrDetector> {
        self.devices.get(name)
    }

    /// Device names in index order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Connect every device and load its defaults. Returns how many connected.
    pub fn connect_all(&mut self) -> usize {
        let mut connected = 0;
        for name in self.names() {
            let Some(detector) = self.devices.get_mut(&name) else {
                continue;
            };
            match detector.connect() {
                Ok(()) => {
                    detector.update_on_connection_change();
                    connected += 1;
                }
                Err(e) => warn!("{}: {}", name, e),
            }
        }
        connected
    }

    /// Route an update to one named device, or to all devices when `device`
    /// is `None`. Unknown names produce no results.
    pub fn dispatch(
        &mut self,
        device: Option<&str>,
        update: PropertyUpdate,
    ) -> Vec<(String, Result<(), DetectorError>)> {
        let targets = match device {
            Some(name) if self.devices.contains_key(name) => vec![name.to_string()],
            Some(name) => {
                warn!("No device named {}", name);
                Vec::new()
            }
            None => self.names(),
        };

        let mut results = Vec::with_capacity(targets.len());
        for name in targets {
            if let Some(detector) = self.devices.get_mut(&name) {
                let result = match update {
                    PropertyUpdate::CaptureSettings(params) => detector.apply_parameters(params),
                    PropertyUpdate::StartCapture(duration) => detector.start_capture(duration),
                    PropertyUpdate::AbortCapture => detector.abort_capture(),
                };
                results.push((name, result));
            }
        }
        results
    }

    /// Tick every device. Returns the shortest requested re-arm delay, or
    /// `None` when no device wants polling any more.
    pub fn timer_hit(&mut self) -> Option<Duration> {
        self.devices
            .values_mut()
            .filter_map(RtlSdrDetector::timer_hit)
            .min()
    }

    /// Disconnect and drop every device
    pub fn shutdown(&mut self) {
        for (name, mut detector) in self.devices.drain() {
            if let Err(e) = detector.disconnect() {
                warn!("{}: {}", name, e);
            }
            let stats = detector.stats();
            info!(
                "{} closed. Completed: {}, Incomplete: {}, Aborted: {}, Failed: {}, Bytes: {}",
                name,
                stats.get_completed(),
                stats.get_incomplete(),
                stats.get_aborted(),
                stats.get_failed(),
                stats.get_bytes()
            );
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ChannelHost;
    use crate::sdr::SimulatedTuner;

    fn registry(count: u32) -> DeviceRegistry {
        let (host, _events) = ChannelHost::new(64);
        let host: Arc<dyn DetectorHost> = Arc::new(host);
        let tuners = (0..count).map(|i| (i, Box::new(SimulatedTuner::new(count)) as Box<dyn Tuner>));
        DeviceRegistry::from_tuners(tuners, host, &DetectorOptions::default())
    }

    #[test]
    fn test_lookup_by_name() {
        let registry = registry(2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["RTL-SDR Receiver 0", "RTL-SDR Receiver 1"]);
        assert!(registry.get("RTL-SDR Receiver 1").is_some());
        assert!(registry.get("RTL-SDR Receiver 7").is_none());
    }

    #[test]
    fn test_connect_all() {
        let mut registry = registry(2);
        assert_eq!(registry.connect_all(), 2);
        assert!(registry.names().iter().all(|n| registry.get(n).unwrap().is_connected()));
        assert_eq!(registry.timer_hit(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_dispatch_to_one_device() {
        let mut registry = registry(2);
        registry.connect_all();

        let params = CaptureParams {
            gain: 197,
            ..CaptureParams::default()
        };
        let results = registry.dispatch(Some("RTL-SDR Receiver 1"), PropertyUpdate::CaptureSettings(params));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "RTL-SDR Receiver 1");
        assert!(results[0].1.is_ok());
        assert_eq!(registry.get("RTL-SDR Receiver 1").unwrap().params().gain, 197);
    }

    #[test]
    fn test_dispatch_to_all_devices() {
        let mut registry = registry(2);
        registry.connect_all();
        let results = registry.dispatch(None, PropertyUpdate::AbortCapture);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    #[test]
    fn test_dispatch_unknown_device() {
        let mut registry = registry(1);
        assert!(registry.dispatch(Some("nope"), PropertyUpdate::AbortCapture).is_empty());
    }

    #[test]
    fn test_shutdown_empties_registry() {
        let mut registry = registry(2);
        registry.connect_all();
        registry.shutdown();
        assert!(registry.is_empty());
        assert_eq!(registry.timer_hit(), None);
    }
}
