//! RTL-SDR Detector - timed radio captures
//!
//! Opens every attached RTL-SDR receiver (or simulated ones), runs timed
//! captures, and writes each capture's continuum and spectrum to a FITS file.

mod capture;
mod config;
mod device;
mod error;
mod export;
mod host;
mod sdr;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::Config;
use device::{DetectorOptions, DeviceRegistry, PropertyUpdate, RtlSdrDetector};
use host::{ChannelHost, DetectorHost, HostEvent};
use sdr::{enumerate_devices, RtlSdrProcess, SimulatedTuner, Tuner};

/// Host notifications buffered between ticks
const EVENT_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   RTL-SDR Detector");
    info!("   continuum + spectrum captures");
    info!("===========================================");

    // Load configuration
    let config = Config::from_env();

    info!("Configuration:");
    info!("  Simulation: {}", config.simulation);
    info!("  Capture: {:.2}s x {}", config.capture_duration, config.capture_count);
    info!("  Frequency: {} Hz", config.params.frequency);
    info!("  Sample rate: {} S/s", config.params.sample_rate);
    info!("  Bandwidth: {} Hz", config.params.bandwidth);
    info!("  Gain: {:.1} dB", config.params.gain as f32 / 10.0);
    info!("  Output: {}", config.output_dir.display());

    let (host, events) = ChannelHost::new(EVENT_CAPACITY);
    let host: Arc<dyn DetectorHost> = Arc::new(host);
    let options = config.detector_options();

    let mut registry = build_registry(&config, host, &options);
    if registry.is_empty() {
        warn!("No RTLSDR receivers detected. Power on?");
        return Ok(());
    }

    if let Some(detector) = registry.names().first().and_then(|n| registry.get(n)) {
        let caps = detector.init_capabilities();
        info!(
            "Capabilities: abort={} continuum={} spectrum={} duration={:?}s frequency={:?}Hz {} bps, {} files, poll {:?}",
            caps.can_abort,
            caps.has_continuum,
            caps.has_spectrum,
            caps.duration,
            caps.frequency,
            caps.bits_per_sample,
            caps.capture_extension,
            caps.poll_interval
        );
    }

    if registry.connect_all() == 0 {
        bail!("None of the {} receiver(s) could be opened", registry.len());
    }

    for (name, result) in registry.dispatch(None, PropertyUpdate::CaptureSettings(config.params)) {
        if let Err(e) = result {
            warn!("{}: {}", name, e);
            if let Some(actual) = registry.get(&name).map(RtlSdrDetector::params) {
                warn!(
                    "{}: using {} Hz, {} S/s, {:.1} dB",
                    name,
                    actual.frequency,
                    actual.sample_rate,
                    actual.gain as f32 / 10.0
                );
            }
        }
    }

    let mut schedule = Schedule::new(&registry, config.capture_count);
    for (name, result) in registry.dispatch(None, PropertyUpdate::StartCapture(config.capture_duration)) {
        if let Err(e) = result {
            error!("{}: {}", name, e);
            schedule.drop_device(&name);
        }
    }

    info!("===========================================");
    info!("  Capturing. Press Ctrl+C to stop.");
    info!("===========================================");

    let mut written = 0u64;
    let mut interval = tokio::time::interval(options.poll_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Main loop - tick the devices and handle what their stream threads reported
    loop {
        if schedule.is_done() {
            info!("All captures finished");
            break;
        }

        tokio::select! {
            _ = interval.tick() => {
                if registry.timer_hit().is_none() {
                    warn!("No connected receivers left");
                    break;
                }
                written += handle_events(&events, &mut registry, &mut schedule, &config);
            }
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        }
    }

    // Cleanup
    registry.dispatch(None, PropertyUpdate::AbortCapture);
    written += handle_events(&events, &mut registry, &mut schedule, &config);
    registry.shutdown();

    info!("Shutdown complete. Capture files written: {}", written);
    Ok(())
}

fn build_registry(
    config: &Config,
    host: Arc<dyn DetectorHost>,
    options: &DetectorOptions,
) -> DeviceRegistry {
    if config.simulation {
        let count = config.simulated_devices;
        info!("Using {} simulated receiver(s)", count);
        let tuners = (0..count).map(|i| (i, Box::new(SimulatedTuner::new(count)) as Box<dyn Tuner>));
        return DeviceRegistry::from_tuners(tuners, host, options);
    }

    info!("Querying RTL-SDR devices via {}...", config.rtl_sdr_path);
    let devices = enumerate_devices(&config.rtl_sdr_path);
    for d in &devices {
        info!(
            "  {} {}: {} {} SN: {}",
            RtlSdrDetector::default_name(),
            d.index,
            d.manufacturer.as_deref().unwrap_or("Unknown"),
            d.product.as_deref().unwrap_or("RTL-SDR"),
            d.serial.as_deref().unwrap_or("-")
        );
    }

    let tuners = devices.iter().map(|d| {
        let tuner: Box<dyn Tuner> = Box::new(RtlSdrProcess::new(config.rtl_sdr_path.clone()));
        (d.index, tuner)
    });
    DeviceRegistry::from_tuners(tuners, host, options)
}

/// Captures still owed per device; `None` means run until interrupted
struct Schedule {
    remaining: HashMap<String, Option<u32>>,
}

impl Schedule {
    fn new(registry: &DeviceRegistry, capture_count: u32) -> Self {
        let count = if capture_count == 0 { None } else { Some(capture_count) };
        let remaining = registry
            .names()
            .into_iter()
            .filter(|n| registry.get(n).is_some_and(RtlSdrDetector::is_connected))
            .map(|n| (n, count))
            .collect();
        Self { remaining }
    }

    /// Count one finished session. Returns whether another should start.
    fn finished(&mut self, device: &str) -> bool {
        match self.remaining.get_mut(device) {
            Some(Some(left)) => {
                *left = left.saturating_sub(1);
                *left > 0
            }
            Some(None) => true,
            None => false,
        }
    }

    fn drop_device(&mut self, device: &str) {
        self.remaining.remove(device);
    }

    fn is_done(&self) -> bool {
        self.remaining.values().all(|left| *left == Some(0))
    }
}

/// Drain queued host events. Returns the number of capture files written.
fn handle_events(
    events: &Receiver<HostEvent>,
    registry: &mut DeviceRegistry,
    schedule: &mut Schedule,
    config: &Config,
) -> u64 {
    let mut written = 0;
    for event in events.try_iter() {
        let device = match event {
            HostEvent::TimeLeft { device, seconds } => {
                debug!("{}: {:.1}s left", device, seconds);
                continue;
            }
            HostEvent::CaptureComplete { device, capture } => {
                match export::save_capture(&config.output_dir, &device, &capture) {
                    Ok(path) => {
                        info!("{}: saved {}", device, path.display());
                        written += 1;
                    }
                    Err(e) => error!("{}: {:#}", device, e),
                }
                device
            }
            HostEvent::CaptureFailed { device, error } => {
                warn!("{}: capture failed: {}", device, error);
                device
            }
        };

        if schedule.finished(&device) {
            let results = registry.dispatch(Some(&device), PropertyUpdate::StartCapture(config.capture_duration));
            for (name, result) in results {
                if let Err(e) = result {
                    error!("{}: {}", name, e);
                    schedule.drop_device(&name);
                }
            }
        }
    }
    written
}
