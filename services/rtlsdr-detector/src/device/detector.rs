//! RTL-SDR detector device
//!
//! Owns one receiver and its capture session. Control calls (connect,
//! parameters, start, abort, timer) come from the host's poll loop; sample
//! chunks arrive on the tuner's stream thread and are handed to the shared
//! session, which runs the transform and reports back through the host.

use std::ops::{ControlFlow, RangeInclusive};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::capture::session::lock;
use crate::capture::{CaptureRequest, ChunkResult, Session, SessionState, CHUNK_SIZE};
use crate::error::DetectorError;
use crate::host::DetectorHost;
use crate::sdr::{DirectSampling, SampleSink, Tuner, MAX_FREQ_HZ, MIN_FREQ_HZ};

use super::negotiate::negotiate;
use super::state::{CaptureParams, DeviceStats};

/// Remaining time below which a capture is reported as done
const DONE_THRESHOLD_SECS: f64 = 0.1;

/// What this driver can do, announced to the host once at start-up
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub can_abort: bool,
    pub has_continuum: bool,
    pub has_spectrum: bool,
    pub duration: RangeInclusive<f64>,
    pub frequency: RangeInclusive<f64>,
    pub bits_per_sample: u32,
    pub capture_extension: &'static str,
    pub poll_interval: Duration,
}

/// Per-device options taken from configuration
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub poll_interval: Duration,
    pub direct_sampling: DirectSampling,
    pub defaults: CaptureParams,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            direct_sampling: DirectSampling::Off,
            defaults: CaptureParams::default(),
        }
    }
}

pub struct RtlSdrDetector {
    name: String,
    index: u32,
    tuner: Box<dyn Tuner>,
    host: Arc<dyn DetectorHost>,
    options: DetectorOptions,
    connected: bool,
    params: CaptureParams,
    session: Arc<Mutex<Session>>,
    stats: Arc<DeviceStats>,
    done_reported: bool,
}

impl RtlSdrDetector {
    pub fn new(
        index: u32,
        tuner: Box<dyn Tuner>,
        host: Arc<dyn DetectorHost>,
        options: DetectorOptions,
    ) -> Self {
        Self {
            name: format!("{} {}", Self::default_name(), index),
            index,
            tuner,
            host,
            params: options.defaults,
            options,
            connected: false,
            session: Arc::new(Mutex::new(Session::new())),
            stats: Arc::new(DeviceStats::new()),
            done_reported: false,
        }
    }

    pub fn default_name() -> &'static str {
        "RTL-SDR Receiver"
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Settings currently in effect, as read back from hardware
    pub fn params(&self) -> &CaptureParams {
        &self.params
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn session_state(&self) -> SessionState {
        lock(&self.session).state()
    }

    pub fn init_capabilities(&self) -> Capabilities {
        Capabilities {
            can_abort: true,
            has_continuum: true,
            has_spectrum: true,
            duration: 0.1..=10.0,
            // R820T tuning range; direct sampling is not advertised
            frequency: MIN_FREQ_HZ as f64..=MAX_FREQ_HZ as f64,
            bits_per_sample: 8,
            capture_extension: ".fits",
            poll_interval: self.options.poll_interval,
        }
    }

    pub fn connect(&mut self) -> Result<(), DetectorError> {
        if self.connected {
            return Ok(());
        }
        if let Err(source) = self.tuner.open(self.index) {
            error!("Failed to open rtlsdr device index {}.", self.index);
            return Err(DetectorError::DeviceUnavailable {
                index: self.index,
                source,
            });
        }
        self.connected = true;
        info!("{} connected successfully!", self.name);
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), DetectorError> {
        if !self.connected {
            return Ok(());
        }
        if lock(&self.session).abort() {
            self.stats.record_aborted();
        }
        self.tuner.close();
        lock(&self.session).release();
        self.connected = false;
        info!("{} disconnected successfully!", self.name);
        Ok(())
    }

    /// Called after the connection state changes. Loads the default
    /// parameters on connect and returns the poll interval to arm, or
    /// `None` when the timer should not run.
    pub fn update_on_connection_change(&mut self) -> Option<Duration> {
        if !self.connected {
            return None;
        }
        if let Err(e) = self.apply_parameters(self.options.defaults) {
            warn!("{}: default parameters not applied exactly: {}", self.name, e);
        }
        Some(self.options.poll_interval)
    }

    /// Push new receiver settings. The reported parameters always end up
    /// holding what the hardware actually uses.
    pub fn apply_parameters(&mut self, requested: CaptureParams) -> Result<(), DetectorError> {
        if !self.connected {
            return Err(DetectorError::NotConnected);
        }

        let result = negotiate(self.tuner.as_mut(), &requested, self.options.direct_sampling);
        self.params = result.applied;

        if result.is_exact() {
            info!(
                "{}: {} Hz, {} S/s, {:.1} dB, {} Hz bandwidth",
                self.name,
                self.params.frequency,
                self.params.sample_rate,
                self.params.gain as f32 / 10.0,
                self.params.bandwidth
            );
            Ok(())
        } else {
            Err(DetectorError::ParameterRejected {
                adjusted: result.adjusted,
            })
        }
    }

    pub fn start_capture(&mut self, duration: f64) -> Result<(), DetectorError> {
        if !self.connected {
            return Err(DetectorError::NotConnected);
        }
        if !self.init_capabilities().duration.contains(&duration) {
            return Err(DetectorError::InvalidDuration(duration));
        }

        let request = CaptureRequest {
            duration,
            sample_rate: self.params.sample_rate,
            frequency: self.params.frequency,
            gain: self.params.gain,
            bandwidth: self.params.bandwidth,
        };
        let (generation, target) = lock(&self.session).begin(request)?;
        self.done_reported = false;

        let sink = self.sample_sink(generation);
        let chunks = (target / CHUNK_SIZE) as u32;
        let result = self
            .tuner
            .reset_buffer()
            .and_then(|_| self.tuner.read_async(sink, chunks, CHUNK_SIZE as u32));
        if let Err(e) = result {
            lock(&self.session).abort();
            error!("{}: failed to start capture: {}", self.name, e);
            return Err(e.into());
        }

        info!("{}: capturing {:.2}s ({} bytes)", self.name, duration, target);
        Ok(())
    }

    /// Stop the running session and cancel the hardware stream. Idle is a no-op.
    pub fn abort_capture(&mut self) -> Result<(), DetectorError> {
        // Release the session before cancelling; the stream thread may be waiting on it
        let (was_capturing, received) = {
            let mut session = lock(&self.session);
            let received = session.bytes_received();
            (session.abort(), received)
        };
        if !was_capturing {
            return Ok(());
        }
        self.stats.record_aborted();
        self.tuner.cancel_async()?;
        info!("{}: capture aborted after {} bytes", self.name, received);
        Ok(())
    }

    pub fn calc_time_left(&self) -> f64 {
        lock(&self.session).time_left()
    }

    /// Periodic tick. Reports progress while capturing and returns the
    /// delay until the next tick, or `None` once disconnected.
    pub fn timer_hit(&mut self) -> Option<Duration> {
        if !self.connected {
            return None;
        }

        let capturing = lock(&self.session).state() == SessionState::Capturing;
        if capturing {
            let mut time_left = self.calc_time_left();
            if time_left < DONE_THRESHOLD_SECS {
                if !self.done_reported {
                    info!("{}: Capture done, expecting data...", self.name);
                    self.done_reported = true;
                }
                time_left = 0.0;
            }
            self.host.capture_time_left(&self.name, time_left);
        }

        Some(self.options.poll_interval)
    }

    /// Callback handed to the tuner for one session
    fn sample_sink(&self, generation: u64) -> SampleSink {
        let session = self.session.clone();
        let host = self.host.clone();
        let stats = self.stats.clone();
        let name = self.name.clone();

        Box::new(move |chunk: &[u8]| {
            let result = lock(&session).on_chunk(generation, chunk);
            match result {
                ChunkResult::Continue => ControlFlow::Continue(()),
                ChunkResult::Finished(capture) => {
                    stats.record_capture(capture.outcome, capture.continuum.len());
                    match capture.check_complete() {
                        Ok(()) => info!("{}: Download complete.", name),
                        Err(e) => warn!("{}: {}", name, e),
                    }
                    host.capture_complete(&name, capture);
                    ControlFlow::Break(())
                }
                ChunkResult::Failed(e) => {
                    error!("{}: capture failed: {}", name, e);
                    stats.record_failed();
                    host.capture_failed(&name, e);
                    ControlFlow::Break(())
                }
                ChunkResult::Stale => ControlFlow::Break(()),
            }
        })
    }
}

impl Drop for RtlSdrDetector {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}
