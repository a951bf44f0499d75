//! Configuration loaded from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::device::{CaptureParams, DetectorOptions};
use crate::sdr::DirectSampling;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to rtl_sdr executable
    pub rtl_sdr_path: String,

    /// Use simulated receivers instead of hardware
    pub simulation: bool,

    /// Number of simulated receivers
    pub simulated_devices: u32,

    /// Seconds per capture
    pub capture_duration: f64,

    /// Captures per device before exiting (0 = until interrupted)
    pub capture_count: u32,

    /// Requested receiver settings
    pub params: CaptureParams,

    /// RTL2832U direct sampling branch
    pub direct_sampling: DirectSampling,

    /// Timer tick in milliseconds
    pub poll_interval_ms: u64,

    /// Directory for capture files
    pub output_dir: PathBuf,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = CaptureParams::default();

        Self {
            rtl_sdr_path: std::env::var("RTL_SDR_PATH")
                .unwrap_or_else(|_| "rtl_sdr".to_string()),

            simulation: std::env::var("SIMULATION")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(false),

            simulated_devices: env_or("SIMULATED_DEVICES", 1),

            capture_duration: env_or("CAPTURE_DURATION", 1.0),

            capture_count: env_or("CAPTURE_COUNT", 1),

            params: CaptureParams {
                sample_rate: env_or("SAMPLE_RATE", defaults.sample_rate),
                frequency: env_or("CENTER_FREQ", defaults.frequency),
                bits_per_sample: defaults.bits_per_sample,
                bandwidth: env_or("BANDWIDTH", defaults.bandwidth),
                // Convert to tenths of dB
                gain: (env_or("DEVICE_GAIN", defaults.gain as f32 / 10.0) * 10.0).round() as i32,
            },

            direct_sampling: env_or("DIRECT_SAMPLING", DirectSampling::Off),

            poll_interval_ms: env_or("POLL_INTERVAL_MS", 500),

            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            direct_sampling: self.direct_sampling,
            defaults: self.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_env_or_falls_back() {
        assert_eq!(env_or("RTLSDR_DETECTOR_TEST_UNSET_VAR", 42u32), 42);
    }

    #[test]
    fn test_detector_options() {
        let config = Config {
            rtl_sdr_path: "rtl_sdr".to_string(),
            simulation: true,
            simulated_devices: 1,
            capture_duration: 1.0,
            capture_count: 1,
            params: CaptureParams::default(),
            direct_sampling: DirectSampling::QBranch,
            poll_interval_ms: 250,
            output_dir: PathBuf::from("."),
        };
        let options = config.detector_options();
        assert_eq!(options.poll_interval, Duration::from_millis(250));
        assert_eq!(options.direct_sampling, DirectSampling::QBranch);
        assert_eq!(options.defaults, CaptureParams::default());
    }
}
