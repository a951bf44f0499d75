//! RTL-SDR access via the rtl_sdr executable
//!
//! Enumerates receivers from the device listing rtl_sdr prints on stderr
//! and streams raw 8-bit IQ bytes from its stdout. Settings are held
//! locally and handed to rtl_sdr when a stream is started.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

use crate::error::TunerError;

use super::tuner::{DirectSampling, SampleSink, Stream, Tuner, TunerSettings};

/// Upper bound on receivers handled by one driver process
pub const MAX_DEVICES: usize = 4;

/// One receiver found during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: u32,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
}

/// Sanitize a string to only contain printable ASCII characters
fn sanitize_string(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Parse rtl_sdr's device listing.
///
/// Entries look like `  0:  Realtek, RTL2838UHIDIR, SN: 00000001` and
/// follow a `Found N device(s):` header. At most `MAX_DEVICES` are kept.
pub fn parse_device_listing<I, S>(lines: I) -> Vec<DeviceInfo>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut devices = Vec::new();
    let mut in_listing = false;

    for line in lines {
        let trimmed = line.as_ref().trim();
        if trimmed.starts_with("Found ") && trimmed.contains("device") {
            in_listing = true;
            continue;
        }
        if !in_listing {
            continue;
        }

        let parts: Vec<&str> = trimmed.splitn(2, ':').collect();
        let index = match parts.first().and_then(|p| p.trim().parse::<u32>().ok()) {
            Some(i) if parts.len() == 2 => i,
            _ => {
                in_listing = false;
                continue;
            }
        };

        let fields: Vec<&str> = parts[1].trim().split(',').collect();
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        let manufacturer = fields.first().map(|f| sanitize_string(f)).and_then(non_empty);
        let product = fields.get(1).map(|f| sanitize_string(f)).and_then(non_empty);
        let serial = fields
            .get(2)
            .and_then(|f| f.trim().strip_prefix("SN:"))
            .map(sanitize_string)
            .and_then(non_empty);

        devices.push(DeviceInfo {
            index,
            manufacturer,
            product,
            serial,
        });
        if devices.len() == MAX_DEVICES {
            break;
        }
    }

    devices
}

/// List attached receivers by running rtl_sdr briefly and reading its stderr
pub fn enumerate_devices(rtl_sdr_path: &str) -> Vec<DeviceInfo> {
    let mut cmd = Command::new(rtl_sdr_path);
    cmd.arg("-d").arg("0")
       .arg("-n").arg("1")
       .arg("-")
       .stdout(Stdio::null())
       .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to query RTL-SDR devices: {}", e);
            return Vec::new();
        }
    };

    // Read stderr to EOF before reaping so rtl_sdr never blocks on a full pipe
    let lines: Vec<String> = match child.stderr.take() {
        Some(stderr) => BufReader::new(stderr).lines().map_while(Result::ok).collect(),
        None => Vec::new(),
    };
    if let Err(e) = child.wait() {
        warn!("Failed to reap rtl_sdr: {}", e);
    }

    parse_device_listing(lines)
}

/// Tuner backed by rtl_sdr child processes
pub struct RtlSdrProcess {
    rtl_sdr_path: String,
    index: Option<u32>,
    settings: TunerSettings,
    child: Option<Child>,
    stream: Option<Stream>,
}

impl RtlSdrProcess {
    pub fn new(rtl_sdr_path: impl Into<String>) -> Self {
        Self {
            rtl_sdr_path: rtl_sdr_path.into(),
            index: None,
            settings: TunerSettings::default(),
            child: None,
            stream: None,
        }
    }

    fn require_open(&self) -> Result<u32, TunerError> {
        self.index.ok_or(TunerError::NotOpen)
    }

    fn build_command(&self, index: u32, samples: u64) -> Command {
        // rtl_sdr -d <device> -f <freq> -s <rate> -g <gain> [-D <mode>] -n <samples> -
        let mut cmd = Command::new(&self.rtl_sdr_path);
        cmd.arg("-d").arg(index.to_string())
           .arg("-f").arg(self.settings.center_freq.to_string())
           .arg("-s").arg(self.settings.sample_rate.to_string());

        // rtl_sdr treats gain 0 as automatic
        if self.settings.manual_gain && !self.settings.agc {
            cmd.arg("-g").arg((self.settings.gain as f32 / 10.0).to_string());
        } else {
            cmd.arg("-g").arg("0");
        }

        if self.settings.direct_sampling != DirectSampling::Off {
            cmd.arg("-D").arg(self.settings.direct_sampling.as_arg().to_string());
        }

        cmd.arg("-n").arg(samples.to_string());
        cmd.arg("-");
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    fn reap(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            if let Some(child) = self.child.as_mut() {
                let _ = child.kill();
            }
            stream.join();
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Tuner for RtlSdrProcess {
    fn open(&mut self, index: u32) -> Result<(), TunerError> {
        let found = enumerate_devices(&self.rtl_sdr_path)
            .into_iter()
            .any(|d| d.index == index);
        if !found {
            return Err(TunerError::NoDevice(index));
        }
        self.index = Some(index);
        Ok(())
    }

    fn close(&mut self) {
        self.reap();
        self.index = None;
    }

    fn set_agc_mode(&mut self, enabled: bool) -> Result<(), TunerError> {
        self.require_open()?;
        self.settings.agc = enabled;
        Ok(())
    }

    fn set_direct_sampling(&mut self, mode: DirectSampling) -> Result<(), TunerError> {
        self.require_open()?;
        self.settings.direct_sampling = mode;
        Ok(())
    }

    fn set_tuner_gain_mode(&mut self, manual: bool) -> Result<(), TunerError> {
        self.require_open()?;
        self.settings.manual_gain = manual;
        Ok(())
    }

    fn set_tuner_gain(&mut self, tenth_db: i32) -> Result<(), TunerError> {
        self.require_open()?;
        self.settings.set_gain(tenth_db)
    }

    fn set_tuner_bandwidth(&mut self, hz: u32) -> Result<(), TunerError> {
        self.require_open()?;
        // rtl_sdr has no bandwidth option; the tuner picks its IF filter itself
        self.settings.bandwidth = hz;
        Ok(())
    }

    fn set_center_freq(&mut self, hz: u32) -> Result<(), TunerError> {
        self.require_open()?;
        self.settings.set_center_freq(hz)
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<(), TunerError> {
        self.require_open()?;
        self.settings.set_sample_rate(hz)
    }

    fn tuner_gain(&self) -> i32 {
        self.settings.gain
    }

    fn center_freq(&self) -> u32 {
        self.settings.center_freq
    }

    fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }

    fn reset_buffer(&mut self) -> Result<(), TunerError> {
        self.require_open()?;
        // A fresh rtl_sdr process starts with empty USB buffers
        Ok(())
    }

    fn read_async(
        &mut self,
        sink: SampleSink,
        chunk_count: u32,
        chunk_len: u32,
    ) -> Result<(), TunerError> {
        let index = self.require_open()?;
        // A leftover stream belongs to a finished session and stops on its next chunk
        self.reap();

        // rtl_sdr counts IQ samples, two bytes each
        let samples = (chunk_count as u64 * chunk_len as u64).div_ceil(2);
        let mut cmd = self.build_command(index, samples);
        info!("Executing: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|source| TunerError::Spawn {
            path: self.rtl_sdr_path.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or(TunerError::NotOpen)?;

        // Spawn stderr reader for logging
        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    if !line.trim().is_empty() {
                        debug!("[rtl_sdr] {}", line.trim());
                    }
                }
            });
        }

        let stream = Stream::spawn(&format!("rtlsdr-{}", index), stdout, sink, chunk_count, chunk_len)?;
        self.child = Some(child);
        self.stream = Some(stream);
        Ok(())
    }

    fn cancel_async(&mut self) -> Result<(), TunerError> {
        self.require_open()?;
        self.reap();
        Ok(())
    }
}

impl Drop for RtlSdrProcess {
    fn drop(&mut self) {
        self.reap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_listing() {
        let output = [
            "Found 2 device(s):",
            "  0:  Realtek, RTL2838UHIDIR, SN: 00000001",
            "  1:  Generic, RTL2832U, SN: 77771111",
            "",
            "Using device 0: Generic RTL2832U OEM",
        ];
        let devices = parse_device_listing(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[0].manufacturer.as_deref(), Some("Realtek"));
        assert_eq!(devices[0].product.as_deref(), Some("RTL2838UHIDIR"));
        assert_eq!(devices[0].serial.as_deref(), Some("00000001"));
        assert_eq!(devices[1].serial.as_deref(), Some("77771111"));
    }

    #[test]
    fn test_parse_device_listing_none() {
        let devices = parse_device_listing(["No supported devices found."]);
        assert!(devices.is_empty());
    }

    #[test]
    fn test_parse_device_listing_caps_at_max() {
        let mut output = vec!["Found 6 device(s):".to_string()];
        for i in 0..6 {
            output.push(format!("  {}:  Realtek, RTL2838UHIDIR, SN: {:08}", i, i));
        }
        assert_eq!(parse_device_listing(output).len(), MAX_DEVICES);
    }

    /// Number of exited but unreaped children of this process
    #[cfg(target_os = "linux")]
    fn zombie_children() -> usize {
        let me = std::process::id().to_string();
        std::fs::read_dir("/proc")
            .unwrap()
            .filter_map(|entry| std::fs::read_to_string(entry.ok()?.path().join("stat")).ok())
            .filter(|stat| {
                // pid (comm) state ppid ...
                let fields: Vec<&str> = stat.rsplit(')').next().unwrap_or("").split_whitespace().collect();
                fields.first() == Some(&"Z") && fields.get(1) == Some(&me.as_str())
            })
            .count()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_enumerate_devices_reaps_child() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("rtl_sdr");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             echo 'Found 1 device(s):' >&2\n\
             echo '  0:  Realtek, RTL2838UHIDIR, SN: 00000001' >&2\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let path = script.to_str().unwrap();

        for _ in 0..3 {
            let devices = enumerate_devices(path);
            assert_eq!(devices.len(), 1);
            assert_eq!(devices[0].serial.as_deref(), Some("00000001"));
        }
        assert_eq!(zombie_children(), 0);

        let mut tuner = RtlSdrProcess::new(path);
        tuner.open(0).unwrap();
        assert!(matches!(tuner.open(3), Err(TunerError::NoDevice(3))));
        assert_eq!(zombie_children(), 0);
    }

    #[test]
    fn test_settings_require_open() {
        let mut tuner = RtlSdrProcess::new("rtl_sdr");
        assert!(matches!(tuner.set_center_freq(100_000_000), Err(TunerError::NotOpen)));
        assert!(matches!(tuner.cancel_async(), Err(TunerError::NotOpen)));
    }

    #[test]
    fn test_command_arguments() {
        let mut tuner = RtlSdrProcess::new("rtl_sdr");
        tuner.index = Some(1);
        tuner.set_tuner_gain_mode(true).unwrap();
        tuner.set_tuner_gain(100).unwrap();
        tuner.set_center_freq(100_000_000).unwrap();
        tuner.set_sample_rate(1_024_000).unwrap();

        let cmd = tuner.build_command(1, 5120);
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(
            args,
            ["-d", "1", "-f", "100000000", "-s", "1024000", "-g", "8.7", "-n", "5120", "-"]
        );
    }
}
