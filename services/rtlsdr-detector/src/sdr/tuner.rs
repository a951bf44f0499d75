//! Hardware layer abstraction for RTL2832U receivers
//!
//! Mirrors the librtlsdr call surface the detector needs. Gains are in
//! tenths of dB, frequencies and rates in Hz. Backends quantise readbacks
//! the way an R820T tuner does so callers see the values actually applied.

use std::io::Read;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::TunerError;

/// Receives each chunk delivered by an asynchronous read.
///
/// A zero-length chunk marks the end of the stream. Returning
/// `ControlFlow::Break` stops the stream before the next chunk.
pub type SampleSink = Box<dyn FnMut(&[u8]) -> ControlFlow<()> + Send + 'static>;

/// RTL2832U direct sampling branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectSampling {
    #[default]
    Off,
    IBranch,
    QBranch,
}

impl DirectSampling {
    pub fn as_arg(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::IBranch => 1,
            Self::QBranch => 2,
        }
    }
}

impl std::str::FromStr for DirectSampling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(Self::Off),
            "i" | "1" => Ok(Self::IBranch),
            "q" | "2" => Ok(Self::QBranch),
            other => Err(format!("unknown direct sampling mode '{}'", other)),
        }
    }
}

/// Hardware operations used by the detector
pub trait Tuner: Send {
    fn open(&mut self, index: u32) -> Result<(), TunerError>;
    fn close(&mut self);

    fn set_agc_mode(&mut self, enabled: bool) -> Result<(), TunerError>;
    fn set_direct_sampling(&mut self, mode: DirectSampling) -> Result<(), TunerError>;
    fn set_tuner_gain_mode(&mut self, manual: bool) -> Result<(), TunerError>;
    fn set_tuner_gain(&mut self, tenth_db: i32) -> Result<(), TunerError>;
    fn set_tuner_bandwidth(&mut self, hz: u32) -> Result<(), TunerError>;
    fn set_center_freq(&mut self, hz: u32) -> Result<(), TunerError>;
    fn set_sample_rate(&mut self, hz: u32) -> Result<(), TunerError>;

    fn tuner_gain(&self) -> i32;
    fn center_freq(&self) -> u32;
    fn sample_rate(&self) -> u32;

    fn reset_buffer(&mut self) -> Result<(), TunerError>;

    /// Start streaming `chunk_count` chunks of `chunk_len` bytes into `sink`.
    /// Returns immediately; chunks arrive on a backend thread.
    fn read_async(
        &mut self,
        sink: SampleSink,
        chunk_count: u32,
        chunk_len: u32,
    ) -> Result<(), TunerError>;

    fn cancel_async(&mut self) -> Result<(), TunerError>;
}

/// R820T gain steps in tenths of dB
pub const R820T_GAINS: [i32; 29] = [
    0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297, 328, 338, 364,
    372, 386, 402, 421, 434, 439, 445, 480, 496,
];

const RTL_XTAL_HZ: f64 = 28_800_000.0;

/// Tuner range of the R820T
pub const MIN_FREQ_HZ: u32 = 24_000_000;
pub const MAX_FREQ_HZ: u32 = 1_766_000_000;

/// Snap a requested gain to the nearest supported step (ties go low)
pub fn nearest_gain(tenth_db: i32) -> i32 {
    R820T_GAINS
        .iter()
        .copied()
        .min_by_key(|g| (g - tenth_db).abs())
        .unwrap_or(0)
}

/// Rate the RTL2832U resampler actually produces for a requested rate
pub fn resampled_rate(hz: u32) -> Result<u32, TunerError> {
    let valid = (225_001..=300_000).contains(&hz) || (900_001..=3_200_000).contains(&hz);
    if !valid {
        return Err(TunerError::InvalidArgument {
            name: "sample rate",
            value: hz as i64,
        });
    }

    let scaled = RTL_XTAL_HZ * (1u64 << 22) as f64;
    let mut ratio = (scaled / hz as f64) as u32;
    ratio &= 0x0fff_fffc;
    let real_ratio = ratio | ((ratio & 0x0800_0000) << 1);
    Ok((scaled / real_ratio as f64) as u32)
}

/// Register-level state shared by every backend
#[derive(Debug, Clone, Default)]
pub struct TunerSettings {
    pub agc: bool,
    pub direct_sampling: DirectSampling,
    pub manual_gain: bool,
    pub gain: i32,
    pub bandwidth: u32,
    pub center_freq: u32,
    pub sample_rate: u32,
}

impl TunerSettings {
    pub fn set_gain(&mut self, tenth_db: i32) -> Result<(), TunerError> {
        if !self.manual_gain {
            return Err(TunerError::InvalidArgument {
                name: "gain (tuner in auto gain mode)",
                value: tenth_db as i64,
            });
        }
        self.gain = nearest_gain(tenth_db);
        Ok(())
    }

    pub fn set_center_freq(&mut self, hz: u32) -> Result<(), TunerError> {
        if self.direct_sampling == DirectSampling::Off && !(MIN_FREQ_HZ..=MAX_FREQ_HZ).contains(&hz) {
            return Err(TunerError::InvalidArgument {
                name: "center frequency",
                value: hz as i64,
            });
        }
        self.center_freq = hz;
        Ok(())
    }

    pub fn set_sample_rate(&mut self, hz: u32) -> Result<(), TunerError> {
        self.sample_rate = resampled_rate(hz)?;
        Ok(())
    }
}

/// A running asynchronous read
pub struct Stream {
    running: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl Stream {
    /// Pump `source` into `sink` on a named thread, `chunk_len` bytes at a time.
    ///
    /// A short read is delivered as-is and followed by the end-of-stream
    /// marker. No marker is sent once the stream has been stopped.
    pub fn spawn<R>(
        name: &str,
        mut source: R,
        mut sink: SampleSink,
        chunk_count: u32,
        chunk_len: u32,
    ) -> Result<Self, TunerError>
    where
        R: Read + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut buf = vec![0u8; chunk_len as usize];
                for _ in 0..chunk_count {
                    if !flag.load(Ordering::SeqCst) {
                        return;
                    }
                    let filled = match fill(&mut source, &mut buf) {
                        Ok(n) => n,
                        Err(e) => {
                            warn!("Sample stream read failed: {}", e);
                            0
                        }
                    };
                    if filled == 0 {
                        break;
                    }
                    if sink(&buf[..filled]).is_break() {
                        flag.store(false, Ordering::SeqCst);
                        return;
                    }
                    if filled < buf.len() {
                        debug!("Short read of {} bytes, ending stream", filled);
                        break;
                    }
                }
                if flag.load(Ordering::SeqCst) {
                    let _ = sink(&[]);
                }
                flag.store(false, Ordering::SeqCst);
            })?;

        Ok(Self { running, worker })
    }

    /// Ask the worker to stop after its current chunk
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn join(self) {
        if self.worker.join().is_err() {
            warn!("Sample stream worker panicked");
        }
    }
}

/// Read until `buf` is full or the source is exhausted
fn fill<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[test]
    fn test_nearest_gain() {
        assert_eq!(nearest_gain(0), 0);
        assert_eq!(nearest_gain(100), 87);
        assert_eq!(nearest_gain(496), 496);
        assert_eq!(nearest_gain(1000), 496);
        assert_eq!(nearest_gain(-50), 0);
    }

    #[test]
    fn test_resampled_rate_exact() {
        assert_eq!(resampled_rate(1_024_000).unwrap(), 1_024_000);
        assert_eq!(resampled_rate(2_048_000).unwrap(), 2_048_000);
    }

    #[test]
    fn test_resampled_rate_quantised() {
        let real = resampled_rate(2_000_000).unwrap();
        assert!(real.abs_diff(2_000_000) < 10);
        assert!(resampled_rate(10_000).is_err());
        assert!(resampled_rate(500_000).is_err());
        assert!(resampled_rate(3_200_001).is_err());
    }

    #[test]
    fn test_gain_requires_manual_mode() {
        let mut settings = TunerSettings::default();
        assert!(settings.set_gain(100).is_err());
        settings.manual_gain = true;
        settings.set_gain(100).unwrap();
        assert_eq!(settings.gain, 87);
    }

    #[test]
    fn test_direct_sampling_parse() {
        assert_eq!("off".parse::<DirectSampling>().unwrap(), DirectSampling::Off);
        assert_eq!("Q".parse::<DirectSampling>().unwrap(), DirectSampling::QBranch);
        assert!("x".parse::<DirectSampling>().is_err());
    }

    fn collecting_sink(seen: Arc<Mutex<Vec<usize>>>) -> SampleSink {
        Box::new(move |chunk: &[u8]| {
            seen.lock().unwrap().push(chunk.len());
            ControlFlow::Continue(())
        })
    }

    #[test]
    fn test_stream_chunks_then_end_marker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = Cursor::new(vec![7u8; 2048]);
        let stream = Stream::spawn("test-stream", source, collecting_sink(seen.clone()), 4, 512).unwrap();
        stream.join();
        assert_eq!(*seen.lock().unwrap(), vec![512, 512, 512, 512, 0]);
    }

    #[test]
    fn test_stream_short_source() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = Cursor::new(vec![7u8; 700]);
        let stream = Stream::spawn("test-stream", source, collecting_sink(seen.clone()), 4, 512).unwrap();
        stream.join();
        assert_eq!(*seen.lock().unwrap(), vec![512, 188, 0]);
    }

    #[test]
    fn test_stream_break_stops_without_marker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let sink: SampleSink = Box::new(move |chunk: &[u8]| {
            let mut log = log.lock().unwrap();
            log.push(chunk.len());
            if log.len() == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        let stream = Stream::spawn("test-stream", Cursor::new(vec![0u8; 4096]), sink, 8, 512).unwrap();
        stream.join();
        assert_eq!(*seen.lock().unwrap(), vec![512, 512]);
    }
}
