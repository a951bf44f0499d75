//! Simulated receiver for running without hardware
//!
//! Streams a deterministic IQ tone paced at the configured sample rate,
//! with the same setting validation and quantisation as real hardware.

use std::f64::consts::PI;
use std::io::Read;
use std::thread;
use std::time::Duration;

use crate::error::TunerError;

use super::tuner::{DirectSampling, SampleSink, Stream, Tuner, TunerSettings};

/// 8-bit unsigned IQ tone, offset `tone_hz` from the centre frequency
pub struct ToneSource {
    sample_rate: u32,
    tone_hz: f64,
    sample: u64,
    pace: bool,
    pending_q: Option<u8>,
}

impl ToneSource {
    pub fn new(sample_rate: u32, tone_hz: f64, pace: bool) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            tone_hz,
            sample: 0,
            pace: pace && sample_rate > 0,
            pending_q: None,
        }
    }

    fn next_pair(&mut self) -> (u8, u8) {
        let phase = 2.0 * PI * self.tone_hz * self.sample as f64 / self.sample_rate as f64;
        self.sample += 1;
        let i = 127.5 + 100.0 * phase.cos();
        let q = 127.5 + 100.0 * phase.sin();
        (i.round() as u8, q.round() as u8)
    }
}

impl Read for ToneSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut written = 0;
        if let Some(q) = self.pending_q.take() {
            if let Some(first) = buf.first_mut() {
                *first = q;
                written = 1;
            }
        }
        while written < buf.len() {
            let (i, q) = self.next_pair();
            buf[written] = i;
            written += 1;
            if written < buf.len() {
                buf[written] = q;
                written += 1;
            } else {
                self.pending_q = Some(q);
            }
        }

        if self.pace {
            // Two bytes per IQ sample
            let secs = written as f64 / (2.0 * self.sample_rate as f64);
            thread::sleep(Duration::from_secs_f64(secs));
        }
        Ok(written)
    }
}

/// Tuner that needs no hardware
pub struct SimulatedTuner {
    device_count: u32,
    tone_hz: f64,
    pace: bool,
    index: Option<u32>,
    settings: TunerSettings,
    stream: Option<Stream>,
}

impl SimulatedTuner {
    pub fn new(device_count: u32) -> Self {
        Self {
            device_count,
            tone_hz: 100_000.0,
            pace: true,
            index: None,
            settings: TunerSettings::default(),
            stream: None,
        }
    }

    /// Deliver samples as fast as they can be generated
    #[cfg(test)]
    pub fn unpaced(mut self) -> Self {
        self.pace = false;
        self
    }

    fn require_open(&self) -> Result<u32, TunerError> {
        self.index.ok_or(TunerError::NotOpen)
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            stream.join();
        }
    }
}

impl Tuner for SimulatedTuner {
    fn open(&mut self, index: u32) -> Result<(), TunerError> {
        if index >= self.device_count {
            return Err(TunerError::NoDevice(index));
        }
        self.index = Some(index);
        self.settings = TunerSettings::default();
        Ok(())
    }

    fn close(&mut self) {
        self.stop_stream();
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
        self.stop_stream();

        let source = ToneSource::new(self.settings.sample_rate, self.tone_hz, self.pace);
        let stream = Stream::spawn(&format!("sim-rtlsdr-{}", index), source, sink, chunk_count, chunk_len)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn cancel_async(&mut self) -> Result<(), TunerError> {
        self.require_open()?;
        self.stop_stream();
        Ok(())
    }
}

impl Drop for SimulatedTuner {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
