//! Per-device state tracking

use std::sync::atomic::{AtomicU64, Ordering};

use crate::capture::CaptureOutcome;

/// Statistics for a single device
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub captures_completed: AtomicU64,
    pub captures_incomplete: AtomicU64,
    pub captures_aborted: AtomicU64,
    pub captures_failed: AtomicU64,
    pub bytes_captured: AtomicU64,
}

impl DeviceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_capture(&self, outcome: CaptureOutcome, bytes: usize) {
        match outcome {
            CaptureOutcome::Completed => self.captures_completed.fetch_add(1, Ordering::Relaxed),
            CaptureOutcome::Incomplete => self.captures_incomplete.fetch_add(1, Ordering::Relaxed),
        };
        self.bytes_captured.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.captures_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.captures_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_completed(&self) -> u64 {
        self.captures_completed.load(Ordering::Relaxed)
    }

    pub fn get_incomplete(&self) -> u64 {
        self.captures_incomplete.load(Ordering::Relaxed)
    }

    pub fn get_aborted(&self) -> u64 {
        self.captures_aborted.load(Ordering::Relaxed)
    }

    pub fn get_failed(&self) -> u64 {
        self.captures_failed.load(Ordering::Relaxed)
    }

    pub fn get_bytes(&self) -> u64 {
        self.bytes_captured.load(Ordering::Relaxed)
    }
}

/// Receiver settings as requested by a client or reported back by hardware
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureParams {
    pub sample_rate: u32,
    pub frequency: u32,
    pub bits_per_sample: u32,
    pub bandwidth: u32,
    /// Tenths of dB
    pub gain: i32,
}

impl Default for CaptureParams {
    /// 8 bit receiver at 100 MHz, 10 kHz bandwidth, 8.7 dB (an R820T gain step)
    fn default() -> Self {
        Self {
            sample_rate: 1_024_000,
            frequency: 100_000_000,
            bits_per_sample: 8,
            bandwidth: 10_000,
            gain: 87,
        }
    }
}
