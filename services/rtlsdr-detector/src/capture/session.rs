//! Capture session state machine
//!
//! Shared between the control side (start, abort, progress) and the
//! hardware callback thread (chunk delivery), always behind a mutex.
//! Each session gets a new generation number so chunks still in flight
//! from an aborted session can never land in the next one.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::DetectorError;

use super::accumulator::{target_bytes, SampleBuffer};
use super::transform::{square_law, SpectrumAnalyzer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
}

/// Settings a capture runs with, fixed once the session starts
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CaptureRequest {
    /// Seconds
    pub duration: f64,
    pub sample_rate: u32,
    pub frequency: u32,
    /// Tenths of dB
    pub gain: i32,
    pub bandwidth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Every expected byte arrived
    Completed,
    /// The stream ended early; products cover what did arrive
    Incomplete,
}

/// Data products of one finished session
#[derive(Debug, Clone)]
pub struct Capture {
    pub outcome: CaptureOutcome,
    pub request: CaptureRequest,
    pub started_at: DateTime<Utc>,
    pub expected_bytes: usize,
    pub continuum: Vec<u8>,
    pub spectrum: Vec<u8>,
}

impl Capture {
    /// `Err(IncompleteCapture)` when the stream ended before the buffer filled
    pub fn check_complete(&self) -> Result<(), DetectorError> {
        match self.outcome {
            CaptureOutcome::Completed => Ok(()),
            CaptureOutcome::Incomplete => Err(DetectorError::IncompleteCapture {
                received: self.continuum.len(),
                expected: self.expected_bytes,
            }),
        }
    }
}

/// What the callback should do after handing a chunk to the session
#[derive(Debug)]
pub enum ChunkResult {
    Continue,
    Finished(Capture),
    Failed(DetectorError),
    /// No session is waiting for this chunk
    Stale,
}

pub struct Session {
    state: SessionState,
    generation: u64,
    buffer: SampleBuffer,
    analyzer: SpectrumAnalyzer,
    request: Option<CaptureRequest>,
    started: Option<Instant>,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            buffer: SampleBuffer::new(),
            analyzer: SpectrumAnalyzer::new(),
            request: None,
            started: None,
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bytes_received(&self) -> usize {
        self.buffer.received()
    }

    /// Arm a new session. Returns its generation and the byte count to stream.
    pub fn begin(&mut self, request: CaptureRequest) -> Result<(u64, usize), DetectorError> {
        if self.state == SessionState::Capturing {
            return Err(DetectorError::CaptureInProgress);
        }

        let target = target_bytes(request.sample_rate as f64, request.duration);
        self.buffer.reset(target);
        self.generation += 1;
        self.request = Some(request);
        self.started = Some(Instant::now());
        self.started_at = Utc::now();
        self.state = SessionState::Capturing;

        debug!(
            "Session {} armed: {} bytes for {:.3}s at {} Hz",
            self.generation, target, request.duration, request.sample_rate
        );
        Ok((self.generation, target))
    }

    /// Accept one chunk from the stream started for `generation`.
    ///
    /// A zero-length chunk is the end-of-stream marker and finishes the
    /// session with whatever has arrived.
    pub fn on_chunk(&mut self, generation: u64, chunk: &[u8]) -> ChunkResult {
        if self.state != SessionState::Capturing || generation != self.generation {
            return ChunkResult::Stale;
        }

        if chunk.is_empty() {
            let outcome = if self.buffer.is_full() {
                CaptureOutcome::Completed
            } else {
                CaptureOutcome::Incomplete
            };
            return ChunkResult::Finished(self.finish(outcome));
        }

        if let Err(e) = self.buffer.append(chunk) {
            self.state = SessionState::Idle;
            return ChunkResult::Failed(e);
        }

        if self.buffer.is_full() {
            return ChunkResult::Finished(self.finish(CaptureOutcome::Completed));
        }
        ChunkResult::Continue
    }

    /// Run the transform pipeline over the received bytes and go idle
    fn finish(&mut self, outcome: CaptureOutcome) -> Capture {
        let samples = self.buffer.samples();
        let continuum = square_law(samples);
        let spectrum = self.analyzer.spectrum(samples);
        self.state = SessionState::Idle;

        Capture {
            outcome,
            request: self.request.unwrap_or_default(),
            started_at: self.started_at,
            expected_bytes: self.buffer.capacity(),
            continuum,
            spectrum,
        }
    }

    /// Drop back to idle. Returns whether a session was running.
    pub fn abort(&mut self) -> bool {
        let was_capturing = self.state == SessionState::Capturing;
        self.state = SessionState::Idle;
        was_capturing
    }

    /// Requested duration minus time elapsed since start; negative once overdue
    pub fn time_left(&self) -> f64 {
        match (self.request, self.started) {
            (Some(request), Some(started)) => request.duration - started.elapsed().as_secs_f64(),
            _ => 0.0,
        }
    }

    /// Free the sample storage, e.g. on disconnect
    pub fn release(&mut self) {
        self.state = SessionState::Idle;
        self.buffer.release();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock the session, recovering from a poisoned lock since the state is plain data
pub fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
