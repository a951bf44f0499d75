//! Timed capture sessions
//!
//! 1. Arm a session sized to whole transfer chunks
//! 2. Append streamed chunks into the sample buffer
//! 3. On completion, derive the continuum (square-law) and spectrum (FFT magnitude)

pub mod accumulator;
pub mod session;
pub mod transform;

pub use accumulator::CHUNK_SIZE;
pub use session::{Capture, CaptureOutcome, CaptureRequest, ChunkResult, Session, SessionState};
