//! Raw sample accumulation for one capture session

use crate::error::DetectorError;

/// Bytes per asynchronous transfer
pub const CHUNK_SIZE: usize = 512;

/// Bytes to collect for a capture of `duration` seconds at `sample_rate`.
///
/// Rounds up to the next chunk boundary. Counts that are already aligned
/// are kept as-is and a zero-length request still gets one chunk.
pub fn target_bytes(sample_rate: f64, duration: f64) -> usize {
    let requested = (sample_rate * duration).max(0.0);
    // absorb float noise such as 1_024_000.0 * 0.1 = 102400.00000000001
    let requested = if (requested - requested.round()).abs() < 1e-6 {
        requested.round()
    } else {
        requested.ceil()
    };
    (requested as usize).div_ceil(CHUNK_SIZE).max(1) * CHUNK_SIZE
}

/// Destination for streamed chunks.
///
/// The backing storage is kept between sessions and only reallocated when
/// the session size changes.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    data: Vec<u8>,
    received: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for a session of `target` bytes
    pub fn reset(&mut self, target: usize) {
        if self.data.len() != target {
            self.data = vec![0u8; target];
        }
        self.received = 0;
    }

    /// Append a chunk in arrival order. A chunk that does not fit is
    /// rejected whole and nothing is written.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), DetectorError> {
        let end = self.received + chunk.len();
        if end > self.data.len() {
            return Err(DetectorError::BufferOverrun {
                capacity: self.data.len(),
                attempted: chunk.len(),
            });
        }
        self.data[self.received..end].copy_from_slice(chunk);
        self.received = end;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.received
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes received so far
    pub fn samples(&self) -> &[u8] {
        &self.data[..self.received]
    }

    /// Free the storage once the device is done with it
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.received = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_rounds_up_to_chunk() {
        assert_eq!(target_bytes(10_000.0, 1.0), 10_240);
    }

    #[test]
    fn test_target_aligned_is_kept() {
        // No extra chunk when the count is already on a boundary
        assert_eq!(target_bytes(5_120.0, 1.0), 5_120);
        assert_eq!(target_bytes(1_024_000.0, 0.1), 102_400);
    }

    #[test]
    fn test_target_is_positive_multiple() {
        for &rate in &[1.0, 250_000.0, 1_024_000.0, 2_048_000.0, 3_200_000.0] {
            for &duration in &[0.0, 0.1, 0.37, 1.0, 2.5, 10.0] {
                let target = target_bytes(rate, duration);
                assert!(target > 0);
                assert_eq!(target % CHUNK_SIZE, 0);
                assert!(target as f64 >= (rate * duration).floor());
                assert!(target - CHUNK_SIZE < ((rate * duration).ceil() as usize).max(1));
            }
        }
    }

    #[test]
    fn test_target_zero_duration_gets_one_chunk() {
        assert_eq!(target_bytes(1_024_000.0, 0.0), CHUNK_SIZE);
    }

    #[test]
    fn test_append_in_order() {
        let mut buffer = SampleBuffer::new();
        buffer.reset(1024);
        buffer.append(&[1u8; 512]).unwrap();
        buffer.append(&[2u8; 300]).unwrap();

        assert_eq!(buffer.received(), 812);
        assert_eq!(buffer.remaining(), 212);
        assert!(buffer.samples()[..512].iter().all(|&b| b == 1));
        assert!(buffer.samples()[512..].iter().all(|&b| b == 2));
        assert!(!buffer.is_full());

        buffer.append(&[3u8; 212]).unwrap();
        assert!(buffer.is_full());
    }

    #[test]
    fn test_append_overrun_rejected() {
        let mut buffer = SampleBuffer::new();
        buffer.reset(512);
        buffer.append(&[1u8; 400]).unwrap();

        let err = buffer.append(&[9u8; 200]).unwrap_err();
        assert!(matches!(
            err,
            DetectorError::BufferOverrun { capacity: 512, attempted: 200 }
        ));
        assert_eq!(buffer.received(), 400);
        assert!(buffer.samples().iter().all(|&b| b == 1));
    }

    #[test]
    fn test_reset_reuses_storage_of_same_size() {
        let mut buffer = SampleBuffer::new();
        buffer.reset(2048);
        buffer.append(&[5u8; 512]).unwrap();
        let ptr = buffer.samples().as_ptr();

        buffer.reset(2048);
        assert_eq!(buffer.received(), 0);
        buffer.append(&[6u8; 1]).unwrap();
        assert_eq!(buffer.samples().as_ptr(), ptr);

        buffer.reset(4096);
        assert_eq!(buffer.capacity(), 4096);
    }
}
