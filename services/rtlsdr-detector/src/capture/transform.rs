//! Continuum and spectrum products from raw 8-bit samples
//!
//! Samples are offset binary: 127.5 is zero amplitude. The continuum is the
//! square-law (power) detector output and the spectrum is the averaged FFT
//! magnitude of the same bytes, both rescaled into 8 bits.

use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// Bins in the spectrum product
pub const SPECTRUM_SIZE: usize = 256;

/// Real input points per FFT segment; yields `SPECTRUM_SIZE` positive-frequency bins
const SEGMENT_LEN: usize = SPECTRUM_SIZE * 2;

const ZERO_LEVEL: f32 = 127.5;

/// Square-law detector: output grows with the square of the sample's
/// distance from zero amplitude, full scale maps to 255.
pub fn square_law(samples: &[u8]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| {
            let amplitude = (s as f32 - ZERO_LEVEL) / ZERO_LEVEL;
            (amplitude * amplitude * 255.0).round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Mean sample value, summed exactly so long captures do not drift
fn dc_mean(samples: &[u8]) -> f32 {
    let sum: u64 = samples.iter().map(|&s| s as u64).sum();
    (sum as f64 / samples.len() as f64) as f32
}

/// Averaged magnitude spectrum (Bartlett's method) with a planned FFT
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(SEGMENT_LEN);
        Self { fft }
    }

    /// Magnitude of the first `SPECTRUM_SIZE` bins averaged over all
    /// segments, before scaling. The trailing partial segment is zero padded.
    pub fn magnitudes(&self, samples: &[u8]) -> Vec<f32> {
        let mut bins = vec![0f32; SPECTRUM_SIZE];
        if samples.is_empty() {
            return bins;
        }

        // Remove DC so bin 0 does not swamp everything else
        let mean = dc_mean(samples);

        let mut segment = vec![Complex32::new(0.0, 0.0); SEGMENT_LEN];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
        let mut segments = 0usize;

        for chunk in samples.chunks(SEGMENT_LEN) {
            for (i, slot) in segment.iter_mut().enumerate() {
                let value = chunk.get(i).map_or(0.0, |&s| s as f32 - mean);
                *slot = Complex32::new(value, 0.0);
            }
            self.fft.process_with_scratch(&mut segment, &mut scratch);
            for (bin, value) in bins.iter_mut().zip(&segment) {
                *bin += value.norm();
            }
            segments += 1;
        }

        for bin in &mut bins {
            *bin /= segments as f32;
        }
        bins
    }

    /// Spectrum product: magnitudes scaled so the strongest bin is 255
    pub fn spectrum(&self, samples: &[u8]) -> Vec<u8> {
        let magnitudes = self.magnitudes(samples);
        let peak = magnitudes.iter().copied().fold(0f32, f32::max);
        if peak <= f32::EPSILON {
            return vec![0u8; SPECTRUM_SIZE];
        }
        magnitudes
            .iter()
            .map(|m| (m / peak * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(bin: usize, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let phase = 2.0 * PI * bin as f32 * i as f32 / SEGMENT_LEN as f32;
                (127.5 + 100.0 * phase.cos()).round() as u8
            })
            .collect()
    }

    #[test]
    fn test_square_law() {
        let out = square_law(&[0, 127, 128, 255]);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 255);
        assert_eq!(out[1], 0);
        assert_eq!(out[2], 0);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn test_square_law_grows_with_amplitude() {
        let out = square_law(&[128, 160, 192, 224, 255]);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
        let out = square_law(&[127, 96, 64, 32, 0]);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_dc_mean_long_capture() {
        // 10 s at 3.2 MS/s
        let samples: Vec<u8> = (0..32_000_000u32).map(|i| if i % 2 == 0 { 127 } else { 128 }).collect();
        assert!((dc_mean(&samples) - 127.5).abs() < 1e-4);
        assert_eq!(dc_mean(&[10, 20, 30]), 20.0);
    }

    #[test]
    fn test_spectrum_size_fixed() {
        let analyzer = SpectrumAnalyzer::new();
        assert_eq!(analyzer.spectrum(&[]).len(), SPECTRUM_SIZE);
        assert_eq!(analyzer.spectrum(&[128u8; 100]).len(), SPECTRUM_SIZE);
        assert_eq!(analyzer.spectrum(&tone(10, 10_240)).len(), SPECTRUM_SIZE);
    }

    #[test]
    fn test_spectrum_peak_at_tone() {
        let analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.spectrum(&tone(32, 4 * SEGMENT_LEN));

        let (peak_bin, &peak) = spectrum
            .iter()
            .enumerate()
            .max_by_key(|&(_, v)| *v)
            .unwrap();
        assert_eq!(peak_bin, 32);
        assert_eq!(peak, 255);
        assert!(spectrum[100] < 20);
    }

    #[test]
    fn test_spectrum_flat_input() {
        let analyzer = SpectrumAnalyzer::new();
        assert!(analyzer.spectrum(&[200u8; 1024]).iter().all(|&b| b == 0));
    }
}
