//! RTL-SDR hardware access
//!
//! 1. `Tuner` - librtlsdr-shaped control and asynchronous streaming
//! 2. `RtlSdrProcess` - real receivers driven through rtl_sdr
//! 3. `SimulatedTuner` - a tone generator for running without hardware

pub mod process;
pub mod simulator;
pub mod tuner;

pub use process::{enumerate_devices, RtlSdrProcess};
pub use simulator::SimulatedTuner;
pub use tuner::{DirectSampling, SampleSink, Tuner, MAX_FREQ_HZ, MIN_FREQ_HZ};
