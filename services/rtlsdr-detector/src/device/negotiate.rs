//! Applying receiver settings and reading back what the hardware accepted

use tracing::warn;

use crate::error::TunerError;
use crate::sdr::{DirectSampling, Tuner};

use super::state::CaptureParams;

/// Result of pushing a set of parameters to the tuner
#[derive(Debug)]
pub struct Negotiation {
    /// Values now in effect, taken from hardware readback where available
    pub applied: CaptureParams,
    /// Settings the hardware refused or changed
    pub adjusted: Vec<&'static str>,
    pub errors: Vec<TunerError>,
}

impl Negotiation {
    pub fn is_exact(&self) -> bool {
        self.adjusted.is_empty() && self.errors.is_empty()
    }
}

/// Configure manual gain, then gain, bandwidth, frequency and sample rate
/// in that order. Every step is attempted even after a failure.
pub fn negotiate(
    tuner: &mut dyn Tuner,
    requested: &CaptureParams,
    direct_sampling: DirectSampling,
) -> Negotiation {
    let mut adjusted = Vec::new();
    let mut errors = Vec::new();

    let steps: [(&'static str, Result<(), TunerError>); 7] = [
        ("agc", tuner.set_agc_mode(false)),
        ("direct sampling", tuner.set_direct_sampling(direct_sampling)),
        ("gain mode", tuner.set_tuner_gain_mode(true)),
        ("gain", tuner.set_tuner_gain(requested.gain)),
        ("bandwidth", tuner.set_tuner_bandwidth(requested.bandwidth)),
        ("frequency", tuner.set_center_freq(requested.frequency)),
        ("sample rate", tuner.set_sample_rate(requested.sample_rate)),
    ];
    for (name, result) in steps {
        if let Err(e) = result {
            warn!("Failed to set {}: {}", name, e);
            adjusted.push(name);
            errors.push(e);
        }
    }

    let mut applied = *requested;

    let gain = tuner.tuner_gain();
    if gain != requested.gain {
        applied.gain = gain;
        push_unique(&mut adjusted, "gain");
    }
    let frequency = tuner.center_freq();
    if frequency != requested.frequency {
        applied.frequency = frequency;
        push_unique(&mut adjusted, "frequency");
    }
    let sample_rate = tuner.sample_rate();
    if sample_rate != requested.sample_rate {
        applied.sample_rate = sample_rate;
        push_unique(&mut adjusted, "sample rate");
    }

    Negotiation {
        applied,
        adjusted,
        errors,
    }
}

fn push_unique(list: &mut Vec<&'static str>, name: &'static str) {
    if !list.contains(&name) {
        list.push(name);
    }
}
