//! Detector devices and the registry that owns them

mod detector;
mod negotiate;
mod registry;
mod state;

pub use detector::{DetectorOptions, RtlSdrDetector};
pub use registry::{DeviceRegistry, PropertyUpdate};
pub use state::CaptureParams;
