//! Camera input module.
//!
//! Provides paired left/right capture from two devices, a background
//! capture thread publishing the latest pair, and placeholder frames for
//! devices that are missing or failing.

mod capture;
mod device;
mod frame;
mod placeholder;
mod source;
mod synthetic;

pub use capture::CaptureLoop;
pub use device::{
    open_device, probe_backend, BackendPreference, CameraBackend, DeviceError, DeviceSettings,
    FrameDevice,
};
pub use frame::{FramePair, Side};
pub use placeholder::{placeholder_frame, placeholder_pair};
pub use source::FrameSource;
pub use synthetic::SyntheticDevice;
