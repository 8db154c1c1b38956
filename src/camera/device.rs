//! Capture device backends.
//!
//! Each backend implements [`FrameDevice`]. The backend is chosen once at
//! startup, either explicitly from configuration or by [`probe_backend`].

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, VideoCaptureAPIs};
use serde::{Deserialize, Serialize};

use super::synthetic::SyntheticDevice;
use crate::config::CameraConfig;

/// Device open/read errors.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device {0} is unavailable")]
    Unavailable(String),
    #[error("read from {0} returned no frame")]
    NoFrame(String),
    #[error("GStreamer backend selected but no pipeline template is configured")]
    MissingPipeline,
    #[error("OpenCV error: {0}")]
    Vision(#[from] opencv::Error),
}

/// Backend requested in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Resolve with [`probe_backend`].
    #[default]
    Auto,
    OpenCv,
    GStreamer,
    Synthetic,
}

/// Concrete capture backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraBackend {
    /// Generic video device by index (V4L2, AVFoundation, MSMF...).
    OpenCv,
    /// Vendor pipeline (libcamera/ArduCam) through GStreamer.
    GStreamer,
    /// Animated test pattern, no hardware involved.
    Synthetic,
}

impl std::fmt::Display for CameraBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackend::OpenCv => write!(f, "OpenCV"),
            CameraBackend::GStreamer => write!(f, "GStreamer"),
            CameraBackend::Synthetic => write!(f, "Synthetic"),
        }
    }
}

/// Resolve the configured preference into a definite backend.
pub fn probe_backend(config: &CameraConfig) -> CameraBackend {
    match config.backend {
        BackendPreference::OpenCv => CameraBackend::OpenCv,
        BackendPreference::GStreamer => CameraBackend::GStreamer,
        BackendPreference::Synthetic => CameraBackend::Synthetic,
        BackendPreference::Auto => {
            if config.gstreamer_pipeline.is_none() {
                return CameraBackend::OpenCv;
            }
            match videoio::has_backend(VideoCaptureAPIs::CAP_GSTREAMER) {
                Ok(true) => CameraBackend::GStreamer,
                Ok(false) => {
                    log::warn!("Pipeline configured but OpenCV lacks GStreamer support");
                    CameraBackend::OpenCv
                }
                Err(e) => {
                    log::warn!("Backend probe failed: {}", e);
                    CameraBackend::OpenCv
                }
            }
        }
    }
}

/// Parameters for opening one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Device index.
    pub id: i32,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Requested frame rate.
    pub fps: u32,
}

/// A single capture device.
pub trait FrameDevice: Send {
    /// Read the next frame (BGR, gray or BGRA).
    fn read_frame(&mut self) -> Result<Mat, DeviceError>;

    /// Release the underlying handle. Further reads fail.
    fn release(&mut self);

    /// Human readable device name.
    fn name(&self) -> &str;
}

/// Open a device through the given backend.
pub fn open_device(
    backend: CameraBackend,
    settings: &DeviceSettings,
    pipeline_template: Option<&str>,
) -> Result<Box<dyn FrameDevice>, DeviceError> {
    match backend {
        CameraBackend::OpenCv => Ok(Box::new(VideoCaptureDevice::open_index(settings)?)),
        CameraBackend::GStreamer => {
            let template = pipeline_template.ok_or(DeviceError::MissingPipeline)?;
            Ok(Box::new(VideoCaptureDevice::open_pipeline(template, settings)?))
        }
        CameraBackend::Synthetic => Ok(Box::new(SyntheticDevice::new(settings))),
    }
}

/// Expand `{id}`, `{width}`, `{height}` and `{fps}` in a pipeline template.
fn expand_pipeline(template: &str, settings: &DeviceSettings) -> String {
    template
        .replace("{id}", &settings.id.to_string())
        .replace("{width}", &settings.width.to_string())
        .replace("{height}", &settings.height.to_string())
        .replace("{fps}", &settings.fps.to_string())
}

/// OpenCV `VideoCapture` device.
struct VideoCaptureDevice {
    capture: VideoCapture,
    name: String,
}

impl VideoCaptureDevice {
    fn open_index(settings: &DeviceSettings) -> Result<Self, DeviceError> {
        let name = format!("video{}", settings.id);
        let mut capture = VideoCapture::new(settings.id, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(DeviceError::Unavailable(name));
        }

        // Drivers may ignore these; FrameSource resizes whatever arrives
        capture.set(videoio::CAP_PROP_FRAME_WIDTH, settings.width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, settings.height as f64)?;
        capture.set(videoio::CAP_PROP_FPS, settings.fps as f64)?;

        log::info!(
            "Opened {} ({}x{} @ {} fps requested, {}x{} reported)",
            name,
            settings.width,
            settings.height,
            settings.fps,
            capture.get(videoio::CAP_PROP_FRAME_WIDTH)?,
            capture.get(videoio::CAP_PROP_FRAME_HEIGHT)?
        );

        Ok(Self { capture, name })
    }

    fn open_pipeline(template: &str, settings: &DeviceSettings) -> Result<Self, DeviceError> {
        let pipeline = expand_pipeline(template, settings);
        let name = format!("gst[{}]", settings.id);
        let capture = VideoCapture::from_file(&pipeline, videoio::CAP_GSTREAMER)?;
        if !capture.is_opened()? {
            return Err(DeviceError::Unavailable(format!("{} ({})", name, pipeline)));
        }

        log::info!("Opened {} via pipeline: {}", name, pipeline);
        Ok(Self { capture, name })
    }
}

impl FrameDevice for VideoCaptureDevice {
    fn read_frame(&mut self) -> Result<Mat, DeviceError> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Err(DeviceError::NoFrame(self.name.clone()));
        }
        Ok(frame)
    }

    fn release(&mut self) {
        if let Err(e) = self.capture.release() {
            log::warn!("Failed to release {}: {}", self.name, e);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
