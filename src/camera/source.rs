//! Paired left/right frame acquisition.

use opencv::core::{Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;

use super::device::{open_device, CameraBackend, DeviceError, DeviceSettings, FrameDevice};
use super::frame::{FramePair, Side};
use super::placeholder::placeholder_frame;
use crate::config::CameraConfig;

/// Per-side device slot.
struct Channel {
    side: Side,
    device: Option<Box<dyn FrameDevice>>,
    /// Whether the last read failed, so transitions are logged once.
    failing: bool,
}

impl Channel {
    fn new(side: Side) -> Self {
        Self {
            side,
            device: None,
            failing: false,
        }
    }

    fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
            log::info!("Released {} camera ({})", self.side.label(), device.name());
        }
    }
}

/// Two capture devices read as a pair.
///
/// Reads never fail outward: a missing device or a failed read is replaced
/// by a placeholder frame of the configured size.
pub struct FrameSource {
    backend: CameraBackend,
    pipeline: Option<String>,
    width: u32,
    height: u32,
    fps: u32,
    left: Channel,
    right: Channel,
}

impl FrameSource {
    /// Create an unopened source for `backend`.
    pub fn new(backend: CameraBackend, pipeline: Option<String>) -> Self {
        let defaults = CameraConfig::default();
        Self {
            backend,
            pipeline,
            width: defaults.width,
            height: defaults.height,
            fps: defaults.fps,
            left: Channel::new(Side::Left),
            right: Channel::new(Side::Right),
        }
    }

    /// Create a source and open both devices as described by `config`.
    pub fn from_config(config: &CameraConfig, backend: CameraBackend) -> Self {
        let mut source = Self::new(backend, config.gstreamer_pipeline.clone());
        source.initialize(
            config.left_id,
            config.right_id,
            config.width,
            config.height,
            config.fps,
        );
        source
    }

    /// Build a source from already opened devices. `None` sides read as placeholders.
    pub fn from_devices(
        left: Option<Box<dyn FrameDevice>>,
        right: Option<Box<dyn FrameDevice>>,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Self {
        let mut source = Self::new(CameraBackend::Synthetic, None);
        source.width = width.max(1);
        source.height = height.max(1);
        source.fps = fps.max(1);
        source.left.device = left;
        source.right.device = right;
        source
    }

    /// Open both devices. Returns true only if both opened.
    ///
    /// A side that fails to open is logged and reads as a placeholder; the
    /// other side is unaffected.
    pub fn initialize(
        &mut self,
        left_id: i32,
        right_id: i32,
        width: u32,
        height: u32,
        target_fps: u32,
    ) -> bool {
        self.release();
        self.width = width.max(1);
        self.height = height.max(1);
        self.fps = target_fps.max(1);

        log::info!(
            "Initializing {} cameras (left={}, right={}, {}x{} @ {} fps)",
            self.backend,
            left_id,
            right_id,
            self.width,
            self.height,
            self.fps
        );

        let left_ok = self.open_channel(Side::Left, left_id);
        let right_ok = self.open_channel(Side::Right, right_id);
        left_ok && right_ok
    }

    fn open_channel(&mut self, side: Side, id: i32) -> bool {
        let settings = DeviceSettings {
            id,
            width: self.width,
            height: self.height,
            fps: self.fps,
        };
        let result = open_device(self.backend, &settings, self.pipeline.as_deref());
        let channel = self.channel_mut(side);
        match result {
            Ok(device) => {
                channel.device = Some(device);
                channel.failing = false;
                true
            }
            Err(e) => {
                log::error!("Failed to open {} camera (id {}): {}", side.label(), id, e);
                channel.device = None;
                channel.failing = true;
                false
            }
        }
    }

    fn channel_mut(&mut self, side: Side) -> &mut Channel {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// Read one frame from each device.
    pub fn read_pair(&mut self) -> FramePair {
        let left = self.read_side(Side::Left);
        let right = self.read_side(Side::Right);
        FramePair::new(left, right)
    }

    fn read_side(&mut self, side: Side) -> Mat {
        let size = Size::new(self.width as i32, self.height as i32);
        let channel = self.channel_mut(side);

        let message = match channel.device.as_mut() {
            None => "no device",
            Some(device) => match device.read_frame().and_then(|f| normalize(f, size)) {
                Ok(frame) => {
                    if channel.failing {
                        log::info!("{} camera recovered", side.label());
                        channel.failing = false;
                    }
                    return frame;
                }
                Err(e) => {
                    if !channel.failing {
                        log::warn!("{} camera read failed: {}", side.label(), e);
                        channel.failing = true;
                    }
                    "read failed"
                }
            },
        };

        placeholder_frame(self.width, self.height, &format!("{}: {}", side, message))
            .unwrap_or_else(|e| {
                log::error!("Failed to draw placeholder frame: {}", e);
                Mat::default()
            })
    }

    /// Release both devices. Safe to call repeatedly.
    pub fn release(&mut self) {
        self.left.release();
        self.right.release();
    }

    /// Whether a device is currently attached for `side`.
    pub fn is_open(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left.device.is_some(),
            Side::Right => self.right.device.is_some(),
        }
    }

    /// Configured frame size.
    pub fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Target capture rate.
    pub fn target_fps(&self) -> u32 {
        self.fps
    }

    pub fn backend(&self) -> CameraBackend {
        self.backend
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Convert to 3-channel BGR at `size`.
fn normalize(frame: Mat, size: Size) -> Result<Mat, DeviceError> {
    let bgr = match frame.channels() {
        3 => frame,
        1 => {
            let mut out = Mat::default();
            imgproc::cvt_color_def(&frame, &mut out, imgproc::COLOR_GRAY2BGR)?;
            out
        }
        4 => {
            let mut out = Mat::default();
            imgproc::cvt_color_def(&frame, &mut out, imgproc::COLOR_BGRA2BGR)?;
            out
        }
        n => {
            return Err(DeviceError::NoFrame(format!(
                "frame with {} channels",
                n
            )))
        }
    };

    if bgr.size()? == size {
        return Ok(bgr);
    }
    let mut resized = Mat::default();
    imgproc::resize(&bgr, &mut resized, size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
    Ok(resized)
}
