//! Animated test pattern device used for demo mode.

use opencv::core::{Mat, Point, Scalar, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;

use super::device::{DeviceError, DeviceSettings, FrameDevice};

/// Frame device that renders a moving pattern instead of reading hardware.
///
/// Animation time advances by one frame period per read, so output is
/// deterministic for a given device id and read count.
pub struct SyntheticDevice {
    settings: DeviceSettings,
    name: String,
    frame_index: u64,
    released: bool,
}

impl SyntheticDevice {
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            settings: *settings,
            name: format!("synthetic{}", settings.id),
            frame_index: 0,
            released: false,
        }
    }

    fn render(&self) -> opencv::Result<Mat> {
        let w = self.settings.width.max(1) as i32;
        let h = self.settings.height.max(1) as i32;
        let fps = self.settings.fps.max(1) as f64;
        // Each device gets a phase offset so left and right differ visibly
        let t = self.frame_index as f64 / fps + self.settings.id as f64 * 0.5;

        let mut frame = Mat::new_rows_cols_with_default(h, w, CV_8UC3, Scalar::all(0.0))?;

        for y in (0..h).step_by(10) {
            let shade = 127.0 + 127.0 * (y as f64 / 30.0 + t).sin();
            imgproc::line(
                &mut frame,
                Point::new(0, y),
                Point::new(w - 1, y),
                Scalar::new(0.0, 0.0, shade, 0.0),
                1,
                imgproc::LINE_8,
                0,
            )?;
        }
        for x in (0..w).step_by(10) {
            let shade = 127.0 + 127.0 * (x as f64 / 30.0 + t).sin();
            imgproc::line(
                &mut frame,
                Point::new(x, 0),
                Point::new(x, h - 1),
                Scalar::new(0.0, shade, 0.0, 0.0),
                1,
                imgproc::LINE_8,
                0,
            )?;
        }

        let radius = (50.0 + 20.0 * t.sin()) as i32;
        let center = Point::new(
            (w as f64 / 2.0 + 100.0 * (t / 2.0).sin()) as i32,
            (h as f64 / 2.0 + 50.0 * (t / 3.0).cos()) as i32,
        );
        imgproc::circle(
            &mut frame,
            center,
            radius,
            Scalar::new(0.0, 255.0, 255.0, 0.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;
        imgproc::rectangle_points(
            &mut frame,
            Point::new(w / 4, h / 4),
            Point::new(w / 4 + 100, h / 4 + 100),
            Scalar::new(255.0, 0.0, 0.0, 0.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;

        imgproc::put_text(
            &mut frame,
            &format!("Demo {} #{}", self.settings.id, self.frame_index),
            Point::new(10, h - 15),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.6,
            Scalar::new(255.0, 255.0, 255.0, 0.0),
            2,
            imgproc::LINE_AA,
            false,
        )?;

        Ok(frame)
    }
}

impl FrameDevice for SyntheticDevice {
    fn read_frame(&mut self) -> Result<Mat, DeviceError> {
        if self.released {
            return Err(DeviceError::Unavailable(self.name.clone()));
        }
        let frame = self.render()?;
        self.frame_index += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: i32) -> SyntheticDevice {
        SyntheticDevice::new(&DeviceSettings {
            id,
            width: 640,
            height: 480,
            fps: 30,
        })
    }

    fn differs(a: &Mat, b: &Mat) -> bool {
        let mut diff = Mat::default();
        opencv::core::absdiff(a, b, &mut diff).unwrap();
        let sum = opencv::core::sum_elems(&diff).unwrap();
        sum[0] + sum[1] + sum[2] > 0.0
    }

    #[test]
    fn test_frames_animate() {
        let mut dev = device(0);
        let first = dev.read_frame().unwrap();
        let second = dev.read_frame().unwrap();
        assert_eq!(first.typ(), CV_8UC3);
        assert!(differs(&first, &second));
    }

    #[test]
    fn test_devices_have_distinct_phase() {
        let left = device(0).read_frame().unwrap();
        let right = device(1).read_frame().unwrap();
        assert!(differs(&left, &right));
    }

    #[test]
    fn test_release_stops_reads() {
        let mut dev = device(0);
        dev.release();
        assert!(matches!(dev.read_frame(), Err(DeviceError::Unavailable(_))));
    }
}
