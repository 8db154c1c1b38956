//! Placeholder frames for missing or failing devices.

use opencv::core::{Mat, Point, Scalar, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;

use super::frame::FramePair;

const BACKGROUND: (f64, f64, f64) = (40.0, 40.0, 40.0);
const GRID_COLOR: (f64, f64, f64) = (70.0, 70.0, 70.0);
const TEXT_COLOR: (f64, f64, f64) = (255.0, 255.0, 255.0);
const GRID_SPACING: i32 = 40;

fn bgr(c: (f64, f64, f64)) -> Scalar {
    Scalar::new(c.0, c.1, c.2, 0.0)
}

/// Render a `width` x `height` BGR frame with a grid and centered `message`.
pub fn placeholder_frame(width: u32, height: u32, message: &str) -> opencv::Result<Mat> {
    let (w, h) = (width.max(1) as i32, height.max(1) as i32);
    let mut frame = Mat::new_rows_cols_with_default(h, w, CV_8UC3, bgr(BACKGROUND))?;

    for x in (0..w).step_by(GRID_SPACING as usize) {
        imgproc::line(
            &mut frame,
            Point::new(x, 0),
            Point::new(x, h - 1),
            bgr(GRID_COLOR),
            1,
            imgproc::LINE_8,
            0,
        )?;
    }
    for y in (0..h).step_by(GRID_SPACING as usize) {
        imgproc::line(
            &mut frame,
            Point::new(0, y),
            Point::new(w - 1, y),
            bgr(GRID_COLOR),
            1,
            imgproc::LINE_8,
            0,
        )?;
    }

    let font = imgproc::FONT_HERSHEY_SIMPLEX;
    let scale = (w as f64 / 640.0).clamp(0.4, 1.5) * 0.8;
    let mut baseline = 0;
    let text_size = imgproc::get_text_size(message, font, scale, 2, &mut baseline)?;
    let origin = Point::new(
        ((w - text_size.width) / 2).max(0),
        ((h + text_size.height) / 2).max(text_size.height),
    );
    imgproc::put_text(
        &mut frame,
        message,
        origin,
        font,
        scale,
        bgr(TEXT_COLOR),
        2,
        imgproc::LINE_AA,
        false,
    )?;

    Ok(frame)
}

/// Pair of placeholder frames labelled per side.
///
/// Never fails: if drawing fails, empty frames are returned and the error
/// is logged.
pub fn placeholder_pair(width: u32, height: u32, message: &str) -> FramePair {
    let side = |label: &str| {
        placeholder_frame(width, height, &format!("{}: {}", label, message)).unwrap_or_else(|e| {
            log::error!("Failed to draw placeholder frame: {}", e);
            Mat::default()
        })
    };
    FramePair::new(side("LEFT"), side("RIGHT"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_has_configured_size() {
        for (w, h) in [(640, 480), (320, 240), (1280, 720), (17, 9)] {
            let frame = placeholder_frame(w, h, "LEFT: no device").unwrap();
            assert_eq!(frame.cols(), w as i32);
            assert_eq!(frame.rows(), h as i32);
            assert_eq!(frame.typ(), CV_8UC3);
        }
    }

    #[test]
    fn test_placeholder_contains_text_pixels() {
        let frame = placeholder_frame(640, 480, "RIGHT: no device").unwrap();
        let mut white = 0;
        for y in 200..280 {
            for x in 0..640 {
                let px = frame.at_2d::<opencv::core::Vec3b>(y, x).unwrap();
                if px[0] > 200 && px[1] > 200 && px[2] > 200 {
                    white += 1;
                }
            }
        }
        assert!(white > 0);
    }

    #[test]
    fn test_placeholder_pair_sizes_match() {
        let pair = placeholder_pair(320, 240, "Waiting for cameras...");
        assert_eq!(pair.left.size().unwrap(), pair.right.size().unwrap());
        assert_eq!(pair.left.cols(), 320);
        assert_eq!(pair.right.rows(), 240);
    }
}
