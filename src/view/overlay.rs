//! Text overlays drawn onto the composed frame.

use opencv::core::{Mat, Point, Rect, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

use super::system_info::SystemInfo;

const FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;

fn green() -> Scalar {
    Scalar::new(0.0, 255.0, 0.0, 0.0)
}

fn text(image: &mut Mat, line: &str, origin: Point, scale: f64, color: Scalar, thickness: i32) -> opencv::Result<()> {
    imgproc::put_text(image, line, origin, FONT, scale, color, thickness, imgproc::LINE_AA, false)
}

/// `FPS: n` in the top-right corner.
pub fn draw_fps(image: &mut Mat, fps: f64) -> opencv::Result<()> {
    let label = format!("FPS: {:.1}", fps);
    let mut baseline = 0;
    let size = imgproc::get_text_size(&label, FONT, 0.7, 2, &mut baseline)?;
    let origin = Point::new((image.cols() - size.width - 10).max(0), 30);
    text(image, &label, origin, 0.7, green(), 2)
}

/// Host statistics in the top-left corner, one line each.
pub fn draw_system_info(image: &mut Mat, info: &SystemInfo) -> opencv::Result<()> {
    for (i, line) in info.lines().iter().enumerate() {
        text(image, line, Point::new(10, 20 + i as i32 * 20), 0.5, green(), 1)?;
    }
    Ok(())
}

/// Status text on a dark band along the bottom edge.
pub fn draw_status_line(image: &mut Mat, status: &str) -> opencv::Result<()> {
    let band = 28.min(image.rows());
    if band <= 0 {
        return Ok(());
    }
    imgproc::rectangle(
        image,
        Rect::new(0, image.rows() - band, image.cols(), band),
        Scalar::all(0.0),
        imgproc::FILLED,
        imgproc::LINE_8,
        0,
    )?;
    text(
        image,
        status,
        Point::new(10, image.rows() - 9),
        0.55,
        Scalar::new(0.0, 255.0, 255.0, 0.0),
        1,
    )
}
