//! View layout composition.

use opencv::core::{self, Mat, Size, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::camera::FramePair;

/// How the stereo pair is arranged on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewLayout {
    #[default]
    SideBySide,
    LeftOnly,
    RightOnly,
}

impl ViewLayout {
    /// Next layout in the cycle side-by-side, left, right.
    pub fn next(self) -> Self {
        match self {
            ViewLayout::SideBySide => ViewLayout::LeftOnly,
            ViewLayout::LeftOnly => ViewLayout::RightOnly,
            ViewLayout::RightOnly => ViewLayout::SideBySide,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ViewLayout::SideBySide => "side by side",
            ViewLayout::LeftOnly => "left only",
            ViewLayout::RightOnly => "right only",
        }
    }
}

/// Build the displayed frame for `layout`.
///
/// Side by side, the right frame is resized to the left frame's size when
/// they differ.
pub fn compose(pair: FramePair, layout: ViewLayout) -> opencv::Result<Mat> {
    let (left, right) = pair.into_parts();
    match layout {
        ViewLayout::LeftOnly => Ok(left),
        ViewLayout::RightOnly => Ok(right),
        ViewLayout::SideBySide => {
            let size = left.size()?;
            let right = if right.size()? != size || right.typ() != left.typ() {
                match_frame(&right, size, left.typ())?
            } else {
                right
            };

            let mut halves = Vector::<Mat>::new();
            halves.push(left);
            halves.push(right);
            let mut combined = Mat::default();
            core::hconcat(&halves, &mut combined)?;
            Ok(combined)
        }
    }
}

fn match_frame(frame: &Mat, size: Size, typ: i32) -> opencv::Result<Mat> {
    if frame.empty() {
        return Mat::new_size_with_default(size, typ, core::Scalar::all(0.0));
    }
    let mut resized = Mat::default();
    imgproc::resize(frame, &mut resized, size, 0.0, 0.0, imgproc::INTER_LINEAR)?;

    let code = match (resized.channels(), typ) {
        (1, core::CV_8UC3) => imgproc::COLOR_GRAY2BGR,
        (4, core::CV_8UC3) => imgproc::COLOR_BGRA2BGR,
        _ => return Ok(resized),
    };
    let mut converted = Mat::default();
    imgproc::cvt_color_def(&resized, &mut converted, code)?;
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn pair(lw: i32, lh: i32, rw: i32, rh: i32) -> FramePair {
        FramePair::new(
            testing::solid_frame(lw, lh, 10.0),
            testing::solid_frame(rw, rh, 200.0),
        )
    }

    #[test]
    fn test_layout_cycle() {
        let mut layout = ViewLayout::default();
        assert_eq!(layout, ViewLayout::SideBySide);
        layout = layout.next();
        assert_eq!(layout, ViewLayout::LeftOnly);
        layout = layout.next();
        assert_eq!(layout, ViewLayout::RightOnly);
        assert_eq!(layout.next(), ViewLayout::SideBySide);
    }

    #[test]
    fn test_side_by_side_width() {
        let out = compose(pair(320, 240, 320, 240), ViewLayout::SideBySide).unwrap();
        assert_eq!(out.size().unwrap(), Size::new(640, 240));
    }

    #[test]
    fn test_side_by_side_resizes_right() {
        let out = compose(pair(320, 240, 640, 480), ViewLayout::SideBySide).unwrap();
        assert_eq!(out.size().unwrap(), Size::new(640, 240));
        let right_px = *out.at_2d::<core::Vec3b>(100, 500).unwrap();
        assert_eq!(right_px[0], 200);
    }

    #[test]
    fn test_single_halves() {
        let left = compose(pair(320, 240, 160, 120), ViewLayout::LeftOnly).unwrap();
        assert_eq!(left.size().unwrap(), Size::new(320, 240));
        let right = compose(pair(320, 240, 160, 120), ViewLayout::RightOnly).unwrap();
        assert_eq!(right.size().unwrap(), Size::new(160, 120));
    }

    #[test]
    fn test_layout_serde() {
        let json = serde_json::to_string(&ViewLayout::LeftOnly).unwrap();
        assert_eq!(json, "\"left_only\"");
    }
}
