//! Chessboard stereo calibration through OpenCV.

use opencv::calib3d;
use opencv::core::{self, Mat, Point2f, Point3f, Rect, Size, TermCriteria, Vector, CV_32FC1};
use opencv::imgproc;
use opencv::prelude::*;

use super::engine::{CalibrationState, CameraIntrinsics, RemapTable};
use super::session::CalibrationSample;
use super::CalibrationError;
use crate::config::CalibrationConfig;

/// Chessboard target geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardSpec {
    /// Internal corners along the board width.
    pub columns: u32,
    /// Internal corners along the board height.
    pub rows: u32,
    /// Square edge length (millimetres).
    pub square_size: f32,
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self {
            columns: 9,
            rows: 6,
            square_size: 25.0,
        }
    }
}

impl BoardSpec {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            columns: config.board_columns,
            rows: config.board_rows,
            square_size: config.square_size_mm,
        }
    }

    /// Corner grid size as passed to the corner finder.
    pub fn pattern_size(&self) -> Size {
        Size::new(self.columns as i32, self.rows as i32)
    }

    /// Board-frame corner coordinates, row by row with x varying fastest.
    pub fn object_points(&self) -> Vector<Point3f> {
        let mut points = Vector::with_capacity((self.columns * self.rows) as usize);
        for y in 0..self.rows {
            for x in 0..self.columns {
                points.push(Point3f::new(
                    x as f32 * self.square_size,
                    y as f32 * self.square_size,
                    0.0,
                ));
            }
        }
        points
    }
}

fn refine_criteria() -> opencv::Result<TermCriteria> {
    TermCriteria::new(core::TermCriteria_COUNT + core::TermCriteria_EPS, 30, 0.001)
}

/// Find and refine chessboard corners in one image. `None` if the board is not found.
fn find_corners(image: &Mat, board: &BoardSpec) -> opencv::Result<Option<Vector<Point2f>>> {
    let mut gray = Mat::default();
    if image.channels() == 1 {
        gray = image.try_clone()?;
    } else {
        imgproc::cvt_color_def(image, &mut gray, imgproc::COLOR_BGR2GRAY)?;
    }

    let mut corners = Vector::<Point2f>::new();
    let found = calib3d::find_chessboard_corners(
        &gray,
        board.pattern_size(),
        &mut corners,
        calib3d::CALIB_CB_ADAPTIVE_THRESH + calib3d::CALIB_CB_NORMALIZE_IMAGE,
    )?;
    if !found {
        return Ok(None);
    }

    imgproc::corner_sub_pix(
        &gray,
        &mut corners,
        Size::new(11, 11),
        Size::new(-1, -1),
        refine_criteria()?,
    )?;
    Ok(Some(corners))
}

/// Run the full stereo calibration over `samples`.
///
/// Samples where either view lacks a detectable board (or whose size
/// differs from the first sample) are dropped and counted. Zero usable
/// samples fail with `InsufficientData`.
pub fn calibrate(
    samples: &[CalibrationSample],
    board: &BoardSpec,
    alpha: f64,
) -> Result<CalibrationState, CalibrationError> {
    let object = board.object_points();
    let mut object_points = Vector::<Vector<Point3f>>::new();
    let mut left_points = Vector::<Vector<Point2f>>::new();
    let mut right_points = Vector::<Vector<Point2f>>::new();
    let mut image_size: Option<Size> = None;
    let mut rejected = 0usize;

    for (index, sample) in samples.iter().enumerate() {
        let size = sample.left.size()?;
        if sample.left.empty() || sample.right.size()? != size {
            rejected += 1;
            continue;
        }
        if let Some(expected) = image_size {
            if size != expected {
                log::debug!("Sample {} has size {:?}, expected {:?}", index, size, expected);
                rejected += 1;
                continue;
            }
        }

        let left = find_corners(&sample.left, board)?;
        let right = find_corners(&sample.right, board)?;
        match (left, right) {
            (Some(left), Some(right)) => {
                image_size.get_or_insert(size);
                object_points.push(object.clone());
                left_points.push(left);
                right_points.push(right);
            }
            _ => {
                log::debug!("Sample {}: chessboard not found in both views", index);
                rejected += 1;
            }
        }
    }

    if rejected > 0 {
        log::warn!(
            "Rejected {} of {} calibration samples",
            rejected,
            samples.len()
        );
    }

    let Some(image_size) = image_size else {
        log::error!("Calibration failed: no usable samples");
        return Err(CalibrationError::InsufficientData {
            valid: 0,
            required: 1,
        });
    };

    log::info!(
        "Calibrating with {} valid samples at {}x{}",
        object_points.len(),
        image_size.width,
        image_size.height
    );

    let criteria = refine_criteria()?;
    let (left, left_rms) =
        calibrate_single(&object_points, &left_points, image_size, criteria)?;
    let (right, right_rms) =
        calibrate_single(&object_points, &right_points, image_size, criteria)?;
    log::info!(
        "Per-camera RMS reprojection error: left {:.4} px, right {:.4} px",
        left_rms,
        right_rms
    );

    let mut left_matrix = left.camera_matrix;
    let mut left_dist = left.dist_coeffs;
    let mut right_matrix = right.camera_matrix;
    let mut right_dist = right.dist_coeffs;
    let mut rotation = Mat::default();
    let mut translation = Mat::default();
    let mut essential = Mat::default();
    let mut fundamental = Mat::default();

    let rms_error = calib3d::stereo_calibrate(
        &object_points,
        &left_points,
        &right_points,
        &mut left_matrix,
        &mut left_dist,
        &mut right_matrix,
        &mut right_dist,
        image_size,
        &mut rotation,
        &mut translation,
        &mut essential,
        &mut fundamental,
        calib3d::CALIB_FIX_INTRINSIC,
        criteria,
    )?;
    log::info!("Stereo RMS reprojection error: {:.4} px", rms_error);

    let left = CameraIntrinsics {
        camera_matrix: left_matrix,
        dist_coeffs: left_dist,
    };
    let right = CameraIntrinsics {
        camera_matrix: right_matrix,
        dist_coeffs: right_dist,
    };

    let (left_remap, right_remap) =
        compute_rectification(&left, &right, &rotation, &translation, image_size, alpha)?;

    Ok(CalibrationState {
        left,
        right,
        rotation,
        translation,
        essential,
        fundamental,
        image_size,
        rms_error,
        left_remap,
        right_remap,
    })
}

fn calibrate_single(
    object_points: &Vector<Vector<Point3f>>,
    image_points: &Vector<Vector<Point2f>>,
    image_size: Size,
    criteria: TermCriteria,
) -> opencv::Result<(CameraIntrinsics, f64)> {
    let mut camera_matrix = Mat::default();
    let mut dist_coeffs = Mat::default();
    let mut rvecs = Vector::<Mat>::new();
    let mut tvecs = Vector::<Mat>::new();

    let rms = calib3d::calibrate_camera(
        object_points,
        image_points,
        image_size,
        &mut camera_matrix,
        &mut dist_coeffs,
        &mut rvecs,
        &mut tvecs,
        0,
        criteria,
    )?;

    Ok((
        CameraIntrinsics {
            camera_matrix,
            dist_coeffs,
        },
        rms,
    ))
}

/// Compute rectification remap tables for both cameras.
///
/// Uses zero-disparity rectification; `alpha` trades cropping (0) against
/// keeping every source pixel (1).
pub fn compute_rectification(
    left: &CameraIntrinsics,
    right: &CameraIntrinsics,
    rotation: &Mat,
    translation: &Mat,
    image_size: Size,
    alpha: f64,
) -> opencv::Result<(RemapTable, RemapTable)> {
    let mut r1 = Mat::default();
    let mut r2 = Mat::default();
    let mut p1 = Mat::default();
    let mut p2 = Mat::default();
    let mut q = Mat::default();
    let mut roi_left = Rect::default();
    let mut roi_right = Rect::default();

    calib3d::stereo_rectify(
        &left.camera_matrix,
        &left.dist_coeffs,
        &right.camera_matrix,
        &right.dist_coeffs,
        image_size,
        rotation,
        translation,
        &mut r1,
        &mut r2,
        &mut p1,
        &mut p2,
        &mut q,
        calib3d::CALIB_ZERO_DISPARITY,
        alpha,
        image_size,
        &mut roi_left,
        &mut roi_right,
    )?;
    log::debug!("Rectified ROI: left {:?}, right {:?}", roi_left, roi_right);

    let left_remap = undistort_map(left, &r1, &p1, image_size)?;
    let right_remap = undistort_map(right, &r2, &p2, image_size)?;
    Ok((left_remap, right_remap))
}

fn undistort_map(
    intrinsics: &CameraIntrinsics,
    rectification: &Mat,
    projection: &Mat,
    image_size: Size,
) -> opencv::Result<RemapTable> {
    let mut map_x = Mat::default();
    let mut map_y = Mat::default();
    calib3d::init_undistort_rectify_map(
        &intrinsics.camera_matrix,
        &intrinsics.dist_coeffs,
        rectification,
        projection,
        image_size,
        CV_32FC1,
        &mut map_x,
        &mut map_y,
    )?;
    Ok(RemapTable { map_x, map_y })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_object_points_layout() {
        let board = BoardSpec::default();
        let points = board.object_points();
        assert_eq!(points.len(), 54);

        let first = points.get(0).unwrap();
        assert_eq!((first.x, first.y, first.z), (0.0, 0.0, 0.0));
        let second = points.get(1).unwrap();
        assert_eq!((second.x, second.y), (25.0, 0.0));
        let next_row = points.get(9).unwrap();
        assert_eq!((next_row.x, next_row.y), (0.0, 25.0));
        let last = points.get(53).unwrap();
        assert_eq!((last.x, last.y), (200.0, 125.0));
    }

    #[test]
    fn test_board_from_config() {
        let mut config = CalibrationConfig::default();
        config.board_columns = 7;
        config.board_rows = 5;
        config.square_size_mm = 30.0;
        let board = BoardSpec::from_config(&config);
        assert_eq!(board.pattern_size(), Size::new(7, 5));
        assert_eq!(board.square_size, 30.0);
    }

    #[test]
    fn test_find_corners_on_synthetic_view() {
        let rig = testing::ChessboardRig::default();
        let pair = rig.view_pair(0).unwrap();
        let corners = find_corners(&pair.left, &BoardSpec::default()).unwrap();
        assert_eq!(corners.map(|c| c.len()), Some(54));
    }

    #[test]
    fn test_find_corners_on_blank_image() {
        let blank = Mat::new_rows_cols_with_default(
            480,
            640,
            opencv::core::CV_8UC3,
            opencv::core::Scalar::all(255.0),
        )
        .unwrap();
        assert!(find_corners(&blank, &BoardSpec::default()).unwrap().is_none());
    }

    #[test]
    fn test_rejected_samples_are_skipped() {
        let rig = testing::ChessboardRig::default();
        let mut samples: Vec<CalibrationSample> = rig
            .sample_pairs(20)
            .unwrap()
            .into_iter()
            .map(CalibrationSample::from)
            .collect();
        let blank = || {
            Mat::new_rows_cols_with_default(
                480,
                640,
                opencv::core::CV_8UC3,
                opencv::core::Scalar::all(255.0),
            )
            .unwrap()
        };
        samples.push(CalibrationSample::new(blank(), blank()));

        let state = calibrate(&samples, &BoardSpec::default(), 0.9).unwrap();
        assert_eq!(state.image_size, Size::new(640, 480));
        assert!(state.rms_error < 1.0, "rms = {}", state.rms_error);
    }
}
