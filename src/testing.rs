//! Synthetic scenes shared by unit tests.

use opencv::core::{Mat, Point, Rect, Scalar, Size, CV_64F, CV_8UC1, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;

use crate::calibration::{compute_rectification, CalibrationState, CameraIntrinsics};
use crate::camera::FramePair;
use crate::markers::{MarkerDictionary, MarkerEngine};

fn matrix(rows: i32, cols: i32, values: &[f64]) -> Mat {
    let mut mat = Mat::new_rows_cols_with_default(rows, cols, CV_64F, Scalar::all(0.0)).unwrap();
    mat.data_typed_mut::<f64>().unwrap().copy_from_slice(values);
    mat
}

/// Values of any single-channel matrix as `f64`.
pub fn values(mat: &Mat) -> Vec<f64> {
    let mut dense = Mat::default();
    mat.convert_to(&mut dense, CV_64F, 1.0, 0.0).unwrap();
    dense.data_typed::<f64>().unwrap().to_vec()
}

/// Pinhole intrinsics without distortion.
pub fn pinhole_intrinsics(focal: f64, cx: f64, cy: f64) -> CameraIntrinsics {
    CameraIntrinsics {
        camera_matrix: matrix(3, 3, &[focal, 0.0, cx, 0.0, focal, cy, 0.0, 0.0, 1.0]),
        dist_coeffs: matrix(1, 5, &[0.0; 5]),
    }
}

/// Plausible calibration for a 60 mm baseline rig at `size`, with real remap tables.
pub fn reference_state(size: Size) -> opencv::Result<CalibrationState> {
    let focal = size.width as f64 * 0.8;
    let (cx, cy) = (size.width as f64 / 2.0, size.height as f64 / 2.0);
    let left = pinhole_intrinsics(focal, cx, cy);
    let right = CameraIntrinsics {
        camera_matrix: matrix(3, 3, &[focal * 1.01, 0.0, cx + 2.0, 0.0, focal, cy - 1.0, 0.0, 0.0, 1.0]),
        dist_coeffs: matrix(1, 5, &[-0.05, 0.01, 0.0, 0.0, 0.0]),
    };
    let rotation = matrix(3, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    let translation = matrix(3, 1, &[-60.0, 0.0, 0.0]);
    let essential = matrix(3, 3, &[0.0, 0.0, 0.0, 0.0, 0.0, 60.0, 0.0, -60.0, 0.0]);
    let fundamental = matrix(
        3,
        3,
        &[0.0, 0.0, 0.0, 0.0, 0.0, 60.0 / focal, 0.0, -60.0 / focal, 1.0],
    );

    let (left_remap, right_remap) =
        compute_rectification(&left, &right, &rotation, &translation, size, 0.9)?;

    Ok(CalibrationState {
        left,
        right,
        rotation,
        translation,
        essential,
        fundamental,
        image_size: size,
        rms_error: 0.25,
        left_remap,
        right_remap,
    })
}

/// Assert two states carry identical values.
pub fn assert_states_equal(a: &CalibrationState, b: &CalibrationState) {
    assert_eq!(a.image_size, b.image_size);
    assert_eq!(a.rms_error, b.rms_error);
    let pairs = [
        (&a.left.camera_matrix, &b.left.camera_matrix),
        (&a.left.dist_coeffs, &b.left.dist_coeffs),
        (&a.right.camera_matrix, &b.right.camera_matrix),
        (&a.right.dist_coeffs, &b.right.dist_coeffs),
        (&a.rotation, &b.rotation),
        (&a.translation, &b.translation),
        (&a.essential, &b.essential),
        (&a.fundamental, &b.fundamental),
    ];
    for (x, y) in pairs {
        assert_eq!(values(x), values(y));
    }
    let tables = [
        (&a.left_remap.map_x, &b.left_remap.map_x),
        (&a.left_remap.map_y, &b.left_remap.map_y),
        (&a.right_remap.map_x, &b.right_remap.map_x),
        (&a.right_remap.map_y, &b.right_remap.map_y),
    ];
    for (x, y) in tables {
        assert_eq!(x.size().unwrap(), y.size().unwrap());
        assert_eq!(x.data_typed::<f32>().unwrap(), y.data_typed::<f32>().unwrap());
    }
}

/// Two ideal pinhole cameras 60 mm apart looking at a 9x6, 25 mm chessboard.
pub struct ChessboardRig {
    pub focal: f64,
    pub baseline_mm: f64,
    pub width: i32,
    pub height: i32,
    board: Mat,
}

const SQUARE_PX: i32 = 40;
const MARGIN_PX: i32 = 40;
const SQUARE_MM: f64 = 25.0;
/// Squares per side for 9x6 inner corners.
const SQUARES: (i32, i32) = (10, 7);

impl Default for ChessboardRig {
    fn default() -> Self {
        Self {
            focal: 500.0,
            baseline_mm: 60.0,
            width: 640,
            height: 480,
            board: board_image().unwrap(),
        }
    }
}

fn board_image() -> opencv::Result<Mat> {
    let width = SQUARES.0 * SQUARE_PX + 2 * MARGIN_PX;
    let height = SQUARES.1 * SQUARE_PX + 2 * MARGIN_PX;
    let mut board = Mat::new_rows_cols_with_default(height, width, CV_8UC1, Scalar::all(255.0))?;
    for j in 0..SQUARES.1 {
        for i in 0..SQUARES.0 {
            if (i + j) % 2 == 0 {
                imgproc::rectangle(
                    &mut board,
                    Rect::new(MARGIN_PX + i * SQUARE_PX, MARGIN_PX + j * SQUARE_PX, SQUARE_PX, SQUARE_PX),
                    Scalar::all(0.0),
                    imgproc::FILLED,
                    imgproc::LINE_8,
                    0,
                )?;
            }
        }
    }
    Ok(board)
}

fn mul3(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            out[r][c] = (0..3).map(|k| a[r][k] * b[k][c]).sum();
        }
    }
    out
}

impl ChessboardRig {
    /// Board pose for view `index`: rotation and left-camera translation (mm).
    fn pose(&self, index: usize) -> ([[f64; 3]; 3], [f64; 3]) {
        let tilt_x = [-20.0f64, -10.0, 0.0, 10.0, 20.0][index % 5].to_radians();
        let tilt_y = [-18.0f64, 0.0, 18.0, -9.0][(index / 5) % 4].to_radians();
        let dx = ((index * 37) % 7) as f64 * 10.0 - 30.0;
        let dy = ((index * 53) % 5) as f64 * 10.0 - 20.0;
        let depth = 420.0 + (index % 3) as f64 * 40.0;

        let (sa, ca) = tilt_x.sin_cos();
        let (sb, cb) = tilt_y.sin_cos();
        let rx = [[1.0, 0.0, 0.0], [0.0, ca, -sa], [0.0, sa, ca]];
        let ry = [[cb, 0.0, sb], [0.0, 1.0, 0.0], [-sb, 0.0, cb]];
        let rotation = mul3(&ry, &rx);

        // Keep the board centre on the requested point
        let center = [
            (SQUARES.0 - 2) as f64 * SQUARE_MM / 2.0,
            (SQUARES.1 - 2) as f64 * SQUARE_MM / 2.0,
            0.0,
        ];
        let mut translation = [dx, dy, depth];
        for (r, t) in translation.iter_mut().enumerate() {
            *t -= (0..3).map(|k| rotation[r][k] * center[k]).sum::<f64>();
        }
        (rotation, translation)
    }

    fn render(&self, rotation: &[[f64; 3]; 3], translation: [f64; 3]) -> opencv::Result<Mat> {
        let (cx, cy) = (self.width as f64 / 2.0, self.height as f64 / 2.0);
        let k = [[self.focal, 0.0, cx], [0.0, self.focal, cy], [0.0, 0.0, 1.0]];
        let plane = [
            [rotation[0][0], rotation[0][1], translation[0]],
            [rotation[1][0], rotation[1][1], translation[1]],
            [rotation[2][0], rotation[2][1], translation[2]],
        ];
        // Board image pixel centres to board millimetres, first inner corner at origin
        let scale = SQUARE_MM / SQUARE_PX as f64;
        let offset = (MARGIN_PX + SQUARE_PX) as f64 - 0.5;
        let board_to_world = [
            [scale, 0.0, -offset * scale],
            [0.0, scale, -offset * scale],
            [0.0, 0.0, 1.0],
        ];
        let h = mul3(&mul3(&k, &plane), &board_to_world);
        let homography = matrix(3, 3, &h.concat());

        let mut gray = Mat::default();
        imgproc::warp_perspective(
            &self.board,
            &mut gray,
            &homography,
            Size::new(self.width, self.height),
            imgproc::INTER_LINEAR,
            opencv::core::BORDER_CONSTANT,
            Scalar::all(160.0),
        )?;
        let mut bgr = Mat::default();
        imgproc::cvt_color_def(&gray, &mut bgr, imgproc::COLOR_GRAY2BGR)?;
        Ok(bgr)
    }

    /// Left/right views of pose `index`.
    pub fn view_pair(&self, index: usize) -> opencv::Result<FramePair> {
        let (rotation, left_t) = self.pose(index);
        let right_t = [left_t[0] - self.baseline_mm, left_t[1], left_t[2]];
        Ok(FramePair::new(
            self.render(&rotation, left_t)?,
            self.render(&rotation, right_t)?,
        ))
    }

    /// `count` distinct view pairs.
    pub fn sample_pairs(&self, count: usize) -> opencv::Result<Vec<FramePair>> {
        (0..count).map(|i| self.view_pair(i)).collect()
    }
}

/// White BGR canvas with markers pasted at `(id, top_left, side_px)`.
pub fn marker_scene(
    dictionary: MarkerDictionary,
    width: i32,
    height: i32,
    placements: &[(i32, Point, i32)],
) -> Mat {
    let engine = MarkerEngine::new(dictionary).unwrap();
    let mut canvas = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(255.0)).unwrap();
    for &(id, origin, side) in placements {
        let marker = engine.generate(id, side as u32).unwrap();
        let mut marker_bgr = Mat::default();
        imgproc::cvt_color_def(&marker, &mut marker_bgr, imgproc::COLOR_GRAY2BGR).unwrap();
        let mut roi = canvas
            .roi_mut(Rect::new(origin.x, origin.y, side, side))
            .unwrap();
        marker_bgr.copy_to(&mut roi).unwrap();
    }
    canvas
}

/// Uniform BGR frame.
pub fn solid_frame(width: i32, height: i32, value: f64) -> Mat {
    Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(value)).unwrap()
}
