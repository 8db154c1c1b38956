//! Calibration state and the stereo calibration engine.

use std::path::Path;

use opencv::core::{Mat, Scalar, Size, BORDER_CONSTANT};
use opencv::imgproc;
use opencv::prelude::*;

use super::session::{CalibrationSample, CalibrationSession};
use super::solver::{self, BoardSpec};
use super::storage;
use super::CalibrationError;
use crate::camera::FramePair;

/// Per-camera intrinsic parameters.
#[derive(Debug)]
pub struct CameraIntrinsics {
    /// 3x3 camera matrix (CV_64F).
    pub camera_matrix: Mat,
    /// Distortion coefficients (1xN, CV_64F).
    pub dist_coeffs: Mat,
}

impl CameraIntrinsics {
    pub fn try_clone(&self) -> opencv::Result<Self> {
        Ok(Self {
            camera_matrix: self.camera_matrix.try_clone()?,
            dist_coeffs: self.dist_coeffs.try_clone()?,
        })
    }

    /// Focal lengths `(fx, fy)` in pixels.
    pub fn focal_length(&self) -> opencv::Result<(f64, f64)> {
        Ok((
            *self.camera_matrix.at_2d::<f64>(0, 0)?,
            *self.camera_matrix.at_2d::<f64>(1, 1)?,
        ))
    }

    /// Principal point `(cx, cy)` in pixels.
    pub fn principal_point(&self) -> opencv::Result<(f64, f64)> {
        Ok((
            *self.camera_matrix.at_2d::<f64>(0, 2)?,
            *self.camera_matrix.at_2d::<f64>(1, 2)?,
        ))
    }
}

/// Pixel lookup tables for one camera (CV_32FC1, image sized).
#[derive(Debug)]
pub struct RemapTable {
    pub map_x: Mat,
    pub map_y: Mat,
}

impl RemapTable {
    pub fn try_clone(&self) -> opencv::Result<Self> {
        Ok(Self {
            map_x: self.map_x.try_clone()?,
            map_y: self.map_y.try_clone()?,
        })
    }

    /// Table size.
    pub fn size(&self) -> opencv::Result<Size> {
        self.map_x.size()
    }

    /// Apply the table with linear interpolation.
    pub fn apply(&self, image: &Mat) -> opencv::Result<Mat> {
        let mut out = Mat::default();
        imgproc::remap(
            image,
            &mut out,
            &self.map_x,
            &self.map_y,
            imgproc::INTER_LINEAR,
            BORDER_CONSTANT,
            Scalar::default(),
        )?;
        Ok(out)
    }
}

/// Result of a stereo calibration.
///
/// A value always carries both remap tables; an engine is calibrated
/// exactly when it holds one.
#[derive(Debug)]
pub struct CalibrationState {
    pub left: CameraIntrinsics,
    pub right: CameraIntrinsics,
    /// Rotation from the left to the right camera frame (3x3).
    pub rotation: Mat,
    /// Translation from the left to the right camera frame (3x1, board units).
    pub translation: Mat,
    /// Essential matrix (3x3).
    pub essential: Mat,
    /// Fundamental matrix (3x3).
    pub fundamental: Mat,
    /// Image size the calibration was computed at.
    pub image_size: Size,
    /// Stereo RMS reprojection error in pixels.
    pub rms_error: f64,
    pub left_remap: RemapTable,
    pub right_remap: RemapTable,
}

impl CalibrationState {
    pub fn try_clone(&self) -> opencv::Result<Self> {
        Ok(Self {
            left: self.left.try_clone()?,
            right: self.right.try_clone()?,
            rotation: self.rotation.try_clone()?,
            translation: self.translation.try_clone()?,
            essential: self.essential.try_clone()?,
            fundamental: self.fundamental.try_clone()?,
            image_size: self.image_size,
            rms_error: self.rms_error,
            left_remap: self.left_remap.try_clone()?,
            right_remap: self.right_remap.try_clone()?,
        })
    }

    /// Stereo baseline length (norm of the translation).
    pub fn baseline(&self) -> opencv::Result<f64> {
        opencv::core::norm_def(&self.translation)
    }
}

/// Stereo calibration engine.
pub struct StereoCalibration {
    state: Option<CalibrationState>,
    alpha: f64,
}

impl Default for StereoCalibration {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl StereoCalibration {
    /// Create an uncalibrated engine with rectification `alpha`.
    pub fn new(alpha: f64) -> Self {
        Self { state: None, alpha }
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.is_some()
    }

    /// Current calibration, if any.
    pub fn state(&self) -> Option<&CalibrationState> {
        self.state.as_ref()
    }

    /// Calibrate from `samples`. The previous state is kept on failure.
    pub fn calibrate(
        &mut self,
        samples: &[CalibrationSample],
        board: &BoardSpec,
    ) -> Result<(), CalibrationError> {
        let state = solver::calibrate(samples, board, self.alpha)?;
        self.state = Some(state);
        Ok(())
    }

    /// Finish `session` and calibrate from its samples.
    ///
    /// The session always ends. Fewer samples than the session minimum fail
    /// with `InsufficientData` without running the solver.
    pub fn commit(
        &mut self,
        session: &mut CalibrationSession,
        board: &BoardSpec,
    ) -> Result<(), CalibrationError> {
        let samples = session.take_samples()?;
        let required = session.min_samples();
        if samples.len() < required {
            log::warn!(
                "Not enough samples to calibrate: {} of {}",
                samples.len(),
                required
            );
            return Err(CalibrationError::InsufficientData {
                valid: samples.len(),
                required,
            });
        }

        log::info!("Calibrating from {} sample pairs", samples.len());
        self.calibrate(&samples, board)
    }

    /// Rectify both frames. Without a calibration the pair is returned unchanged.
    pub fn rectify(&self, pair: FramePair) -> Result<FramePair, CalibrationError> {
        let Some(state) = &self.state else {
            return Ok(pair);
        };
        let left = state.left_remap.apply(&pair.left)?;
        let right = state.right_remap.apply(&pair.right)?;
        Ok(FramePair::new(left, right))
    }

    /// Write the calibration file.
    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        let state = self.state.as_ref().ok_or(CalibrationError::NotCalibrated)?;
        storage::write(path, state)?;
        log::info!("Calibration saved to {}", path.display());
        Ok(())
    }

    /// Read a calibration file, recomputing remap tables when it has none.
    ///
    /// On any failure the current state is left untouched.
    pub fn load(&mut self, path: &Path) -> Result<(), CalibrationError> {
        let loaded = storage::read(path)?;
        let (left_remap, right_remap) = match loaded.remap {
            Some(tables) => tables,
            None => {
                log::info!("Calibration file has no remap tables, recomputing");
                solver::compute_rectification(
                    &loaded.left,
                    &loaded.right,
                    &loaded.rotation,
                    &loaded.translation,
                    loaded.image_size,
                    self.alpha,
                )?
            }
        };

        self.state = Some(CalibrationState {
            left: loaded.left,
            right: loaded.right,
            rotation: loaded.rotation,
            translation: loaded.translation,
            essential: loaded.essential,
            fundamental: loaded.fundamental,
            image_size: loaded.image_size,
            rms_error: loaded.rms_error,
            left_remap,
            right_remap,
        });
        log::info!("Calibration loaded from {}", path.display());
        Ok(())
    }

    /// Install a precomputed state.
    pub fn set_state(&mut self, state: CalibrationState) {
        self.state = Some(state);
    }

    /// Forget the current calibration.
    pub fn clear(&mut self) {
        self.state = None;
    }
}
