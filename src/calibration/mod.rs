//! Stereo calibration module.
//!
//! Chessboard sample accumulation, stereo calibration and rectification
//! through OpenCV, and a versioned binary calibration file.

mod engine;
mod session;
mod solver;
mod storage;

pub use engine::{CalibrationState, CameraIntrinsics, RemapTable, StereoCalibration};
pub use session::{CalibrationSample, CalibrationSession};
pub use solver::{calibrate, compute_rectification, BoardSpec};
pub use storage::{PersistenceError, FORMAT_VERSION, MAGIC};

/// Calibration errors.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("no calibration session in progress")]
    NotInProgress,
    #[error("no calibration session to commit")]
    NoSession,
    #[error("insufficient calibration data: {valid} usable samples, {required} required")]
    InsufficientData { valid: usize, required: usize },
    #[error("no calibration available")]
    NotCalibrated,
    #[error("calibration file error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("OpenCV error: {0}")]
    Vision(#[from] opencv::Error),
}
