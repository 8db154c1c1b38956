//! ArUco marker module.
//!
//! Marker generation and detection through OpenCV's objdetect module, with
//! per-marker pose and range when camera intrinsics are known.

mod detector;
mod dictionary;

pub use detector::{AnnotateOptions, MarkerEngine, MarkerObservation, MarkerPose};
pub use dictionary::MarkerDictionary;

use crate::export::ExportError;

/// Marker errors.
#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    #[error("marker id {id} outside dictionary {dictionary} (0..{capacity})")]
    IdOutOfRange {
        id: i32,
        dictionary: MarkerDictionary,
        capacity: i32,
    },
    #[error("invalid marker image size {0} px")]
    InvalidSize(u32),
    #[error("OpenCV error: {0}")]
    Vision(#[from] opencv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export error: {0}")]
    Export(#[from] ExportError),
}
