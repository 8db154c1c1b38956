//! Calibration file format.
//!
//! ```text
//! offset 0  "STCL"          magic
//! offset 4  u32 LE          format version
//! offset 8  bincode payload
//! ```
//!
//! Version 1 carries intrinsics, extrinsics and image size. Version 2 adds
//! an optional remap section whose `f32` tables are LZ4 compressed.
//! Writers emit version 2; readers accept both.

use std::path::Path;

use opencv::core::{Mat, Scalar, Size, CV_32FC1, CV_64F};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use super::engine::{CalibrationState, CameraIntrinsics, RemapTable};

/// File magic.
pub const MAGIC: [u8; 4] = *b"STCL";
/// Version written by this build.
pub const FORMAT_VERSION: u32 = 2;

const HEADER_LEN: usize = 8;
/// Largest accepted image side, in pixels.
const MAX_IMAGE_SIDE: u32 = 16384;
/// Largest accepted matrix side. Distortion vectors have at most 14 terms.
const MAX_MATRIX_SIDE: u32 = 16;

/// Calibration file errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("not a calibration file")]
    BadMagic,
    #[error("unsupported calibration file version {0}")]
    UnsupportedVersion(u32),
    #[error("remap table decompression failed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
    #[error("malformed data: {0}")]
    Shape(String),
    #[error("matrix conversion failed: {0}")]
    Matrix(#[from] opencv::Error),
}

/// Dense row-major `f64` matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MatrixRecord {
    rows: u32,
    cols: u32,
    data: Vec<f64>,
}

impl MatrixRecord {
    fn from_mat(mat: &Mat) -> opencv::Result<Self> {
        let mut dense = Mat::default();
        mat.convert_to(&mut dense, CV_64F, 1.0, 0.0)?;
        Ok(Self {
            rows: dense.rows() as u32,
            cols: dense.cols() as u32,
            data: dense.data_typed::<f64>()?.to_vec(),
        })
    }

    fn to_mat(&self) -> Result<Mat, PersistenceError> {
        if self.rows == 0
            || self.cols == 0
            || self.rows > MAX_MATRIX_SIDE
            || self.cols > MAX_MATRIX_SIDE
        {
            return Err(PersistenceError::Shape(format!(
                "{}x{} matrix",
                self.rows, self.cols
            )));
        }
        let expected = self.rows as usize * self.cols as usize;
        if self.data.len() != expected {
            return Err(PersistenceError::Shape(format!(
                "{}x{} matrix with {} values",
                self.rows,
                self.cols,
                self.data.len()
            )));
        }
        Ok(matrix_from_slice(
            self.rows as i32,
            self.cols as i32,
            &self.data,
        )?)
    }
}

/// Version 1 payload, also the core of version 2.
#[derive(Debug, Serialize, Deserialize)]
struct CoreRecord {
    left_camera_matrix: MatrixRecord,
    left_dist_coeffs: MatrixRecord,
    right_camera_matrix: MatrixRecord,
    right_dist_coeffs: MatrixRecord,
    rotation: MatrixRecord,
    translation: MatrixRecord,
    essential: MatrixRecord,
    fundamental: MatrixRecord,
    image_width: u32,
    image_height: u32,
    rms_error: f64,
}

/// LZ4-compressed `f32` remap tables.
#[derive(Debug, Serialize, Deserialize)]
struct RemapRecord {
    width: u32,
    height: u32,
    left_x: Vec<u8>,
    left_y: Vec<u8>,
    right_x: Vec<u8>,
    right_y: Vec<u8>,
}

/// Version 2 payload.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    core: CoreRecord,
    remap: Option<RemapRecord>,
}

/// Decoded calibration file. Remap tables may be absent.
pub(crate) struct LoadedCalibration {
    pub left: CameraIntrinsics,
    pub right: CameraIntrinsics,
    pub rotation: Mat,
    pub translation: Mat,
    pub essential: Mat,
    pub fundamental: Mat,
    pub image_size: Size,
    pub rms_error: f64,
    pub remap: Option<(RemapTable, RemapTable)>,
}

/// Build a `CV_64F` matrix from row-major values.
pub(crate) fn matrix_from_slice(rows: i32, cols: i32, values: &[f64]) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(rows, cols, CV_64F, Scalar::all(0.0))?;
    mat.data_typed_mut::<f64>()?.copy_from_slice(values);
    Ok(mat)
}

fn compress_table(table: &Mat) -> opencv::Result<Vec<u8>> {
    let mut dense = Mat::default();
    table.convert_to(&mut dense, CV_32FC1, 1.0, 0.0)?;
    let values = dense.data_typed::<f32>()?;
    Ok(lz4_flex::compress_prepend_size(bytemuck::cast_slice(values)))
}

/// Decompress one table of `size`. The stored length is checked before
/// anything is allocated.
fn decompress_table(bytes: &[u8], size: Size) -> Result<Mat, PersistenceError> {
    let expected = usize::try_from(size.width)
        .ok()
        .zip(usize::try_from(size.height).ok())
        .and_then(|(w, h)| w.checked_mul(h))
        .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
        .ok_or_else(|| {
            PersistenceError::Shape(format!("remap size {}x{}", size.width, size.height))
        })?;

    if bytes.len() < 4 {
        return Err(PersistenceError::Shape("remap table too short".to_string()));
    }
    let (prefix, compressed) = bytes.split_at(4);
    let stored = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if stored != expected {
        return Err(PersistenceError::Shape(format!(
            "remap table declares {} bytes, expected {}",
            stored, expected
        )));
    }
    let raw = lz4_flex::block::decompress(compressed, expected)?;
    if raw.len() != expected {
        return Err(PersistenceError::Shape(format!(
            "remap table of {} bytes, expected {}",
            raw.len(),
            expected
        )));
    }

    let mut mat =
        Mat::new_rows_cols_with_default(size.height, size.width, CV_32FC1, Scalar::all(0.0))?;
    for (dst, chunk) in mat
        .data_typed_mut::<f32>()?
        .iter_mut()
        .zip(raw.chunks_exact(4))
    {
        *dst = bytemuck::pod_read_unaligned(chunk);
    }
    Ok(mat)
}

fn core_record(state: &CalibrationState) -> opencv::Result<CoreRecord> {
    Ok(CoreRecord {
        left_camera_matrix: MatrixRecord::from_mat(&state.left.camera_matrix)?,
        left_dist_coeffs: MatrixRecord::from_mat(&state.left.dist_coeffs)?,
        right_camera_matrix: MatrixRecord::from_mat(&state.right.camera_matrix)?,
        right_dist_coeffs: MatrixRecord::from_mat(&state.right.dist_coeffs)?,
        rotation: MatrixRecord::from_mat(&state.rotation)?,
        translation: MatrixRecord::from_mat(&state.translation)?,
        essential: MatrixRecord::from_mat(&state.essential)?,
        fundamental: MatrixRecord::from_mat(&state.fundamental)?,
        image_width: state.image_size.width as u32,
        image_height: state.image_size.height as u32,
        rms_error: state.rms_error,
    })
}

fn remap_record(state: &CalibrationState) -> opencv::Result<RemapRecord> {
    Ok(RemapRecord {
        width: state.image_size.width as u32,
        height: state.image_size.height as u32,
        left_x: compress_table(&state.left_remap.map_x)?,
        left_y: compress_table(&state.left_remap.map_y)?,
        right_x: compress_table(&state.right_remap.map_x)?,
        right_y: compress_table(&state.right_remap.map_y)?,
    })
}

fn write_payload(path: &Path, version: u32, payload: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(payload);
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Write `state` including remap tables.
pub(crate) fn write(path: &Path, state: &CalibrationState) -> Result<(), PersistenceError> {
    let record = FileRecord {
        core: core_record(state)?,
        remap: Some(remap_record(state)?),
    };
    let payload = bincode::serialize(&record)?;
    write_payload(path, FORMAT_VERSION, &payload)
}

/// Write a version 1 file (no remap tables).
#[cfg(test)]
pub(crate) fn write_without_remap(
    path: &Path,
    state: &CalibrationState,
) -> Result<(), PersistenceError> {
    let payload = bincode::serialize(&core_record(state)?)?;
    write_payload(path, 1, &payload)
}

/// Read and decode a calibration file.
pub(crate) fn read(path: &Path) -> Result<LoadedCalibration, PersistenceError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < HEADER_LEN || bytes[..4] != MAGIC {
        return Err(PersistenceError::BadMagic);
    }
    let mut version_bytes = [0u8; 4];
    version_bytes.copy_from_slice(&bytes[4..HEADER_LEN]);
    let version = u32::from_le_bytes(version_bytes);
    let payload = &bytes[HEADER_LEN..];

    let record = match version {
        1 => FileRecord {
            core: bincode::deserialize(payload)?,
            remap: None,
        },
        2 => bincode::deserialize(payload)?,
        other => return Err(PersistenceError::UnsupportedVersion(other)),
    };

    decode(record)
}

fn decode(record: FileRecord) -> Result<LoadedCalibration, PersistenceError> {
    let core = record.core;
    let valid_side = |side: u32| side > 0 && side <= MAX_IMAGE_SIDE;
    if !valid_side(core.image_width) || !valid_side(core.image_height) {
        return Err(PersistenceError::Shape(format!(
            "image size {}x{}",
            core.image_width, core.image_height
        )));
    }
    let image_size = Size::new(core.image_width as i32, core.image_height as i32);

    let remap = match record.remap {
        None => None,
        Some(remap) => {
            if remap.width != core.image_width || remap.height != core.image_height {
                return Err(PersistenceError::Shape(format!(
                    "remap tables are {}x{}, image size is {}x{}",
                    remap.width, remap.height, core.image_width, core.image_height
                )));
            }
            Some((
                RemapTable {
                    map_x: decompress_table(&remap.left_x, image_size)?,
                    map_y: decompress_table(&remap.left_y, image_size)?,
                },
                RemapTable {
                    map_x: decompress_table(&remap.right_x, image_size)?,
                    map_y: decompress_table(&remap.right_y, image_size)?,
                },
            ))
        }
    };

    Ok(LoadedCalibration {
        left: CameraIntrinsics {
            camera_matrix: core.left_camera_matrix.to_mat()?,
            dist_coeffs: core.left_dist_coeffs.to_mat()?,
        },
        right: CameraIntrinsics {
            camera_matrix: core.right_camera_matrix.to_mat()?,
            dist_coeffs: core.right_dist_coeffs.to_mat()?,
        },
        rotation: core.rotation.to_mat()?,
        translation: core.translation.to_mat()?,
        essential: core.essential.to_mat()?,
        fundamental: core.fundamental.to_mat()?,
        image_size,
        rms_error: core.rms_error,
        remap,
    })
}
