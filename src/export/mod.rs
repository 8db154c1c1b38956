//! Image export module.
//!
//! Converts OpenCV frames to `image` buffers and writes captures,
//! calibration samples and marker images with timestamped names.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use opencv::core::{Mat, Scalar, CV_8UC1, CV_8UC3, CV_8UC4};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::camera::FramePair;

/// Export errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
    #[error("OpenCV error: {0}")]
    Vision(#[from] opencv::Error),
    #[error("unsupported frame: {0}")]
    Unsupported(String),
}

/// File format for captured frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    #[default]
    Png,
    Jpeg,
}

impl CaptureFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CaptureFormat::Png => "png",
            CaptureFormat::Jpeg => "jpg",
        }
    }
}

/// Local time token shared by the files of one capture, e.g. `20240131_142501_123`.
pub fn timestamp_token() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Convert an 8-bit gray, BGR or BGRA frame to an `image` buffer.
pub fn mat_to_image(mat: &Mat) -> Result<DynamicImage, ExportError> {
    if mat.empty() {
        return Err(ExportError::Unsupported("empty frame".to_string()));
    }
    let dense;
    let mat = if mat.is_continuous() {
        mat
    } else {
        dense = mat.try_clone()?;
        &dense
    };

    let (width, height) = (mat.cols() as u32, mat.rows() as u32);
    let bytes = mat.data_bytes()?;
    let typ = mat.typ();

    let image = if typ == CV_8UC1 {
        GrayImage::from_raw(width, height, bytes.to_vec()).map(DynamicImage::ImageLuma8)
    } else if typ == CV_8UC3 || typ == CV_8UC4 {
        let step = if typ == CV_8UC3 { 3 } else { 4 };
        let rgb: Vec<u8> = bytes
            .chunks_exact(step)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect();
        RgbImage::from_raw(width, height, rgb).map(DynamicImage::ImageRgb8)
    } else {
        return Err(ExportError::Unsupported(format!("Mat type {}", typ)));
    };

    image.ok_or_else(|| ExportError::Unsupported("buffer size mismatch".to_string()))
}

/// Convert an `image` buffer to a BGR frame.
pub fn image_to_mat(image: &DynamicImage) -> Result<Mat, ExportError> {
    let rgb = image.to_rgb8();
    let mut mat = Mat::new_rows_cols_with_default(
        rgb.height() as i32,
        rgb.width() as i32,
        CV_8UC3,
        Scalar::all(0.0),
    )?;
    for (dst, src) in mat
        .data_bytes_mut()?
        .chunks_exact_mut(3)
        .zip(rgb.pixels())
    {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }
    Ok(mat)
}

/// Read an image file as a BGR frame.
pub fn load_image(path: &Path) -> Result<Mat, ExportError> {
    let image = image::open(path)?;
    image_to_mat(&image)
}

/// Write `mat` to `path`. `quality` applies to JPEG only.
pub fn save_image(
    mat: &Mat,
    path: &Path,
    format: CaptureFormat,
    quality: u8,
) -> Result<(), ExportError> {
    let image = mat_to_image(mat)?;
    match format {
        CaptureFormat::Png => image.save_with_format(path, ImageFormat::Png)?,
        CaptureFormat::Jpeg => {
            let writer = BufWriter::new(File::create(path)?);
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(writer, quality.clamp(1, 100));
            image.write_with_encoder(encoder)?;
        }
    }
    Ok(())
}

/// Save a stereo pair as `left_<ts>` and `right_<ts>` sharing one token.
pub fn save_stereo_pair(
    pair: &FramePair,
    left_dir: &Path,
    right_dir: &Path,
    format: CaptureFormat,
    quality: u8,
) -> Result<(PathBuf, PathBuf), ExportError> {
    std::fs::create_dir_all(left_dir)?;
    std::fs::create_dir_all(right_dir)?;

    let token = timestamp_token();
    let ext = format.extension();
    let left_path = left_dir.join(format!("left_{}.{}", token, ext));
    let right_path = right_dir.join(format!("right_{}.{}", token, ext));

    save_image(&pair.left, &left_path, format, quality)?;
    save_image(&pair.right, &right_path, format, quality)?;

    log::info!(
        "Saved stereo pair: {} / {}",
        left_path.display(),
        right_path.display()
    );
    Ok((left_path, right_path))
}

/// Save calibration sample `index` as `calib_left_<n>_<ts>.png` / `calib_right_<n>_<ts>.png`.
pub fn save_calibration_sample(
    dir: &Path,
    index: usize,
    pair: &FramePair,
) -> Result<(PathBuf, PathBuf), ExportError> {
    std::fs::create_dir_all(dir)?;
    let token = timestamp_token();
    let left_path = dir.join(format!("calib_left_{}_{}.png", index, token));
    let right_path = dir.join(format!("calib_right_{}_{}.png", index, token));

    save_image(&pair.left, &left_path, CaptureFormat::Png, 100)?;
    save_image(&pair.right, &right_path, CaptureFormat::Png, 100)?;
    Ok((left_path, right_path))
}

/// Save a generated marker as `marker_<id>.png`.
pub fn save_marker_image(dir: &Path, id: i32, marker: &Mat) -> Result<PathBuf, ExportError> {
    let path = dir.join(format!("marker_{}.png", id));
    save_image(marker, &path, CaptureFormat::Png, 100)?;
    log::debug!("Saved marker: {}", path.display());
    Ok(path)
}

/// Image files in `dir` with a known extension, sorted by file name.
pub fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use opencv::core::Vec3b;

    fn bgr_frame() -> Mat {
        // Pure blue in BGR
        Mat::new_rows_cols_with_default(4, 6, CV_8UC3, Scalar::new(255.0, 0.0, 0.0, 0.0)).unwrap()
    }

    #[test]
    fn test_timestamp_token_format() {
        let token = timestamp_token();
        // YYYYMMDD_HHMMSS_mmm
        assert_eq!(token.len(), 19);
        assert_eq!(token.matches('_').count(), 2);
        assert!(token.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_bgr_to_rgb_conversion() {
        let image = mat_to_image(&bgr_frame()).unwrap().to_rgb8();
        assert_eq!((image.width(), image.height()), (6, 4));
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 255]);
    }

    #[test]
    fn test_gray_conversion() {
        let gray = Mat::new_rows_cols_with_default(3, 5, CV_8UC1, Scalar::all(77.0)).unwrap();
        let image = mat_to_image(&gray).unwrap();
        assert_eq!(image.to_luma8().get_pixel(4, 2).0, [77]);
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(matches!(
            mat_to_image(&Mat::default()),
            Err(ExportError::Unsupported(_))
        ));
    }

    #[test]
    fn test_image_round_trip_keeps_channel_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        save_image(&bgr_frame(), &path, CaptureFormat::Png, 95).unwrap();

        let loaded = load_image(&path).unwrap();
        let px = *loaded.at_2d::<Vec3b>(1, 1).unwrap();
        assert_eq!(px.0, [255, 0, 0]);
    }

    #[test]
    fn test_save_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");
        let frame = testing::solid_frame(32, 24, 128.0);
        save_image(&frame, &path, CaptureFormat::Jpeg, 80).unwrap();
        let image = image::open(&path).unwrap();
        assert_eq!((image.width(), image.height()), (32, 24));
    }

    #[test]
    fn test_stereo_pair_shares_token() {
        let dir = tempfile::tempdir().unwrap();
        let left_dir = dir.path().join("captures/left");
        let right_dir = dir.path().join("captures/right");
        let pair = FramePair::new(testing::solid_frame(64, 48, 10.0), testing::solid_frame(64, 48, 20.0));

        let (left, right) =
            save_stereo_pair(&pair, &left_dir, &right_dir, CaptureFormat::Png, 95).unwrap();

        let left_name = left.file_stem().unwrap().to_string_lossy().into_owned();
        let right_name = right.file_stem().unwrap().to_string_lossy().into_owned();
        assert!(left_name.starts_with("left_"));
        assert!(right_name.starts_with("right_"));
        assert_eq!(&left_name["left_".len()..], &right_name["right_".len()..]);
    }

    #[test]
    fn test_list_images_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.jpg", "notes.txt", "c.PNG"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png", "c.PNG"]);
    }
}
