//! Marker generation, detection and pose overlay.

use std::path::{Path, PathBuf};

use opencv::calib3d;
use opencv::core::{Mat, Point, Point2f, Point3f, Scalar, Vector, CV_64F};
use opencv::imgproc;
use opencv::objdetect::{self, ArucoDetector, DetectorParameters, Dictionary, RefineParameters};
use opencv::prelude::*;

use super::dictionary::MarkerDictionary;
use super::MarkerError;
use crate::calibration::CameraIntrinsics;
use crate::config::MarkerConfig;
use crate::export;

/// Marker pose relative to the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerPose {
    /// Rodrigues rotation vector.
    pub rvec: [f64; 3],
    /// Translation in metres.
    pub tvec: [f64; 3],
}

impl MarkerPose {
    /// Euclidean distance from the camera centre to the marker centre.
    pub fn range(&self) -> f64 {
        self.tvec.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

/// One detected marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerObservation {
    pub id: i32,
    /// Corners clockwise from top-left, in image pixels.
    pub corners: [Point2f; 4],
    /// Present only when intrinsics were supplied and the solve succeeded.
    pub pose: Option<MarkerPose>,
}

impl MarkerObservation {
    /// Range in metres, when a pose is known.
    pub fn range(&self) -> Option<f64> {
        self.pose.map(|p| p.range())
    }

    /// Mean of the four corners.
    pub fn center(&self) -> Point2f {
        let (sx, sy) = self
            .corners
            .iter()
            .fold((0.0, 0.0), |(x, y), c| (x + c.x, y + c.y));
        Point2f::new(sx / 4.0, sy / 4.0)
    }
}

/// Overlay options for [`MarkerEngine::detect_and_annotate`].
#[derive(Debug, Clone, Copy)]
pub struct AnnotateOptions {
    /// Draw coordinate axes on posed markers.
    pub draw_axes: bool,
    /// Printed marker side length in metres.
    pub marker_length: f32,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self {
            draw_axes: true,
            marker_length: 0.05,
        }
    }
}

impl AnnotateOptions {
    pub fn from_config(config: &MarkerConfig) -> Self {
        Self {
            draw_axes: config.draw_axes,
            marker_length: config.marker_length_m,
        }
    }
}

/// ArUco generator and detector bound to one dictionary.
pub struct MarkerEngine {
    dictionary: MarkerDictionary,
    dict: Dictionary,
    detector: ArucoDetector,
}

impl MarkerEngine {
    pub fn new(dictionary: MarkerDictionary) -> Result<Self, MarkerError> {
        let dict = dictionary.load()?;
        let params = DetectorParameters::default()?;
        let refine = RefineParameters::new_def()?;
        let detector = ArucoDetector::new(&dict, &params, refine)?;
        log::debug!("Marker engine ready ({})", dictionary);
        Ok(Self {
            dictionary,
            dict,
            detector,
        })
    }

    pub fn dictionary(&self) -> MarkerDictionary {
        self.dictionary
    }

    /// Render marker `id` as a `size_px` square, single channel, 1-bit border.
    pub fn generate(&self, id: i32, size_px: u32) -> Result<Mat, MarkerError> {
        let capacity = self.dictionary.capacity();
        if id < 0 || id >= capacity {
            return Err(MarkerError::IdOutOfRange {
                id,
                dictionary: self.dictionary,
                capacity,
            });
        }
        let side = match i32::try_from(size_px) {
            Ok(side) if side > 0 => side,
            _ => return Err(MarkerError::InvalidSize(size_px)),
        };
        let mut image = Mat::default();
        objdetect::generate_image_marker(&self.dict, id, side, &mut image, 1)?;
        Ok(image)
    }

    /// Write `marker_<id>.png` for `count` consecutive ids starting at `start`.
    pub fn export_marker_set(
        &self,
        start: i32,
        count: u32,
        size_px: u32,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, MarkerError> {
        std::fs::create_dir_all(dir)?;
        let mut paths = Vec::with_capacity(count as usize);
        for offset in 0..count as i32 {
            let id = start + offset;
            let marker = self.generate(id, size_px)?;
            paths.push(export::save_marker_image(dir, id, &marker)?);
        }
        log::info!(
            "Wrote {} markers ({}) to {}",
            paths.len(),
            self.dictionary,
            dir.display()
        );
        Ok(paths)
    }

    fn detect_raw(&self, image: &Mat) -> opencv::Result<(Vector<Vector<Point2f>>, Vector<i32>)> {
        let mut corners = Vector::<Vector<Point2f>>::new();
        let mut ids = Vector::<i32>::new();
        if image.empty() {
            return Ok((corners, ids));
        }

        let gray = if image.channels() == 1 {
            image.try_clone()?
        } else {
            let mut gray = Mat::default();
            let code = if image.channels() == 4 {
                imgproc::COLOR_BGRA2GRAY
            } else {
                imgproc::COLOR_BGR2GRAY
            };
            imgproc::cvt_color_def(image, &mut gray, code)?;
            gray
        };

        let mut rejected = Vector::<Vector<Point2f>>::new();
        self.detector
            .detect_markers(&gray, &mut corners, &mut ids, &mut rejected)?;
        Ok((corners, ids))
    }

    /// Detect markers. An empty image or no markers yields an empty list.
    pub fn detect(&self, image: &Mat) -> Result<Vec<MarkerObservation>, MarkerError> {
        let (corners, ids) = self.detect_raw(image)?;
        observations(&corners, &ids)
    }

    /// Detect markers and draw outlines and ids onto `image`.
    ///
    /// With `intrinsics`, each marker's pose is solved and its range drawn,
    /// plus axes when enabled. Without them no pose or range is produced.
    pub fn detect_and_annotate(
        &self,
        image: &mut Mat,
        intrinsics: Option<&CameraIntrinsics>,
        options: &AnnotateOptions,
    ) -> Result<Vec<MarkerObservation>, MarkerError> {
        let (corners, ids) = self.detect_raw(image)?;
        let mut found = observations(&corners, &ids)?;
        if found.is_empty() {
            return Ok(found);
        }

        objdetect::draw_detected_markers(image, &corners, &ids, Scalar::new(0.0, 255.0, 0.0, 0.0))?;

        let Some(intrinsics) = intrinsics else {
            return Ok(found);
        };

        for observation in found.iter_mut() {
            observation.pose = estimate_pose(&observation.corners, intrinsics, options.marker_length)?;
            let Some(pose) = observation.pose else {
                continue;
            };

            if options.draw_axes {
                calib3d::draw_frame_axes(
                    image,
                    &intrinsics.camera_matrix,
                    &intrinsics.dist_coeffs,
                    &column(&pose.rvec)?,
                    &column(&pose.tvec)?,
                    options.marker_length / 2.0,
                    3,
                )?;
            }

            let anchor = observation.corners[0];
            imgproc::put_text(
                image,
                &format!("ID {}: {:.2} m", observation.id, pose.range()),
                Point::new(anchor.x as i32, (anchor.y as i32 - 10).max(12)),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                Scalar::new(0.0, 255.0, 255.0, 0.0),
                2,
                imgproc::LINE_AA,
                false,
            )?;
        }

        Ok(found)
    }
}

fn observations(
    corners: &Vector<Vector<Point2f>>,
    ids: &Vector<i32>,
) -> Result<Vec<MarkerObservation>, MarkerError> {
    let mut found = Vec::with_capacity(ids.len());
    for (id, quad) in ids.iter().zip(corners.iter()) {
        if quad.len() != 4 {
            continue;
        }
        found.push(MarkerObservation {
            id,
            corners: [quad.get(0)?, quad.get(1)?, quad.get(2)?, quad.get(3)?],
            pose: None,
        });
    }
    Ok(found)
}

fn column(values: &[f64; 3]) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(3, 1, CV_64F, Scalar::all(0.0))?;
    mat.data_typed_mut::<f64>()?.copy_from_slice(values);
    Ok(mat)
}

fn mat_to_vec3(mat: &Mat) -> opencv::Result<[f64; 3]> {
    let mut dense = Mat::default();
    mat.convert_to(&mut dense, CV_64F, 1.0, 0.0)?;
    let data = dense.data_typed::<f64>()?;
    if data.len() < 3 {
        return Err(opencv::Error::new(
            opencv::core::StsBadSize,
            format!("expected 3 values, got {}", data.len()),
        ));
    }
    Ok([data[0], data[1], data[2]])
}

/// Solve a single square marker's pose. `None` if the solver fails.
fn estimate_pose(
    corners: &[Point2f; 4],
    intrinsics: &CameraIntrinsics,
    marker_length: f32,
) -> opencv::Result<Option<MarkerPose>> {
    let half = marker_length / 2.0;
    let object: Vector<Point3f> = Vector::from_iter([
        Point3f::new(-half, half, 0.0),
        Point3f::new(half, half, 0.0),
        Point3f::new(half, -half, 0.0),
        Point3f::new(-half, -half, 0.0),
    ]);
    let image: Vector<Point2f> = Vector::from_iter(corners.iter().copied());

    let mut rvec = Mat::default();
    let mut tvec = Mat::default();
    let solved = calib3d::solve_pnp(
        &object,
        &image,
        &intrinsics.camera_matrix,
        &intrinsics.dist_coeffs,
        &mut rvec,
        &mut tvec,
        false,
        calib3d::SOLVEPNP_IPPE_SQUARE,
    )?;
    if !solved {
        return Ok(None);
    }

    Ok(Some(MarkerPose {
        rvec: mat_to_vec3(&rvec)?,
        tvec: mat_to_vec3(&tvec)?,
    }))
}
