//! Interactive calibration session: sample accumulation between start and commit.

use std::path::PathBuf;

use opencv::core::Mat;

use super::CalibrationError;
use crate::camera::FramePair;
use crate::export;

/// One left/right chessboard view.
#[derive(Debug)]
pub struct CalibrationSample {
    pub left: Mat,
    pub right: Mat,
}

impl CalibrationSample {
    pub fn new(left: Mat, right: Mat) -> Self {
        Self { left, right }
    }
}

impl From<FramePair> for CalibrationSample {
    fn from(pair: FramePair) -> Self {
        let (left, right) = pair.into_parts();
        Self { left, right }
    }
}

/// Sample accumulator for an in-progress calibration.
pub struct CalibrationSession {
    active: bool,
    samples: Vec<CalibrationSample>,
    min_samples: usize,
    /// Where sample images are written, if enabled.
    sample_dir: Option<PathBuf>,
    /// Samples written during this process, keeps file indices unique.
    saved_count: usize,
}

impl CalibrationSession {
    /// Create an idle session requiring `min_samples` before commit.
    pub fn new(min_samples: usize, sample_dir: Option<PathBuf>) -> Self {
        Self {
            active: false,
            samples: Vec::new(),
            min_samples,
            sample_dir,
            saved_count: 0,
        }
    }

    /// Begin accumulating. Any previous samples are discarded.
    pub fn start(&mut self) {
        self.samples.clear();
        self.active = true;
        log::info!(
            "Calibration started: capture at least {} chessboard views",
            self.min_samples
        );
    }

    /// Abort without calibrating.
    pub fn stop(&mut self) {
        if self.active {
            log::info!(
                "Calibration cancelled, {} samples discarded",
                self.samples.len()
            );
        }
        self.samples.clear();
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Whether enough samples have been collected to commit.
    pub fn is_ready(&self) -> bool {
        self.samples.len() >= self.min_samples
    }

    /// Add a sample pair. Returns the new sample count.
    pub fn add_sample(&mut self, pair: FramePair) -> Result<usize, CalibrationError> {
        if !self.active {
            return Err(CalibrationError::NotInProgress);
        }

        if let Some(dir) = &self.sample_dir {
            match export::save_calibration_sample(dir, self.saved_count, &pair) {
                Ok(_) => self.saved_count += 1,
                Err(e) => log::warn!("Failed to save calibration sample: {}", e),
            }
        }

        self.samples.push(CalibrationSample::from(pair));
        log::info!(
            "Calibration sample {}/{} added",
            self.samples.len(),
            self.min_samples
        );
        Ok(self.samples.len())
    }

    /// End the session and hand over its samples.
    pub fn take_samples(&mut self) -> Result<Vec<CalibrationSample>, CalibrationError> {
        if !self.active {
            return Err(CalibrationError::NoSession);
        }
        self.active = false;
        Ok(std::mem::take(&mut self.samples))
    }

    /// One-line progress text for the status overlay.
    pub fn status_line(&self) -> String {
        format!(
            "Calibration: {}/{} samples (SPACE add, ENTER finish, C cancel)",
            self.samples.len(),
            self.min_samples
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};
    use opencv::prelude::*;

    fn pair() -> FramePair {
        let frame = || Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(90.0)).unwrap();
        FramePair::new(frame(), frame())
    }

    #[test]
    fn test_add_sample_requires_active_session() {
        let mut session = CalibrationSession::new(20, None);
        assert!(matches!(
            session.add_sample(pair()),
            Err(CalibrationError::NotInProgress)
        ));
        assert_eq!(session.sample_count(), 0);
    }

    #[test]
    fn test_accumulates_and_takes() {
        let mut session = CalibrationSession::new(2, None);
        session.start();
        assert_eq!(session.add_sample(pair()).unwrap(), 1);
        assert!(!session.is_ready());
        assert_eq!(session.add_sample(pair()).unwrap(), 2);
        assert!(session.is_ready());

        let samples = session.take_samples().unwrap();
        assert_eq!(samples.len(), 2);
        assert!(!session.is_active());
        assert!(matches!(
            session.take_samples(),
            Err(CalibrationError::NoSession)
        ));
    }

    #[test]
    fn test_stop_discards_samples() {
        let mut session = CalibrationSession::new(20, None);
        session.start();
        session.add_sample(pair()).unwrap();
        session.stop();
        assert!(!session.is_active());
        assert_eq!(session.sample_count(), 0);
    }

    #[test]
    fn test_restart_clears_samples() {
        let mut session = CalibrationSession::new(20, None);
        session.start();
        session.add_sample(pair()).unwrap();
        session.start();
        assert_eq!(session.sample_count(), 0);
    }

    #[test]
    fn test_samples_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = CalibrationSession::new(20, Some(dir.path().to_path_buf()));
        session.start();
        session.add_sample(pair()).unwrap();
        session.add_sample(pair()).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 4);
        assert!(names.iter().any(|n| n.starts_with("calib_left_0_")));
        assert!(names.iter().any(|n| n.starts_with("calib_right_1_")));
    }

    #[test]
    fn test_status_line() {
        let mut session = CalibrationSession::new(20, None);
        session.start();
        session.add_sample(pair()).unwrap();
        assert!(session.status_line().starts_with("Calibration: 1/20"));
    }
}
