//! Session controller.
//!
//! Owns the capture loop, calibration engine and marker engine, turns the
//! latest frame pair into the frame shown on screen, and applies operator
//! commands. The window shell in [`crate::app`] only maps keys to
//! [`Command`]s and presents the returned frame.

use std::path::PathBuf;
use std::time::Duration;

use opencv::core::Mat;

use crate::calibration::{BoardSpec, CalibrationError, CalibrationSession, StereoCalibration};
use crate::camera::{CaptureLoop, FramePair, FrameSource};
use crate::config::{AppConfig, PathsConfig};
use crate::export::{self, CaptureFormat, ExportError};
use crate::markers::{AnnotateOptions, MarkerEngine, MarkerError, MarkerObservation};
use crate::telemetry::FpsCounter;
use crate::view::{self, SystemMonitor, ViewLayout};

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("marker error: {0}")]
    Marker(#[from] MarkerError),
    #[error("export error: {0}")]
    Export(#[from] ExportError),
    #[error("OpenCV error: {0}")]
    Vision(#[from] opencv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    /// Add a calibration sample while a session is active, otherwise save a pair.
    Capture,
    /// Start a calibration session, or cancel the running one.
    ToggleCalibration,
    /// Calibrate from the accumulated samples and end the session.
    CommitCalibration,
    ToggleMarkers,
    CycleLayout,
    ToggleFps,
    ToggleSystemInfo,
}

/// Whether the console keeps running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// View flags and the running frame rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub layout: ViewLayout,
    pub markers_enabled: bool,
    pub show_fps: bool,
    pub show_system_info: bool,
    /// Frames rendered per second, refreshed once a second.
    pub fps: f64,
}

impl SessionState {
    fn from_config(config: &AppConfig) -> Self {
        Self {
            layout: config.display.layout,
            markers_enabled: false,
            show_fps: config.display.show_fps,
            show_system_info: config.display.show_system_info,
            fps: 0.0,
        }
    }
}

/// Frame pipeline and command handling for one console session.
pub struct SessionController {
    capture: CaptureLoop,
    synchronous: bool,
    calibration: StereoCalibration,
    calibration_session: CalibrationSession,
    board: BoardSpec,
    auto_save: bool,
    markers: MarkerEngine,
    annotate: AnnotateOptions,
    /// Observations from the last rendered frame, left then right.
    observations: Vec<MarkerObservation>,
    state: SessionState,
    fps_counter: FpsCounter,
    system_monitor: SystemMonitor,
    paths: PathsConfig,
    capture_format: CaptureFormat,
    capture_quality: u8,
    shut_down: bool,
}

impl SessionController {
    /// Build a controller around an already initialized `source`.
    pub fn new(config: &AppConfig, source: FrameSource) -> Result<Self, SessionError> {
        let stop_timeout = Duration::from_millis(config.camera.stop_timeout_ms);
        let sample_dir = config
            .calibration
            .save_samples
            .then(|| config.paths.calibration_samples.clone());

        Ok(Self {
            capture: CaptureLoop::new(source, stop_timeout),
            synchronous: config.camera.synchronous,
            calibration: StereoCalibration::new(config.calibration.rectify_alpha),
            calibration_session: CalibrationSession::new(config.calibration.min_samples, sample_dir),
            board: BoardSpec::from_config(&config.calibration),
            auto_save: config.calibration.auto_save,
            markers: MarkerEngine::new(config.markers.dictionary)?,
            annotate: AnnotateOptions::from_config(&config.markers),
            observations: Vec::new(),
            state: SessionState::from_config(config),
            fps_counter: FpsCounter::new(),
            system_monitor: SystemMonitor::new(),
            paths: config.paths.clone(),
            capture_format: config.display.capture_format,
            capture_quality: config.display.capture_quality,
            shut_down: false,
        })
    }

    /// Load a saved calibration if one exists and start the capture thread.
    pub fn start(&mut self) -> Result<(), SessionError> {
        let calibration_file = &self.paths.calibration_file;
        if calibration_file.is_file() {
            if let Err(e) = self.calibration.load(calibration_file) {
                log::warn!(
                    "Ignoring calibration file {}: {}",
                    calibration_file.display(),
                    e
                );
            }
        }

        if self.synchronous {
            log::info!("Synchronous capture, frames are read on the render thread");
        } else {
            self.capture.start()?;
        }
        Ok(())
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn calibration(&self) -> &StereoCalibration {
        &self.calibration
    }

    pub fn calibration_session(&self) -> &CalibrationSession {
        &self.calibration_session
    }

    /// Markers found in the last rendered frame.
    pub fn observations(&self) -> &[MarkerObservation] {
        &self.observations
    }

    fn current_pair(&self) -> FramePair {
        self.capture.read_direct()
    }

    /// Produce the next display frame.
    ///
    /// Rectifies when calibrated, annotates markers when enabled, composes
    /// the layout and draws the status, FPS and system overlays.
    pub fn process_frame(&mut self) -> Result<Mat, SessionError> {
        let mut pair = self.calibration.rectify(self.current_pair())?;

        self.observations.clear();
        if self.state.markers_enabled {
            let calibration = self.calibration.state();
            let left = calibration.map(|c| &c.left);
            let right = calibration.map(|c| &c.right);
            let found = self
                .markers
                .detect_and_annotate(&mut pair.left, left, &self.annotate)?;
            self.observations.extend(found);
            let found = self
                .markers
                .detect_and_annotate(&mut pair.right, right, &self.annotate)?;
            self.observations.extend(found);
        }

        let mut frame = view::compose(pair, self.state.layout)?;

        if self.calibration_session.is_active() {
            view::draw_status_line(&mut frame, &self.calibration_session.status_line())?;
        }

        self.state.fps = self.fps_counter.tick();
        if self.state.show_fps {
            view::draw_fps(&mut frame, self.state.fps)?;
        }
        if self.state.show_system_info {
            view::draw_system_info(&mut frame, self.system_monitor.sample())?;
        }

        Ok(frame)
    }

    /// Apply `command`. Failures are logged and the session continues.
    pub fn dispatch(&mut self, command: Command) -> Flow {
        match self.handle(command) {
            Ok(flow) => flow,
            Err(e) => {
                log::error!("{:?} failed: {}", command, e);
                Flow::Continue
            }
        }
    }

    fn handle(&mut self, command: Command) -> Result<Flow, SessionError> {
        match command {
            Command::Quit => return Ok(Flow::Quit),
            Command::Capture => self.capture_pair()?,
            Command::ToggleCalibration => {
                if self.calibration_session.is_active() {
                    self.calibration_session.stop();
                } else {
                    self.calibration_session.start();
                }
            }
            Command::CommitCalibration => self.commit_calibration()?,
            Command::ToggleMarkers => {
                self.state.markers_enabled = !self.state.markers_enabled;
                log::info!(
                    "Marker overlay {}",
                    if self.state.markers_enabled { "on" } else { "off" }
                );
            }
            Command::CycleLayout => {
                self.state.layout = self.state.layout.next();
                log::info!("View layout: {}", self.state.layout.label());
            }
            Command::ToggleFps => self.state.show_fps = !self.state.show_fps,
            Command::ToggleSystemInfo => {
                self.state.show_system_info = !self.state.show_system_info
            }
        }
        Ok(Flow::Continue)
    }

    fn capture_pair(&mut self) -> Result<(), SessionError> {
        let pair = self.current_pair();
        if self.calibration_session.is_active() {
            self.calibration_session.add_sample(pair)?;
        } else {
            export::save_stereo_pair(
                &pair,
                &self.paths.captures_left,
                &self.paths.captures_right,
                self.capture_format,
                self.capture_quality,
            )?;
        }
        Ok(())
    }

    fn commit_calibration(&mut self) -> Result<(), SessionError> {
        if !self.calibration_session.is_active() {
            log::warn!("No calibration session to finish");
            return Ok(());
        }

        self.calibration
            .commit(&mut self.calibration_session, &self.board)?;
        if let Some(state) = self.calibration.state() {
            log::info!("Stereo calibration complete, RMS {:.4} px", state.rms_error);
        }

        if self.auto_save {
            self.calibration.save(&self.paths.calibration_file)?;
        }
        Ok(())
    }

    /// Where captured pairs are written.
    pub fn capture_dirs(&self) -> (PathBuf, PathBuf) {
        (
            self.paths.captures_left.clone(),
            self.paths.captures_right.clone(),
        )
    }

    /// Stop the capture thread and release both cameras. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.capture.stop();
        self.capture.release();
        log::info!("Session shut down");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
