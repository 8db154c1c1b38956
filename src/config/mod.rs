//! Configuration and serialization module.
//!
//! The whole configuration is built once at startup (defaults, then the
//! JSON file, then command line overrides) and handed to each component
//! by reference.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::camera::BackendPreference;
use crate::export::CaptureFormat;
use crate::markers::MarkerDictionary;
use crate::view::ViewLayout;

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera devices and capture cadence.
    pub camera: CameraConfig,
    /// Calibration target and policy.
    pub calibration: CalibrationConfig,
    /// ArUco dictionary and overlay options.
    pub markers: MarkerConfig,
    /// Window and overlay defaults.
    pub display: DisplayConfig,
    /// Output locations.
    pub paths: PathsConfig,
}

impl AppConfig {
    /// Default config file location (`<config_dir>/stereo-console/config.json`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stereo-console")
            .join("config.json")
    }

    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let config = Self::load(path)?;
            log::info!("Loaded settings from {}", path.display());
            Ok(config)
        } else {
            log::info!("No settings file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Create every output directory the session writes into.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in self.paths.required_dirs() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Which capture backend to use.
    pub backend: BackendPreference,
    /// Left device index.
    pub left_id: i32,
    /// Right device index.
    pub right_id: i32,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Capture cadence in frames per second.
    pub fps: u32,
    /// GStreamer pipeline template with `{id}`, `{width}`, `{height}`, `{fps}` placeholders.
    pub gstreamer_pipeline: Option<String>,
    /// Upper bound on waiting for the capture thread at shutdown.
    pub stop_timeout_ms: u64,
    /// Read synchronously on the UI thread instead of running the capture thread.
    pub synchronous: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            left_id: 0,
            right_id: 1,
            width: 640,
            height: 480,
            fps: 30,
            gstreamer_pipeline: None,
            stop_timeout_ms: 1000,
            synchronous: false,
        }
    }
}

/// Calibration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Internal corners along the board width.
    pub board_columns: u32,
    /// Internal corners along the board height.
    pub board_rows: u32,
    /// Square edge length in millimetres.
    pub square_size_mm: f32,
    /// Samples required before a commit is attempted.
    pub min_samples: usize,
    /// Rectification crop/field-of-view trade-off (0 = crop, 1 = keep all pixels).
    pub rectify_alpha: f64,
    /// Persist the calibration as soon as it is computed.
    pub auto_save: bool,
    /// Write every accumulated sample pair to the samples directory.
    pub save_samples: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            board_columns: 9,
            board_rows: 6,
            square_size_mm: 25.0,
            min_samples: 20,
            rectify_alpha: 0.9,
            auto_save: true,
            save_samples: true,
        }
    }
}

/// Marker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Predefined dictionary.
    pub dictionary: MarkerDictionary,
    /// Side length of generated marker images in pixels.
    pub marker_size_px: u32,
    /// Printed marker side length in metres.
    pub marker_length_m: f32,
    /// Draw coordinate axes on posed markers.
    pub draw_axes: bool,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            dictionary: MarkerDictionary::Dict4x4_50,
            marker_size_px: 200,
            marker_length_m: 0.05,
            draw_axes: true,
        }
    }
}

/// Display configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Window title.
    pub window_title: String,
    /// Initial window width.
    pub window_width: u32,
    /// Initial window height.
    pub window_height: u32,
    /// Initial view layout.
    pub layout: ViewLayout,
    /// Show the FPS counter.
    pub show_fps: bool,
    /// Show CPU/memory/temperature text.
    pub show_system_info: bool,
    /// Format for captured frames.
    pub capture_format: CaptureFormat,
    /// JPEG quality (1-100).
    pub capture_quality: u8,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_title: "Stereo Camera Console".to_string(),
            window_width: 1280,
            window_height: 720,
            layout: ViewLayout::SideBySide,
            show_fps: true,
            show_system_info: true,
            capture_format: CaptureFormat::Png,
            capture_quality: 95,
        }
    }
}

/// Output paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for left captures.
    pub captures_left: PathBuf,
    /// Directory for right captures.
    pub captures_right: PathBuf,
    /// Calibration file.
    pub calibration_file: PathBuf,
    /// Directory for calibration sample images.
    pub calibration_samples: PathBuf,
    /// Directory for generated marker images.
    pub markers_dir: PathBuf,
}

impl PathsConfig {
    /// Root every relative path under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        let defaults = Self::default();
        Self {
            captures_left: root.join(defaults.captures_left),
            captures_right: root.join(defaults.captures_right),
            calibration_file: root.join(defaults.calibration_file),
            calibration_samples: root.join(defaults.calibration_samples),
            markers_dir: root.join(defaults.markers_dir),
        }
    }

    fn required_dirs(&self) -> Vec<&Path> {
        let mut dirs = vec![
            self.captures_left.as_path(),
            self.captures_right.as_path(),
            self.calibration_samples.as_path(),
            self.markers_dir.as_path(),
        ];
        if let Some(parent) = self.calibration_file.parent() {
            if !parent.as_os_str().is_empty() {
                dirs.push(parent);
            }
        }
        dirs
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            captures_left: PathBuf::from("captures/left"),
            captures_right: PathBuf::from("captures/right"),
            calibration_file: PathBuf::from("calibration/stereo_calibration.bin"),
            calibration_samples: PathBuf::from("calibration/samples"),
            markers_dir: PathBuf::from("aruco_markers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{ "camera": { "width": 1280, "height": 720 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.camera.height, 720);
        assert_eq!(config.camera.fps, 30);
        assert_eq!(config.calibration.board_columns, 9);
        assert_eq!(config.calibration.min_samples, 20);
        assert_eq!(config.markers.dictionary, MarkerDictionary::Dict4x4_50);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.camera.left_id = 2;
        config.display.layout = ViewLayout::RightOnly;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.camera.left_id, 2);
        assert_eq!(loaded.display.layout, ViewLayout::RightOnly);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.camera.right_id, 1);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths = PathsConfig::rooted_at(dir.path());
        config.ensure_directories().unwrap();

        assert!(config.paths.captures_left.is_dir());
        assert!(config.paths.captures_right.is_dir());
        assert!(config.paths.calibration_samples.is_dir());
        assert!(config.paths.markers_dir.is_dir());
        assert!(config.paths.calibration_file.parent().unwrap().is_dir());
    }
}
