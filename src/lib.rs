//! Stereo Rig Console
//!
//! An operator console for a two-camera rig:
//! - Paired capture on a background thread with a placeholder fallback
//! - Chessboard stereo calibration and rectification
//! - ArUco marker detection with pose and range overlays
//! - Keyboard-driven session control on a wgpu/egui window
//!
//! Every numerically hard step is delegated to OpenCV.

pub mod app;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod display;
pub mod export;
pub mod markers;
pub mod session;
pub mod telemetry;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use app::ConsoleApp;
pub use config::AppConfig;
pub use session::SessionController;
