//! Frame presentation helpers.
//!
//! Layout composition, text overlays and the system information sampler
//! used to build the frame shown in the console window.

mod compose;
mod overlay;
mod system_info;

pub use compose::{compose, ViewLayout};
pub use overlay::{draw_fps, draw_status_line, draw_system_info};
pub use system_info::{SystemInfo, SystemMonitor};
