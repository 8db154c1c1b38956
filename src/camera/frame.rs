//! Stereo frame pair.

use opencv::core::{Mat, Size};
use opencv::prelude::*;

/// Which camera of the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Lowercase role tag used in file names.
    pub fn label(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "LEFT"),
            Side::Right => write!(f, "RIGHT"),
        }
    }
}

/// Two BGR frames captured at approximately the same instant.
#[derive(Debug)]
pub struct FramePair {
    /// Left camera frame.
    pub left: Mat,
    /// Right camera frame.
    pub right: Mat,
}

impl FramePair {
    pub fn new(left: Mat, right: Mat) -> Self {
        Self { left, right }
    }

    /// Deep copy of both frames.
    pub fn try_clone(&self) -> opencv::Result<Self> {
        Ok(Self {
            left: self.left.try_clone()?,
            right: self.right.try_clone()?,
        })
    }

    /// Frame for one side.
    pub fn get(&self, side: Side) -> &Mat {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Size of the left frame.
    pub fn size(&self) -> opencv::Result<Size> {
        self.left.size()
    }

    /// Split into owned frames.
    pub fn into_parts(self) -> (Mat, Mat) {
        (self.left, self.right)
    }
}
