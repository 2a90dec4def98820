use std::ops::RangeInclusive;

use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::color::DEFAULT_COLOR;

pub const PENCIL_WIDTHS: RangeInclusive<u32> = 1..=10;
pub const ERASER_WIDTHS: RangeInclusive<u32> = 5..=30;
pub const DEFAULT_PENCIL_WIDTH: u32 = 3;
pub const DEFAULT_ERASER_WIDTH: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    #[default]
    Pencil,
    Eraser,
}

impl ToolMode {
    pub fn toggled(self) -> Self {
        match self {
            ToolMode::Pencil => ToolMode::Eraser,
            ToolMode::Eraser => ToolMode::Pencil,
        }
    }

    pub fn width_range(self) -> RangeInclusive<u32> {
        match self {
            ToolMode::Pencil => PENCIL_WIDTHS,
            ToolMode::Eraser => ERASER_WIDTHS,
        }
    }
}

/// Current drawing tool. Only the width belonging to `mode` is in effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolState {
    pub mode: ToolMode,
    pub color: Rgba<u8>,
    pencil_width: u32,
    eraser_width: u32,
}

impl Default for ToolState {
    fn default() -> Self {
        Self {
            mode: ToolMode::Pencil,
            color: DEFAULT_COLOR,
            pencil_width: DEFAULT_PENCIL_WIDTH,
            eraser_width: DEFAULT_ERASER_WIDTH,
        }
    }
}

impl ToolState {
    pub fn new(color: Rgba<u8>, pencil_width: u32, eraser_width: u32) -> Self {
        let mut tool = Self {
            color,
            ..Self::default()
        };
        tool.pencil_width = clamp_width(ToolMode::Pencil, pencil_width);
        tool.eraser_width = clamp_width(ToolMode::Eraser, eraser_width);
        tool
    }

    /// Width of the active mode.
    pub fn width(&self) -> u32 {
        match self.mode {
            ToolMode::Pencil => self.pencil_width,
            ToolMode::Eraser => self.eraser_width,
        }
    }

    pub fn pencil_width(&self) -> u32 {
        self.pencil_width
    }

    pub fn eraser_width(&self) -> u32 {
        self.eraser_width
    }

    /// Sets the width of the active mode, clamped to that mode's range.
    /// Returns the width actually stored.
    pub fn set_width(&mut self, width: u32) -> u32 {
        let clamped = clamp_width(self.mode, width);
        match self.mode {
            ToolMode::Pencil => self.pencil_width = clamped,
            ToolMode::Eraser => self.eraser_width = clamped,
        }
        clamped
    }

    pub fn is_erasing(&self) -> bool {
        self.mode == ToolMode::Eraser
    }
}

fn clamp_width(mode: ToolMode, width: u32) -> u32 {
    let range = mode.width_range();
    width.clamp(*range.start(), *range.end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_follows_mode() {
        let mut tool = ToolState::default();
        assert_eq!(tool.width(), 3);
        tool.mode = tool.mode.toggled();
        assert!(tool.is_erasing());
        assert_eq!(tool.width(), 10);
        assert_eq!(tool.set_width(25), 25);
        tool.mode = ToolMode::Pencil;
        assert_eq!(tool.width(), 3);
        assert_eq!(tool.eraser_width(), 25);
    }

    #[test]
    fn widths_clamp_per_mode() {
        let mut tool = ToolState::default();
        assert_eq!(tool.set_width(0), 1);
        assert_eq!(tool.set_width(50), 10);
        tool.mode = ToolMode::Eraser;
        assert_eq!(tool.set_width(1), 5);
        assert_eq!(tool.set_width(99), 30);

        let tool = ToolState::new(DEFAULT_COLOR, 40, 2);
        assert_eq!((tool.pencil_width(), tool.eraser_width()), (10, 5));
    }
}
