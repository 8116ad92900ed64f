//! Display regions declared by descriptors and their runtime buffers.
//!
//! Character displays (LCD-style) hold a grid of cells; everything else is a
//! monochrome pixel grid. Updates overwrite, they never blend, and writes that
//! fall outside the grid are clipped.

use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// Largest buffer a descriptor may declare, in cells or pixels.
pub const MAX_DISPLAY_CELLS: usize = 1 << 20;

/// Default character grid when a text display omits `cols`/`rows`.
pub const DEFAULT_TEXT_GRID: (usize, usize) = (16, 2);

/// On-screen placement of a display; consumed by the editor only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub w: f64,
    #[serde(default)]
    pub h: f64,
}

/// The `display` section of a descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplaySpec {
    /// Display type, e.g. `"lcd_16x2"`, `"char"`, `"oled_128x64"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Placement within the device image
    pub region: Region,
    /// Pixel width (pixel displays)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width_px: Option<u32>,
    /// Pixel height (pixel displays)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_px: Option<u32>,
    /// Columns (character displays)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u32>,
    /// Rows (character displays)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u32>,
    /// Editor-only keys (colors, interface, bus address)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DisplaySpec {
    /// Returns true if this display is a character grid.
    pub fn is_text(&self) -> bool {
        let kind = self.kind.to_ascii_lowercase();
        ["char", "lcd", "text"].iter().any(|k| kind.contains(k))
    }

    /// Builds an empty buffer for this display.
    pub fn buffer(&self) -> Result<DisplayBuffer, String> {
        let (width, height) = if self.is_text() {
            (
                self.cols.map_or(DEFAULT_TEXT_GRID.0, |c| c as usize),
                self.rows.map_or(DEFAULT_TEXT_GRID.1, |r| r as usize),
            )
        } else {
            (
                self.width_px.map_or(self.region.w.max(0.0) as usize, |w| w as usize),
                self.height_px.map_or(self.region.h.max(0.0) as usize, |h| h as usize),
            )
        };

        if width == 0 || height == 0 {
            return Err(format!("'{}' has an empty {}x{} grid", self.kind, width, height));
        }
        if width.saturating_mul(height) > MAX_DISPLAY_CELLS {
            return Err(format!("'{}' grid {}x{} is too large", self.kind, width, height));
        }

        Ok(if self.is_text() {
            DisplayBuffer::Text {
                cols: width,
                rows: height,
                cells: vec![' '; width * height],
            }
        } else {
            DisplayBuffer::Pixels {
                width,
                height,
                bits: vec![false; width * height],
            }
        })
    }
}

/// A write into a display buffer, as carried by `set_display` actions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayUpdate {
    /// Blank the whole buffer
    Clear,
    /// Write text at a cell position (character displays)
    Text { row: usize, col: usize, text: String },
    /// Set one pixel (pixel displays)
    Pixel { x: usize, y: usize, on: bool },
    /// Set every pixel (pixel displays)
    Fill { on: bool },
}

impl DisplayUpdate {
    fn name(&self) -> &'static str {
        match self {
            DisplayUpdate::Clear => "clear",
            DisplayUpdate::Text { .. } => "text",
            DisplayUpdate::Pixel { .. } => "pixel",
            DisplayUpdate::Fill { .. } => "fill",
        }
    }
}

/// Runtime contents of a display.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayBuffer {
    /// Character grid, row-major
    Text {
        cols: usize,
        rows: usize,
        cells: Vec<char>,
    },
    /// Monochrome pixel grid, row-major
    Pixels {
        width: usize,
        height: usize,
        bits: Vec<bool>,
    },
}

impl DisplayBuffer {
    /// Applies an update. Returns whether any cell changed.
    pub fn apply(&mut self, update: &DisplayUpdate) -> Result<bool, ActionError> {
        match (self, update) {
            (buffer, DisplayUpdate::Clear) => Ok(buffer.clear()),
            (DisplayBuffer::Text { cols, rows, cells }, DisplayUpdate::Text { row, col, text }) => {
                if *row >= *rows || *col >= *cols {
                    return Ok(false);
                }
                let start = row * *cols + col;
                let room = *cols - col;
                let mut changed = false;
                for (offset, ch) in text.chars().take(room).enumerate() {
                    let cell = &mut cells[start + offset];
                    if *cell != ch {
                        *cell = ch;
                        changed = true;
                    }
                }
                Ok(changed)
            }
            (DisplayBuffer::Pixels { width, height, bits }, DisplayUpdate::Pixel { x, y, on }) => {
                if *x >= *width || *y >= *height {
                    return Ok(false);
                }
                let bit = &mut bits[y * *width + x];
                let changed = *bit != *on;
                *bit = *on;
                Ok(changed)
            }
            (DisplayBuffer::Pixels { bits, .. }, DisplayUpdate::Fill { on }) => {
                let changed = bits.iter().any(|b| b != on);
                bits.iter_mut().for_each(|b| *b = *on);
                Ok(changed)
            }
            (buffer, update) => Err(ActionError::TypeMismatch {
                target: "display".to_string(),
                expected: format!("{} update", buffer.kind_name()),
                found: update.name().to_string(),
            }),
        }
    }

    /// Blanks the buffer. Returns whether anything changed.
    pub fn clear(&mut self) -> bool {
        match self {
            DisplayBuffer::Text { cells, .. } => {
                let changed = cells.iter().any(|c| *c != ' ');
                cells.iter_mut().for_each(|c| *c = ' ');
                changed
            }
            DisplayBuffer::Pixels { bits, .. } => {
                let changed = bits.iter().any(|b| *b);
                bits.iter_mut().for_each(|b| *b = false);
                changed
            }
        }
    }

    /// Text of one row (character displays).
    pub fn row_text(&self, row: usize) -> Option<String> {
        match self {
            DisplayBuffer::Text { cols, rows, cells } if row < *rows => {
                Some(cells[row * cols..(row + 1) * cols].iter().collect())
            }
            _ => None,
        }
    }

    /// All rows of a character display; empty for pixel displays.
    pub fn lines(&self) -> Vec<String> {
        match self {
            DisplayBuffer::Text { rows, .. } => (0..*rows).filter_map(|r| self.row_text(r)).collect(),
            DisplayBuffer::Pixels { .. } => Vec::new(),
        }
    }

    /// State of one pixel (pixel displays).
    pub fn pixel(&self, x: usize, y: usize) -> Option<bool> {
        match self {
            DisplayBuffer::Pixels { width, height, bits } if x < *width && y < *height => {
                Some(bits[y * width + x])
            }
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            DisplayBuffer::Text { .. } => "text",
            DisplayBuffer::Pixels { .. } => "pixel",
        }
    }
}
