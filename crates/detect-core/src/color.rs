//! Colour classes and their calibrated HSV ranges.
//!
//! The ranges were measured on the deployed rig under its fixed lighting and
//! are treated as constants; recalibration means editing this table.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// The five sortable colour classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorClass {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
}

/// Inclusive HSV interval selecting one colour class.
///
/// Components are OpenCV 8-bit HSV: hue in `0..=179`, saturation and value
/// in `0..=255`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    /// Both bounds are inclusive, component-wise.
    pub fn contains(self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }
}

impl ColorClass {
    pub const ALL: [ColorClass; 5] = [
        ColorClass::Red,
        ColorClass::Orange,
        ColorClass::Yellow,
        ColorClass::Green,
        ColorClass::Blue,
    ];

    /// Calibrated HSV range for this class. Total: every class has one.
    pub fn hsv_range(self) -> HsvRange {
        match self {
            ColorClass::Red => HsvRange::new([120, 160, 0], [140, 255, 255]),
            ColorClass::Orange => HsvRange::new([101, 170, 0], [116, 255, 255]),
            ColorClass::Yellow => HsvRange::new([85, 150, 0], [95, 255, 255]),
            ColorClass::Green => HsvRange::new([50, 180, 50], [75, 255, 255]),
            ColorClass::Blue => HsvRange::new([10, 190, 90], [19, 255, 255]),
        }
    }

    /// Single-letter tag used by the remote config store.
    pub fn tag(self) -> &'static str {
        match self {
            ColorClass::Red => "R",
            ColorClass::Orange => "O",
            ColorClass::Yellow => "Y",
            ColorClass::Green => "G",
            ColorClass::Blue => "B",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColorClass::Red => "red",
            ColorClass::Orange => "orange",
            ColorClass::Yellow => "yellow",
            ColorClass::Green => "green",
            ColorClass::Blue => "blue",
        }
    }
}

impl fmt::Display for ColorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input that matched neither a wire tag nor a class name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown colour class {0:?}")]
pub struct ParseColorClassError(String);

impl FromStr for ColorClass {
    type Err = ParseColorClassError;

    /// Accepts the wire tags (`R`, `O`, `Y`, `G`, `B`, exact) and full class
    /// names in any case (`red`, `Blue`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R" => return Ok(ColorClass::Red),
            "O" => return Ok(ColorClass::Orange),
            "Y" => return Ok(ColorClass::Yellow),
            "G" => return Ok(ColorClass::Green),
            "B" => return Ok(ColorClass::Blue),
            _ => {}
        }
        match s.to_ascii_lowercase().as_str() {
            "red" => Ok(ColorClass::Red),
            "orange" => Ok(ColorClass::Orange),
            "yellow" => Ok(ColorClass::Yellow),
            "green" => Ok(ColorClass::Green),
            "blue" => Ok(ColorClass::Blue),
            _ => Err(ParseColorClassError(s.to_string())),
        }
    }
}
