//! Rectangular crop regions
//!
//! A crop is given in source-image pixel coordinates. It is clamped to the
//! decoded image before extraction, so an oversized region simply stops at
//! the image edge.

use crate::error::{DetectorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Width and height used when only the crop origin is configured
pub const DEFAULT_CROP_SIZE: u32 = 100;

/// Configured crop region, possibly extending past the image bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Crop region after clamping to a concrete image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn x_range(&self) -> Range<u32> {
        self.x..self.x + self.width
    }

    pub fn y_range(&self) -> Range<u32> {
        self.y..self.y + self.height
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl CropRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Crop of [`DEFAULT_CROP_SIZE`] square anchored at `(x, y)`
    pub fn at(x: u32, y: u32) -> Self {
        Self::new(x, y, DEFAULT_CROP_SIZE, DEFAULT_CROP_SIZE)
    }

    /// Clamp the region to an image of the given size.
    ///
    /// Returns `None` when the region does not intersect the image.
    pub fn clamp(&self, image_width: u32, image_height: u32) -> Option<PixelRect> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }

        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }

        Some(PixelRect {
            x: self.x,
            y: self.y,
            width,
            height,
        })
    }

    /// Like [`CropRegion::clamp`] but reports an empty intersection as an error
    pub fn resolve(&self, image_width: u32, image_height: u32) -> Result<PixelRect> {
        self.clamp(image_width, image_height)
            .ok_or(DetectorError::EmptyImage)
    }
}

impl FromStr for CropRegion {
    type Err = DetectorError;

    /// Parse `"x,y"` or `"x,y,width,height"`
    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<u32>().map_err(|e| {
                    DetectorError::config(format!("invalid crop value '{part}': {e}"))
                })
            })
            .collect::<Result<Vec<u32>>>()?;

        match values.as_slice() {
            [x, y] => Ok(Self::at(*x, *y)),
            [x, y, width, height] => Ok(Self::new(*x, *y, *width, *height)),
            _ => Err(DetectorError::config(format!(
                "crop must be 'x,y' or 'x,y,width,height', got {} values",
                values.len()
            ))),
        }
    }
}

impl fmt::Display for CropRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}
