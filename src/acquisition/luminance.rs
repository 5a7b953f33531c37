//! Luminance to lux conversion
//!
//! Channel samples are decoded from sRGB to linear light, weighted with the
//! BT.709 luma coefficients, averaged over the image and scaled by an
//! empirical constant. The result approximates lux; it is not a calibrated
//! photometric measurement.

use crate::error::{DetectorError, Result};
use image::DynamicImage;

/// Integer lux reading published to the broker
pub type Lux = u32;

/// Empirical factor mapping average linear luminance to lux
pub const LUX_SCALE: f64 = 9500.0;

const SRGB_THRESHOLD: f64 = 0.04045;
const SRGB_LINEAR_SCALE: f64 = 12.92;
const SRGB_EXP_OFFSET: f64 = 0.055;
const SRGB_EXP_SCALE: f64 = 1.055;
const SRGB_GAMMA: f64 = 2.4;

const R_WEIGHT: f64 = 0.2126;
const G_WEIGHT: f64 = 0.7152;
const B_WEIGHT: f64 = 0.0722;

/// Convert a normalized sRGB channel value to linear intensity
pub fn srgb_to_linear(c: f64) -> f64 {
    if c <= SRGB_THRESHOLD {
        c / SRGB_LINEAR_SCALE
    } else {
        ((c + SRGB_EXP_OFFSET) / SRGB_EXP_SCALE).powf(SRGB_GAMMA)
    }
}

/// BT.709 luminance of one pixel given linear channel values
#[inline]
pub fn relative_luminance(r: f64, g: f64, b: f64) -> f64 {
    r * R_WEIGHT + g * G_WEIGHT + b * B_WEIGHT
}

/// Lux of a single 8-bit sRGB color, i.e. of any image filled with it
pub fn lux_for_rgb8(rgb: [u8; 3]) -> Lux {
    let [r, g, b] = rgb.map(|c| srgb_to_linear(f64::from(c) / 255.0));
    scale_lux(relative_luminance(r, g, b), 1)
}

fn srgb_lut() -> [f64; 256] {
    let mut lut = [0.0; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = srgb_to_linear(i as f64 / 255.0);
    }
    lut
}

fn sum_rgb8(pixels: impl Iterator<Item = [u8; 3]>) -> f64 {
    let lut = srgb_lut();
    pixels
        .map(|[r, g, b]| {
            relative_luminance(lut[r as usize], lut[g as usize], lut[b as usize])
        })
        .sum()
}

fn sum_rgb16(pixels: impl Iterator<Item = [u16; 3]>) -> f64 {
    pixels
        .map(|rgb| {
            let [r, g, b] = rgb.map(|c| srgb_to_linear(f64::from(c) / 65535.0));
            relative_luminance(r, g, b)
        })
        .sum()
}

fn scale_lux(total: f64, pixels: u64) -> Lux {
    if pixels == 0 {
        return 0;
    }
    let average = total / pixels as f64;
    (average * LUX_SCALE) as Lux
}

/// Compute the lux estimate for a decoded image.
///
/// 8-bit images go through a lookup table built once per call; 16-bit and
/// floating point images use the exact transform. Alpha is ignored and
/// grayscale samples count for all three channels.
pub fn compute_lux(image: &DynamicImage) -> Result<Lux> {
    let pixels = u64::from(image.width()) * u64::from(image.height());
    if pixels == 0 {
        return Err(DetectorError::EmptyImage);
    }

    let total = match image {
        DynamicImage::ImageRgb8(buf) => sum_rgb8(buf.pixels().map(|p| [p[0], p[1], p[2]])),
        DynamicImage::ImageRgba8(buf) => sum_rgb8(buf.pixels().map(|p| [p[0], p[1], p[2]])),
        DynamicImage::ImageLuma8(buf) => sum_rgb8(buf.pixels().map(|p| [p[0]; 3])),
        DynamicImage::ImageLumaA8(buf) => sum_rgb8(buf.pixels().map(|p| [p[0]; 3])),
        other => {
            let buf = other.to_rgb16();
            sum_rgb16(buf.pixels().map(|p| [p[0], p[1], p[2]]))
        }
    };

    Ok(scale_lux(total, pixels))
}
