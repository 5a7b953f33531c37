//! Test fixtures: encoded images and configurations

use dark_detector::config::ImageConfig;
use dark_detector::error_recovery::RetryPolicy;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rstest::*;
use std::io::Cursor;
use std::time::Duration;

/// Retry schedule short enough for wall-clock tests
#[fixture]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(1),
        multiplier: 2.0,
    }
}

pub fn image_config(url: &str, retry: RetryPolicy) -> ImageConfig {
    ImageConfig {
        retry,
        request_timeout: Duration::from_secs(5),
        ..ImageConfig::new(url)
    }
}

pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(rgb))
}

/// Black image with a white square in the bottom right corner
pub fn bright_corner(size: u32, corner: u32) -> RgbImage {
    let mut image = solid(size, size, [0, 0, 0]);
    for y in size - corner..size {
        for x in size - corner..size {
            image.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
    image
}

pub fn encode(image: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encode test image");
    bytes
}

pub fn png(image: RgbImage) -> Vec<u8> {
    encode(image, ImageFormat::Png)
}

pub fn jpeg(image: RgbImage) -> Vec<u8> {
    encode(image, ImageFormat::Jpeg)
}
