//! Lux estimation properties across image shapes and pixel formats

use dark_detector::acquisition::luminance::lux_for_rgb8;
use dark_detector::acquisition::{compute_lux, CropRegion, LUX_SCALE};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use rstest::*;

#[rstest]
#[case(1, 1)]
#[case(3, 7)]
#[case(64, 64)]
#[case(640, 480)]
fn test_uniform_image_independent_of_size(
    #[case] width: u32,
    #[case] height: u32,
    #[values([0, 0, 0], [255, 255, 255], [128, 128, 128], [255, 0, 0], [12, 200, 90])] rgb: [u8; 3],
) {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb)));
    assert_eq!(compute_lux(&image).unwrap(), lux_for_rgb8(rgb));
}

#[rstest]
#[case::black([0, 0, 0], 0)]
#[case::white([255, 255, 255], 9500)]
#[case::mid_gray([128, 128, 128], 2050)]
#[case::pure_red([255, 0, 0], 2019)]
#[case::pure_green([0, 255, 0], 6794)]
#[case::pure_blue([0, 0, 255], 685)]
fn test_reference_colors(#[case] rgb: [u8; 3], #[case] expected: u32) {
    let lux = lux_for_rgb8(rgb);
    assert!(
        lux.abs_diff(expected) <= 1,
        "{rgb:?} gave {lux}, expected about {expected}"
    );
}

#[test]
fn test_brighter_never_reads_darker() {
    let mut previous = 0;
    for level in 0..=255u8 {
        let lux = lux_for_rgb8([level, level, level]);
        assert!(lux >= previous, "level {level} dropped to {lux}");
        previous = lux;
    }
    assert_eq!(previous, LUX_SCALE as u32);
}

#[test]
fn test_pixel_formats_agree() {
    let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([77])));
    let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([77, 77, 77])));
    let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([77, 77, 77, 3])));

    let expected = compute_lux(&rgb).unwrap();
    assert_eq!(compute_lux(&gray).unwrap(), expected);
    assert_eq!(compute_lux(&rgba).unwrap(), expected);
}

#[test]
fn test_cropped_average_matches_region() {
    let mut image = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
    for y in 0..50 {
        for x in 0..100 {
            image.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
    let image = DynamicImage::ImageRgb8(image);

    // Half of the whole frame is white
    assert_eq!(compute_lux(&image).unwrap(), 4750);

    // A region straddling the border sees a quarter white
    let rect = CropRegion::new(0, 25, 100, 100).resolve(100, 100).unwrap();
    assert_eq!((rect.width, rect.height), (100, 75));
    let region = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
    assert_eq!(compute_lux(&region).unwrap(), 3166);
}
