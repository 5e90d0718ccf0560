//! Crop encoding for the remote classifier, the notifier and the archive.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbImage};

const JPEG_QUALITY: u8 = 90;

/// Downscale so the longest side is at most `max_side`. Smaller images are
/// returned unchanged.
pub fn bound_size(image: &RgbImage, max_side: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if max_side == 0 || longest <= max_side {
        return image.clone();
    }
    let scale = max_side as f64 / longest as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    imageops::resize(image, nw, nh, FilterType::Triangle)
}

/// Encode as JPEG.
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buffer.into_inner())
}

/// Bound, then encode.
pub fn encode_bounded_jpeg(image: &RgbImage, max_side: u32) -> Result<Vec<u8>, image::ImageError> {
    encode_jpeg(&bound_size(image, max_side))
}
