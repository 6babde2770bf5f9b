//! Frame decoding, resizing, rotation, and base64 encoding for inference.
//!
//! Frames are bounded to 640px on the longest edge, which is the input size
//! of the detection model, so larger camera frames only cost bandwidth.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

use crate::error::{AgentError, Result};

/// Maximum dimension (width or height) of frames sent for inference.
pub const MAX_FRAME_DIMENSION: u32 = 640;

/// A frame ready to send, plus the decoded image it was built from.
pub struct PreparedFrame {
    pub image: DynamicImage,
    pub base64: String,
}

/// Prepare a camera frame for the inference service: decode, bound to
/// [`MAX_FRAME_DIMENSION`], rotate, re-encode as JPEG, base64.
///
/// # Arguments
/// * `frame_bytes` - Raw image bytes from the camera (JPEG, PNG, etc.)
/// * `rotation` - Clockwise rotation in degrees, a multiple of 90
///
/// # Errors
/// - Frame cannot be decoded
/// - JPEG encoding fails
pub fn prepare_frame(frame_bytes: &[u8], rotation: i32) -> Result<PreparedFrame> {
    let img = image::load_from_memory(frame_bytes)
        .map_err(|e| AgentError::Image(format!("Failed to decode camera frame: {}", e)))?;

    let (width, height) = (img.width(), img.height());

    let resized = resize_if_needed(img, MAX_FRAME_DIMENSION);
    let rotated = rotate(resized, rotation);
    debug!(
        "Frame {}x{} -> {}x{} (rotation {})",
        width,
        height,
        rotated.width(),
        rotated.height(),
        rotation
    );

    let jpeg_bytes = encode_to_jpeg(&rotated)?;
    let base64 = STANDARD.encode(&jpeg_bytes);

    Ok(PreparedFrame {
        image: rotated,
        base64,
    })
}

/// Resize image if either dimension exceeds max, maintaining aspect ratio.
fn resize_if_needed(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());

    if width <= max_dimension && height <= max_dimension {
        return img;
    }

    let scale = max_dimension as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * scale).round() as u32).max(1);
    let new_height = ((height as f32 * scale).round() as u32).max(1);

    img.resize_exact(new_width, new_height, image::imageops::FilterType::Triangle)
}

/// Rotate clockwise by a multiple of 90 degrees.
fn rotate(img: DynamicImage, degrees: i32) -> DynamicImage {
    match degrees.rem_euclid(360) {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}

/// Encode to JPEG bytes. JPEG has no alpha channel, so convert to RGB first.
fn encode_to_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, ImageFormat::Jpeg)
        .map_err(|e| AgentError::Image(format!("Failed to encode frame to JPEG: {}", e)))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_prepare_frame_rejects_invalid() {
        let result = prepare_frame(b"not an image", 0);
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("Failed to decode"));
    }

    #[test]
    fn test_resize_if_needed_no_resize() {
        let img = DynamicImage::new_rgb8(500, 300);
        let resized = resize_if_needed(img, 640);
        assert_eq!(resized.width(), 500);
        assert_eq!(resized.height(), 300);
    }

    #[test]
    fn test_resize_if_needed_landscape() {
        let img = DynamicImage::new_rgb8(1920, 1080);
        let resized = resize_if_needed(img, 640);
        assert_eq!(resized.width(), 640);
        assert_eq!(resized.height(), 360);
    }

    #[test]
    fn test_resize_if_needed_portrait() {
        let img = DynamicImage::new_rgb8(1000, 2000);
        let resized = resize_if_needed(img, 640);
        assert_eq!(resized.width(), 320);
        assert_eq!(resized.height(), 640);
    }

    #[test]
    fn test_rotate_swaps_dimensions() {
        let img = DynamicImage::new_rgb8(640, 480);
        let rotated = rotate(img.clone(), 90);
        assert_eq!((rotated.width(), rotated.height()), (480, 640));

        let rotated = rotate(img.clone(), 180);
        assert_eq!((rotated.width(), rotated.height()), (640, 480));

        let rotated = rotate(img, -90);
        assert_eq!((rotated.width(), rotated.height()), (480, 640));
    }

    #[test]
    fn test_encode_to_jpeg_handles_alpha() {
        let img = DynamicImage::new_rgba8(64, 64);
        let bytes = encode_to_jpeg(&img).unwrap();
        // JPEG magic bytes
        assert_eq!(bytes[0], 0xFF);
        assert_eq!(bytes[1], 0xD8);
    }

    #[test]
    fn test_prepare_frame_valid_image() {
        let frame = prepare_frame(&png_bytes(1280, 720), 90).unwrap();
        assert_eq!(frame.image.width(), 360);
        assert_eq!(frame.image.height(), 640);

        let jpeg_bytes = STANDARD.decode(&frame.base64).unwrap();
        assert_eq!(jpeg_bytes[0], 0xFF);
        assert_eq!(jpeg_bytes[1], 0xD8);
    }
}
