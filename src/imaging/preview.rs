//! Annotated preview of the last scored frame, served to the management
//! surface as a PNG data URL.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

use crate::error::{AgentError, Result};

/// Detection boxes are expressed in the model's 640px input space.
const MODEL_INPUT_SIZE: f64 = 640.0;
const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 4;

/// Draw every detection whose confidence reaches `threshold` and return the
/// result as `data:image/png;base64,...`.
///
/// Boxes are `[x1, y1, x2, y2, confidence]`; shorter entries are ignored.
pub fn render_preview(image: &DynamicImage, boxes: &[Vec<f64>], threshold: f64) -> Result<String> {
    let mut canvas = image.to_rgb8();
    let (width, height) = (canvas.width() as f64, canvas.height() as f64);

    for det in boxes.iter().filter(|d| d.len() >= 5 && d[4] >= threshold) {
        let x1 = det[0] / MODEL_INPUT_SIZE * width;
        let y1 = det[1] / MODEL_INPUT_SIZE * height;
        let x2 = det[2] / MODEL_INPUT_SIZE * width;
        let y2 = det[3] / MODEL_INPUT_SIZE * height;
        draw_hollow_rect(&mut canvas, x1, y1, x2, y2);
    }

    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| AgentError::Image(format!("Failed to encode preview: {}", e)))?;

    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(buffer.into_inner())
    ))
}

fn draw_hollow_rect(canvas: &mut RgbImage, x1: f64, y1: f64, x2: f64, y2: f64) {
    let (w, h) = (canvas.width(), canvas.height());
    if w == 0 || h == 0 {
        return;
    }
    let clamp = |v: f64, max: u32| v.max(0.0).min((max - 1) as f64) as u32;
    let (left, right) = (clamp(x1.min(x2), w), clamp(x1.max(x2), w));
    let (top, bottom) = (clamp(y1.min(y2), h), clamp(y1.max(y2), h));

    for t in 0..BOX_THICKNESS {
        for x in left..=right {
            if top + t <= bottom {
                canvas.put_pixel(x, top + t, BOX_COLOR);
            }
            if bottom >= top + t {
                canvas.put_pixel(x, bottom - t, BOX_COLOR);
            }
        }
        for y in top..=bottom {
            if left + t <= right {
                canvas.put_pixel(left + t, y, BOX_COLOR);
            }
            if right >= left + t {
                canvas.put_pixel(right - t, y, BOX_COLOR);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_preview(preview: &str) -> RgbImage {
        let encoded = preview.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        image::load_from_memory(&bytes).unwrap().to_rgb8()
    }

    #[test]
    fn test_preview_is_png_data_url() {
        let img = DynamicImage::new_rgb8(64, 48);
        let preview = render_preview(&img, &[], 0.3).unwrap();
        assert!(preview.starts_with("data:image/png;base64,"));
        let decoded = decode_preview(&preview);
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn test_preview_draws_boxes_above_threshold() {
        let img = DynamicImage::new_rgb8(640, 640);
        let boxes = vec![vec![100.0, 100.0, 200.0, 200.0, 0.9]];
        let decoded = decode_preview(&render_preview(&img, &boxes, 0.3).unwrap());

        assert_eq!(*decoded.get_pixel(100, 150), BOX_COLOR);
        assert_eq!(*decoded.get_pixel(150, 200), BOX_COLOR);
        // Interior untouched
        assert_eq!(*decoded.get_pixel(150, 150), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_preview_skips_low_confidence_and_short_boxes() {
        let img = DynamicImage::new_rgb8(640, 640);
        let boxes = vec![vec![100.0, 100.0, 200.0, 200.0, 0.1], vec![10.0, 10.0, 50.0]];
        let decoded = decode_preview(&render_preview(&img, &boxes, 0.3).unwrap());
        assert_eq!(*decoded.get_pixel(100, 150), Rgb([0, 0, 0]));
        assert_eq!(*decoded.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_preview_clamps_boxes_outside_frame() {
        let img = DynamicImage::new_rgb8(320, 240);
        let boxes = vec![vec![-50.0, -50.0, 900.0, 900.0, 0.99]];
        let decoded = decode_preview(&render_preview(&img, &boxes, 0.3).unwrap());
        assert_eq!(*decoded.get_pixel(0, 0), BOX_COLOR);
        assert_eq!(*decoded.get_pixel(319, 239), BOX_COLOR);
    }
}
