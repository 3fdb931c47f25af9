use std::io::Cursor;

use async_trait::async_trait;
use image::{ImageFormat, ImageReader, Rgb, RgbImage};
use tracing::debug;

use super::{AnnotationError, ImageAnnotator};

const FRAME_COLOR: Rgb<u8> = Rgb([255, 64, 0]);
const BANNER_COLOR: Rgb<u8> = Rgb([32, 32, 32]);

/// Built-in annotator: outlines the whole frame as a single detection and
/// draws a label banner across the top, then re-encodes as PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameAnnotator;

impl FrameAnnotator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageAnnotator for FrameAnnotator {
    fn name(&self) -> &str {
        "frame"
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn annotate(&self, image: Vec<u8>) -> Result<Vec<u8>, AnnotationError> {
        // Decode and encode are CPU-bound
        tokio::task::spawn_blocking(move || annotate_sync(&image))
            .await
            .map_err(|e| AnnotationError::Task(e.to_string()))?
    }
}

fn annotate_sync(bytes: &[u8]) -> Result<Vec<u8>, AnnotationError> {
    let mut canvas = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .decode()?
        .to_rgb8();

    let (width, height) = canvas.dimensions();
    let thickness = (width.min(height) / 100).max(2);
    let banner = (height / 20).max(12).min(height);

    draw_outline(&mut canvas, thickness, FRAME_COLOR);
    fill_rect(&mut canvas, (0, 0), (width, banner), BANNER_COLOR);

    let mut out = Cursor::new(Vec::new());
    canvas.write_to(&mut out, ImageFormat::Png)?;
    debug!(width, height, bytes = out.get_ref().len(), "Frame annotation complete");
    Ok(out.into_inner())
}

fn draw_outline(canvas: &mut RgbImage, thickness: u32, color: Rgb<u8>) {
    let (w, h) = canvas.dimensions();
    let t = thickness.min(w).min(h);
    fill_rect(canvas, (0, 0), (w, t), color);
    fill_rect(canvas, (0, h.saturating_sub(t)), (w, h), color);
    fill_rect(canvas, (0, 0), (t, h), color);
    fill_rect(canvas, (w.saturating_sub(t), 0), (w, h), color);
}

/// Fill `[x0, x1) x [y0, y1)`, clipped to the canvas.
fn fill_rect(canvas: &mut RgbImage, (x0, y0): (u32, u32), (x1, y1): (u32, u32), color: Rgb<u8>) {
    for y in y0..y1 {
        for x in x0..x1 {
            if let Some(px) = canvas.get_pixel_mut_checked(x, y) {
                *px = color;
            }
        }
    }
}
