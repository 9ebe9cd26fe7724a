//! Turn an input image into a printable 1bpp bitmap.

use anyhow::Context;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use niimbot::Bitmap;

/// Luma below this prints.
pub const DEFAULT_THRESHOLD: u8 = 128;

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Fit the image onto a label of this size (dots, landscape).
    pub label_px: Option<(u32, u32)>,
    /// Rotate a quarter turn clockwise so landscape designs run along the roll.
    pub rotate: bool,
    pub threshold: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            label_px: None,
            rotate: true,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

pub fn render(img: &DynamicImage, opts: &RenderOptions) -> anyhow::Result<Bitmap> {
    let mut gray = flatten(img);
    if let Some((w, h)) = opts.label_px {
        anyhow::ensure!(w > 0 && h > 0, "label size {w}x{h} dots is empty");
        gray = fit(&gray, w, h);
    }
    if opts.rotate {
        gray = imageops::rotate90(&gray);
    }
    tracing::debug!(
        width = gray.width(),
        height = gray.height(),
        "Rendered print image"
    );
    Bitmap::from_gray(&gray, opts.threshold).context("image does not fit the printer")
}

/// Grayscale with transparent areas treated as paper.
fn flatten(img: &DynamicImage) -> GrayImage {
    let rgba = img.to_rgba8();
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
        let alpha = a as u32;
        Luma([((luma * alpha + 255 * (255 - alpha)) / 255) as u8])
    })
}

/// Scale to fit inside `w`x`h` keeping aspect ratio, centred on white.
fn fit(img: &GrayImage, w: u32, h: u32) -> GrayImage {
    let scale = f64::min(w as f64 / img.width() as f64, h as f64 / img.height() as f64);
    let sw = ((img.width() as f64 * scale).round() as u32).clamp(1, w);
    let sh = ((img.height() as f64 * scale).round() as u32).clamp(1, h);
    let scaled = imageops::resize(img, sw, sh, FilterType::Triangle);

    let mut canvas = GrayImage::from_pixel(w, h, Luma([255]));
    imageops::overlay(&mut canvas, &scaled, ((w - sw) / 2) as i64, ((h - sh) / 2) as i64);
    canvas
}
