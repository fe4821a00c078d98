mod glyphs;

use std::io::Cursor;

use common::{
    error::AppError,
    storage::types::{article::ImageSource, site::Site},
};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, Rgba, RgbaImage};
use tracing::debug;

use self::glyphs::{is_set, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Corner {
    #[default]
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
    Center,
}

#[derive(Debug, Clone)]
pub struct WatermarkStyle {
    /// Approximate cap height in pixels.
    pub font_size: u32,
    pub opacity: u8,
    pub padding: u32,
    pub shadow_offset: u32,
    pub corner: Corner,
    pub jpeg_quality: u8,
}

impl Default for WatermarkStyle {
    fn default() -> Self {
        Self {
            font_size: 24,
            opacity: 128,
            padding: 20,
            shadow_offset: 2,
            corner: Corner::BottomRight,
            jpeg_quality: 90,
        }
    }
}

/// Only generated images are stamped.
pub fn requires_watermark(source: ImageSource) -> bool {
    matches!(source, ImageSource::AiGenerated)
}

#[derive(Debug, Clone, Default)]
pub struct Watermarker {
    style: WatermarkStyle,
}

impl Watermarker {
    pub fn new(style: WatermarkStyle) -> Self {
        Self { style }
    }

    /// Stamp the site's watermark on generated images; every other image passes
    /// through byte for byte.
    pub fn maybe_watermark(
        &self,
        bytes: Vec<u8>,
        source: ImageSource,
        site: &Site,
    ) -> Result<Vec<u8>, AppError> {
        match site.watermark() {
            Some(text) if requires_watermark(source) => self.apply(&bytes, text),
            _ => Ok(bytes),
        }
    }

    /// Draw `text` with a drop shadow and re-encode as JPEG.
    pub fn apply(&self, bytes: &[u8], text: &str) -> Result<Vec<u8>, AppError> {
        let mut canvas = image::load_from_memory(bytes)?.to_rgba8();
        let style = &self.style;

        let scale = (style.font_size / GLYPH_HEIGHT).max(1);
        let (text_width, text_height) = text_extent(text, scale);
        let (x, y) = anchor(
            canvas.width(),
            canvas.height(),
            text_width,
            text_height,
            style.padding,
            style.corner,
        );

        let shadow = Rgba([0, 0, 0, style.opacity / 2]);
        let fill = Rgba([255, 255, 255, style.opacity]);
        draw_text(
            &mut canvas,
            text,
            x.saturating_add(style.shadow_offset),
            y.saturating_add(style.shadow_offset),
            scale,
            shadow,
        );
        draw_text(&mut canvas, text, x, y, scale, fill);

        let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut Cursor::new(&mut encoded), style.jpeg_quality)
            .encode_image(&rgb)?;

        debug!(
            width = rgb.width(),
            height = rgb.height(),
            bytes = encoded.len(),
            "watermark applied"
        );
        Ok(encoded)
    }
}

fn text_extent(text: &str, scale: u32) -> (u32, u32) {
    let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
    let width = chars
        .saturating_mul(GLYPH_ADVANCE)
        .saturating_sub(1)
        .saturating_mul(scale);
    (width, GLYPH_HEIGHT.saturating_mul(scale))
}

/// Top-left corner of the text box; clamps to the image origin when the text does not fit.
fn anchor(
    image_width: u32,
    image_height: u32,
    text_width: u32,
    text_height: u32,
    padding: u32,
    corner: Corner,
) -> (u32, u32) {
    let right = image_width.saturating_sub(text_width).saturating_sub(padding);
    let bottom = image_height.saturating_sub(text_height).saturating_sub(padding);
    match corner {
        Corner::BottomRight => (right, bottom),
        Corner::BottomLeft => (padding, bottom),
        Corner::TopRight => (right, padding),
        Corner::TopLeft => (padding, padding),
        Corner::Center => (
            image_width.saturating_sub(text_width) / 2,
            image_height.saturating_sub(text_height) / 2,
        ),
    }
}

fn draw_text(canvas: &mut RgbaImage, text: &str, x: u32, y: u32, scale: u32, color: Rgba<u8>) {
    let mut origin_x = x;
    for c in text.chars() {
        for row in 0..GLYPH_HEIGHT {
            for col in 0..GLYPH_WIDTH {
                if !is_set(c, col, row) {
                    continue;
                }
                let px = origin_x.saturating_add(col.saturating_mul(scale));
                let py = y.saturating_add(row.saturating_mul(scale));
                fill_block(canvas, px, py, scale, color);
            }
        }
        origin_x = origin_x.saturating_add(GLYPH_ADVANCE.saturating_mul(scale));
    }
}

fn fill_block(canvas: &mut RgbaImage, x: u32, y: u32, size: u32, color: Rgba<u8>) {
    for dy in 0..size {
        for dx in 0..size {
            let (px, py) = (x.saturating_add(dx), y.saturating_add(dy));
            if px < canvas.width() && py < canvas.height() {
                blend(canvas.get_pixel_mut(px, py), color);
            }
        }
    }
}

/// Source-over blend of `color` onto `pixel`; the destination stays opaque.
fn blend(pixel: &mut Rgba<u8>, color: Rgba<u8>) {
    let alpha = u16::from(color.0[3]);
    let inverse = 255_u16.saturating_sub(alpha);
    for (dst, src) in pixel.0.iter_mut().zip(color.0.iter()).take(3) {
        let mixed = (u16::from(*src) * alpha + u16::from(*dst) * inverse) / 255;
        *dst = u8::try_from(mixed).unwrap_or(u8::MAX);
    }
}
