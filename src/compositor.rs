//! Scale a raster onto a fixed-size white canvas and encode it as PNG
//!
//! The scale factor is driven by width alone: `ratio = target_width /
//! raster.width` applies to both axes, so a raster whose aspect differs from
//! the target leaves a white band at the bottom or gets clipped there.

use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};

use crate::{Error, Result};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Draw `raster` onto a `target_width × target_height` white canvas.
///
/// The raster is anchored at the origin and clipped to the canvas. Only the
/// rows that can land on the canvas are resampled, which keeps full-document
/// snapshots of very long pages cheap.
pub fn composite(raster: &RgbaImage, target_width: u32, target_height: u32) -> Result<RgbaImage> {
    if raster.width() == 0 {
        return Err(Error::ComposeError("raster has zero width".into()));
    }
    if target_width == 0 || target_height == 0 {
        return Err(Error::ComposeError(format!(
            "invalid target size {}x{}",
            target_width, target_height
        )));
    }

    let mut canvas = RgbaImage::from_pixel(target_width, target_height, WHITE);

    let ratio = target_width as f64 / raster.width() as f64;
    let visible_rows = ((target_height as f64 / ratio).ceil() as u32).min(raster.height());
    if visible_rows == 0 {
        return Ok(canvas);
    }
    let scaled_height = ((visible_rows as f64 * ratio).round() as u32).max(1);

    let source = imageops::crop_imm(raster, 0, 0, raster.width(), visible_rows).to_image();
    let scaled = if source.width() == target_width && source.height() == scaled_height {
        source
    } else {
        imageops::resize(&source, target_width, scaled_height, FilterType::Triangle)
    };
    imageops::overlay(&mut canvas, &scaled, 0, 0);

    Ok(canvas)
}

/// Losslessly encode an RGBA canvas as PNG
pub fn encode_png(canvas: &RgbaImage) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(
        canvas.as_raw(),
        canvas.width(),
        canvas.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(png)
}

/// [`composite`] followed by [`encode_png`]
pub fn compose(raster: &RgbaImage, target_width: u32, target_height: u32) -> Result<Vec<u8>> {
    let canvas = composite(raster, target_width, target_height)?;
    encode_png(&canvas)
}
