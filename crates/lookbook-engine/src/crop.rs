use anyhow::{bail, Context, Result};
use image::DynamicImage;
use lookbook_contracts::data_url::DataUrl;
use lookbook_contracts::geometry::{BoundingBox, BoxUnits, PixelRect};

use crate::encode_png;

#[derive(Debug, Clone, PartialEq)]
pub struct CroppedItem {
    pub rect: PixelRect,
    pub image: DataUrl,
}

/// Place `bbox` inside `source` and cut that region out as a PNG.
pub fn crop_item(source: &DynamicImage, bbox: &BoundingBox, units: BoxUnits) -> Result<CroppedItem> {
    let (width, height) = (source.width(), source.height());
    let rect = bbox
        .to_pixel_rect(width, height, units)
        .with_context(|| format!("bounding box {bbox:?} cannot be placed in a {width}x{height} image"))?;
    let image = crop_to_png(source, rect)?;
    Ok(CroppedItem { rect, image })
}

pub fn crop_to_png(source: &DynamicImage, rect: PixelRect) -> Result<DataUrl> {
    if rect.width == 0
        || rect.height == 0
        || rect.right() > source.width()
        || rect.bottom() > source.height()
    {
        bail!(
            "crop region {rect:?} is outside the {}x{} image",
            source.width(),
            source.height()
        );
    }
    let cropped = source.crop_imm(rect.left, rect.top, rect.width, rect.height);
    // PNG has no float sample formats.
    let cropped = match cropped {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            DynamicImage::ImageRgba8(cropped.to_rgba8())
        }
        other => other,
    };
    let bytes = encode_png(&cropped).context("crop PNG encode failed")?;
    Ok(DataUrl::png(bytes))
}
