//! One function per upstream operation: build the request, call the
//! gateway, decode the answer into domain types.

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use lookbook_contracts::data_url::{DataUrl, DEFAULT_IMAGE_MIME};
use lookbook_contracts::geometry::BoxUnits;
use lookbook_contracts::items::{DetectedItem, RelatedProduct};
use lookbook_contracts::models::Task;
use lookbook_contracts::prompts::{
    detection_prompt, product_search_prompt, thumbnail_from_image_prompt,
    thumbnail_from_text_prompt, virtual_try_on_prompt, ItemLabel,
};
use lookbook_contracts::schema::{parse_detection, parse_product_search};

use crate::crop::crop_item;
use crate::{error_chain_text, ContentPart, GatewayError, GatewayRequest, GenerativeGateway};

/// An uploaded photo, decoded once and kept next to its original bytes.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub upload: DataUrl,
    pub image: DynamicImage,
}

impl SourceImage {
    /// Decode `bytes`; the declared MIME type is kept when it names an image,
    /// otherwise it is sniffed from the content.
    pub fn decode(bytes: Vec<u8>, declared_mime: Option<&str>) -> Result<Self> {
        if bytes.is_empty() {
            bail!("uploaded image is empty");
        }
        let image = image::load_from_memory(&bytes).context("uploaded file is not a decodable image")?;
        let mime_type = declared_mime
            .map(str::trim)
            .filter(|mime| mime.starts_with("image/"))
            .map(str::to_string)
            .or_else(|| {
                image::guess_format(&bytes)
                    .ok()
                    .map(|format| format.to_mime_type().to_string())
            })
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
        Ok(Self {
            upload: DataUrl::new(mime_type, bytes),
            image,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectionOutcome {
    pub items: Vec<DetectedItem>,
    pub warnings: Vec<String>,
}

/// Ask the model for the clothing items in `source`, then crop each one.
///
/// `units` says how to read the model's boxes. A crop failure only clears
/// that item's `cropped_image` and adds a warning.
pub fn detect_items(
    gateway: &dyn GenerativeGateway,
    model: &str,
    source: &SourceImage,
    units: BoxUnits,
) -> Result<DetectionOutcome> {
    let request = GatewayRequest {
        task: Task::Detect,
        model: model.to_string(),
        parts: vec![
            ContentPart::Text(detection_prompt()),
            ContentPart::InlineImage(source.upload.clone()),
        ],
    };
    let response = gateway
        .generate(&request)
        .with_context(|| format!("{} detection call failed", gateway.name()))?;
    let text = response.text().ok_or(GatewayError::NoPayload("text"))?;
    let payload = parse_detection(&text).map_err(GatewayError::Unparseable)?;

    let mut warnings = response.warnings;
    warnings.extend(payload.warnings);
    let items = payload
        .items
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let mut item = raw.into_detected_item();
            match crop_item(&source.image, &item.bounding_box, units) {
                Ok(cropped) => {
                    item.pixel_box = Some(cropped.rect);
                    item.cropped_image = Some(cropped.image);
                }
                Err(err) => warnings.push(format!(
                    "Item {index} ({}): crop failed: {}",
                    item.name,
                    error_chain_text(&err, 240)
                )),
            }
            item
        })
        .collect();

    Ok(DetectionOutcome { items, warnings })
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThumbnailSource {
    /// A crop of the item, regenerated as a product shot.
    Image(DataUrl),
    /// A text description, drawn from scratch.
    Query(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailRequest {
    pub source: ThumbnailSource,
    pub label: ItemLabel,
}

pub fn generate_thumbnail(
    gateway: &dyn GenerativeGateway,
    model: &str,
    request: &ThumbnailRequest,
) -> Result<DataUrl> {
    let parts = match &request.source {
        ThumbnailSource::Image(image) => vec![
            ContentPart::InlineImage(image.clone()),
            ContentPart::Text(thumbnail_from_image_prompt(&request.label)),
        ],
        ThumbnailSource::Query(query) => {
            vec![ContentPart::Text(thumbnail_from_text_prompt(query))]
        }
    };
    let response = gateway
        .generate(&GatewayRequest {
            task: Task::Thumbnail,
            model: model.to_string(),
            parts,
        })
        .with_context(|| format!("{} thumbnail call failed", gateway.name()))?;
    let image = response
        .first_image()
        .cloned()
        .ok_or(GatewayError::NoPayload("image"))?;
    Ok(image)
}

pub fn search_products(
    gateway: &dyn GenerativeGateway,
    model: &str,
    image: Option<&DataUrl>,
    query: Option<&str>,
) -> Result<Vec<RelatedProduct>> {
    let query = query.map(str::trim).filter(|value| !value.is_empty());
    if image.is_none() && query.is_none() {
        bail!("product search needs an image or a query");
    }
    let mut parts = vec![ContentPart::Text(product_search_prompt(query))];
    if let Some(image) = image {
        parts.push(ContentPart::InlineImage(image.clone()));
    }
    let response = gateway
        .generate(&GatewayRequest {
            task: Task::ProductSearch,
            model: model.to_string(),
            parts,
        })
        .with_context(|| format!("{} product search call failed", gateway.name()))?;
    let text = response.text().ok_or(GatewayError::NoPayload("text"))?;
    let payload = parse_product_search(&text).map_err(GatewayError::Unparseable)?;
    Ok(payload.products)
}

/// Person first, then every garment in order, then the instructions.
pub fn virtual_try_on(
    gateway: &dyn GenerativeGateway,
    model: &str,
    person: &DataUrl,
    garments: &[DataUrl],
) -> Result<DataUrl> {
    if garments.is_empty() {
        bail!("virtual try-on needs at least one garment image");
    }
    let mut parts = Vec::with_capacity(garments.len() + 2);
    parts.push(ContentPart::InlineImage(person.clone()));
    parts.extend(garments.iter().cloned().map(ContentPart::InlineImage));
    parts.push(ContentPart::Text(virtual_try_on_prompt(garments.len())));
    let response = gateway
        .generate(&GatewayRequest {
            task: Task::TryOn,
            model: model.to_string(),
            parts,
        })
        .with_context(|| format!("{} try-on call failed", gateway.name()))?;
    let image = response
        .first_image()
        .cloned()
        .ok_or(GatewayError::NoPayload("image"))?;
    Ok(image)
}
