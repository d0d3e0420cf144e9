//! Strict decoding of the JSON the model returns as text.
//!
//! Model output is often wrapped in markdown fences or a sentence of prose.
//! Wrappers are stripped, then the payload must match the typed schema
//! exactly; anything else is an explicit rejection.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::geometry::BoundingBox;
use crate::items::{Category, DetectedItem, RelatedProduct};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("model returned an empty response")]
    Empty,
    #[error("model response is not JSON")]
    NotJson,
    #[error("model JSON does not match the expected shape: {0}")]
    Shape(String),
    #[error("model item {index} is invalid: {reason}")]
    InvalidItem { index: usize, reason: String },
}

/// Item as the detection prompt asks the model to describe it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelItem {
    pub name: String,
    pub category: Category,
    pub color: String,
    pub material: String,
    pub brand: String,
    pub price: String,
    pub match_score: f64,
    pub bounding_box: BoundingBox,
    pub search_query: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionPayload {
    pub items: Vec<ModelItem>,
    /// Items dropped or adjusted during validation, one line each.
    #[serde(skip)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductSearchPayload {
    pub products: Vec<RelatedProduct>,
}

impl ModelItem {
    fn validate(&self, index: usize) -> Result<(), SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidItem {
            index,
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if !self.bounding_box.is_finite() {
            return Err(invalid("boundingBox has non-finite values"));
        }
        Ok(())
    }

    /// Pull a finite score into 0-100, returning the original when it moved.
    fn clamp_match_score(&mut self) -> Option<f64> {
        let clamped = self.match_score.clamp(0.0, 100.0);
        if clamped == self.match_score {
            return None;
        }
        let original = self.match_score;
        self.match_score = clamped;
        Some(original)
    }

    pub fn into_detected_item(self) -> DetectedItem {
        DetectedItem {
            name: self.name.trim().to_string(),
            category: self.category,
            color: self.color,
            material: self.material,
            brand: self.brand,
            price: self.price,
            match_score: self.match_score,
            bounding_box: self.bounding_box,
            search_query: self.search_query,
            related_products: Vec::new(),
            cropped_image: None,
            thumbnail_image: None,
            pixel_box: None,
            thumbnail_status: None,
        }
    }
}

/// Decode a detection reply. The payload shape is all-or-nothing; a single
/// bad item is dropped with a warning instead of failing the reply.
pub fn parse_detection(text: &str) -> Result<DetectionPayload, SchemaError> {
    let payload: DetectionPayload = parse_model_json(text)?;
    let mut warnings = payload.warnings;
    let mut items = Vec::with_capacity(payload.items.len());
    for (index, mut item) in payload.items.into_iter().enumerate() {
        if let Err(err) = item.validate(index) {
            warnings.push(format!("{err}; item dropped"));
            continue;
        }
        if let Some(original) = item.clamp_match_score() {
            warnings.push(format!(
                "model item {index}: matchScore {original} clamped to {}",
                item.match_score
            ));
        }
        items.push(item);
    }
    Ok(DetectionPayload { items, warnings })
}

pub fn parse_product_search(text: &str) -> Result<ProductSearchPayload, SchemaError> {
    let payload: ProductSearchPayload = parse_model_json(text)?;
    for (index, product) in payload.products.iter().enumerate() {
        if product.title.trim().is_empty() {
            return Err(SchemaError::InvalidItem {
                index,
                reason: "title is empty".to_string(),
            });
        }
    }
    Ok(payload)
}

/// Decode model text as `T`. The first candidate that is valid JSON decides:
/// a shape mismatch there is not retried against looser candidates.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T, SchemaError> {
    let raw = strip_code_fence(text);
    if raw.is_empty() {
        return Err(SchemaError::Empty);
    }
    let mut candidates = vec![raw.clone()];
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            candidates.push(raw[start..=end].to_string());
        }
    }
    for candidate in candidates {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return serde_json::from_value(value).map_err(|err| SchemaError::Shape(err.to_string()));
        }
    }
    Err(SchemaError::NotJson)
}

pub fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if !(raw.starts_with("```") && raw.ends_with("```")) {
        return raw.to_string();
    }
    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() < 2 {
        return raw.trim_matches('`').trim().to_string();
    }
    let mut body = lines[1..lines.len() - 1].join("\n");
    // Opening fence with content on the same line: ```{"items": []}
    let opener = lines[0].trim_start_matches('`').trim();
    if !opener.is_empty() && !opener.eq_ignore_ascii_case("json") {
        body = format!("{opener}\n{body}");
    }
    let mut body = body.trim().to_string();
    if body.to_ascii_lowercase().starts_with("json") {
        body = body[4..].trim().to_string();
    }
    body
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_detection, parse_product_search, strip_code_fence, SchemaError};
    use crate::items::Category;

    fn detection_json() -> serde_json::Value {
        json!({
            "items": [{
                "name": "Leather Biker Jacket",
                "brand": "Unknown",
                "price": "$180",
                "matchScore": 92,
                "category": "outerwear",
                "color": "black",
                "material": "leather",
                "boundingBox": {"x": 0.12, "y": 0.18, "width": 0.5, "height": 0.35},
                "searchQuery": "black leather biker jacket"
            }]
        })
    }

    #[test]
    fn fenced_json_parses_after_stripping() {
        let fenced = format!("```json\n{}\n```", detection_json());
        let payload = parse_detection(&fenced).unwrap();
        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.items[0].category, Category::Outerwear);

        let bare_fence = format!("```\n{}\n```", detection_json());
        assert_eq!(parse_detection(&bare_fence).unwrap().items.len(), 1);
    }

    #[test]
    fn prose_around_the_object_is_ignored() {
        let text = format!("Here are the items:\n{}\nLet me know!", detection_json());
        assert_eq!(parse_detection(&text).unwrap().items.len(), 1);
    }

    #[test]
    fn strip_code_fence_handles_inline_openers() {
        assert_eq!(strip_code_fence("```json {\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```{\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        assert_eq!(parse_detection("   "), Err(SchemaError::Empty));
        assert_eq!(parse_detection("no json here"), Err(SchemaError::NotJson));
        assert!(matches!(
            parse_detection(r#"{"items": {"name": "not a list"}}"#),
            Err(SchemaError::Shape(_))
        ));
        assert!(matches!(
            parse_detection(r#"{"objects": []}"#),
            Err(SchemaError::Shape(_))
        ));

        let mut missing_box = detection_json();
        missing_box["items"][0]
            .as_object_mut()
            .unwrap()
            .remove("boundingBox");
        assert!(matches!(
            parse_detection(&missing_box.to_string()),
            Err(SchemaError::Shape(_))
        ));

        let mut string_box = detection_json();
        string_box["items"][0]["boundingBox"]["x"] = json!("0.1");
        assert!(matches!(
            parse_detection(&string_box.to_string()),
            Err(SchemaError::Shape(_))
        ));
    }

    #[test]
    fn out_of_range_scores_are_clamped_per_item() -> anyhow::Result<()> {
        let mut payload = detection_json();
        payload["items"][0]["matchScore"] = json!(140);
        let parsed = parse_detection(&payload.to_string())?;
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].match_score, 100.0);
        assert_eq!(
            parsed.warnings,
            vec!["model item 0: matchScore 140 clamped to 100".to_string()]
        );

        payload["items"][0]["matchScore"] = json!(-3);
        assert_eq!(parse_detection(&payload.to_string())?.items[0].match_score, 0.0);
        Ok(())
    }

    #[test]
    fn invalid_items_are_dropped_without_failing_the_reply() -> anyhow::Result<()> {
        let mut payload = detection_json();
        let mut unnamed = payload["items"][0].clone();
        unnamed["name"] = json!("   ");
        if let Some(items) = payload["items"].as_array_mut() {
            items.insert(0, unnamed);
        }
        let parsed = parse_detection(&payload.to_string())?;
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(
            parsed.warnings,
            vec!["model item 0 is invalid: name is empty; item dropped".to_string()]
        );
        Ok(())
    }

    #[test]
    fn empty_item_list_is_valid() {
        assert!(parse_detection(r#"{"items": []}"#).unwrap().items.is_empty());
    }

    #[test]
    fn product_search_payload_is_typed() {
        let text = "```json\n{\"products\": [{\"title\": \"Acme Coat\", \"price\": \"$99\", \"imageUrl\": \"https://images.example/coat.jpg\", \"purchaseUrl\": \"https://shop.example/coat\"}]}\n```";
        let payload = parse_product_search(text).unwrap();
        assert_eq!(payload.products.len(), 1);
        assert_eq!(payload.products[0].title, "Acme Coat");

        assert!(matches!(
            parse_product_search(r#"{"products": [{"title": "No price"}]}"#),
            Err(SchemaError::Shape(_))
        ));
    }
}
