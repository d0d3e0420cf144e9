use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::data_url::DataUrl;
use crate::geometry::{BoundingBox, PixelRect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Top,
    Bottom,
    Dress,
    Outerwear,
    Shoes,
    Bag,
    Accessory,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Top,
        Category::Bottom,
        Category::Dress,
        Category::Outerwear,
        Category::Shoes,
        Category::Bag,
        Category::Accessory,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Top => "top",
            Category::Bottom => "bottom",
            Category::Dress => "dress",
            Category::Outerwear => "outerwear",
            Category::Shoes => "shoes",
            Category::Bag => "bag",
            Category::Accessory => "accessory",
            Category::Other => "other",
        }
    }

    /// Case-insensitive; anything outside the fixed set is `Other`.
    pub fn from_label(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .unwrap_or(Category::Other)
    }
}

impl FromStr for Category {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_label(raw))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Category::from_label(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedProduct {
    pub title: String,
    pub price: String,
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub purchase_url: Option<String>,
}

/// Result of the per-item thumbnail task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailStatus {
    Generated,
    Fallback,
    Failed,
}

impl ThumbnailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailStatus::Generated => "generated",
            ThumbnailStatus::Fallback => "fallback",
            ThumbnailStatus::Failed => "failed",
        }
    }
}

/// One clothing item identified in an uploaded photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedItem {
    pub name: String,
    pub category: Category,
    pub color: String,
    pub material: String,
    pub brand: String,
    pub price: String,
    pub match_score: f64,
    pub bounding_box: BoundingBox,
    pub search_query: String,
    #[serde(default)]
    pub related_products: Vec<RelatedProduct>,
    #[serde(default)]
    pub cropped_image: Option<DataUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_image: Option<DataUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_box: Option<PixelRect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_status: Option<ThumbnailStatus>,
}

impl DetectedItem {
    /// Short text used when no better description exists: `color category name`.
    pub fn describe(&self) -> String {
        [self.color.as_str(), self.category.as_str(), self.name.as_str()]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<&str>>()
            .join(" ")
    }

    /// Search query if the model gave one, otherwise [`DetectedItem::describe`].
    pub fn text_query(&self) -> String {
        let query = self.search_query.trim();
        if query.is_empty() {
            self.describe()
        } else {
            query.to_string()
        }
    }
}
