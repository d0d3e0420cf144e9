//! Per-item thumbnail generation with a fixed number of worker threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use lookbook_contracts::data_url::DataUrl;
use lookbook_contracts::items::{DetectedItem, ThumbnailStatus};
use lookbook_contracts::prompts::ItemLabel;

use crate::adapters::{generate_thumbnail, ThumbnailRequest, ThumbnailSource};
use crate::{error_chain_text, GenerativeGateway};

pub const DEFAULT_THUMBNAIL_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum ThumbnailOutcome {
    /// Regenerated from the item's crop.
    Generated(DataUrl),
    /// Drawn from the text description after the crop path was unavailable.
    FallbackUsed { image: DataUrl, reason: String },
    Failed { reason: String },
}

impl ThumbnailOutcome {
    pub fn status(&self) -> ThumbnailStatus {
        match self {
            ThumbnailOutcome::Generated(_) => ThumbnailStatus::Generated,
            ThumbnailOutcome::FallbackUsed { .. } => ThumbnailStatus::Fallback,
            ThumbnailOutcome::Failed { .. } => ThumbnailStatus::Failed,
        }
    }

    pub fn image(&self) -> Option<&DataUrl> {
        match self {
            ThumbnailOutcome::Generated(image) | ThumbnailOutcome::FallbackUsed { image, .. } => {
                Some(image)
            }
            ThumbnailOutcome::Failed { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ThumbnailOutcome::Generated(_) => None,
            ThumbnailOutcome::FallbackUsed { reason, .. } | ThumbnailOutcome::Failed { reason } => {
                Some(reason)
            }
        }
    }
}

fn item_label(item: &DetectedItem) -> ItemLabel {
    let known = |value: &str| Some(value.trim().to_string()).filter(|value| !value.is_empty());
    ItemLabel {
        name: known(&item.name),
        category: Some(item.category.as_str().to_string()),
        color: known(&item.color),
    }
}

/// Crop first, then the text description. Never panics, never errors.
pub fn thumbnail_for_item(
    gateway: &dyn GenerativeGateway,
    model: &str,
    item: &DetectedItem,
) -> ThumbnailOutcome {
    let label = item_label(item);
    let crop_failure = match item.cropped_image.as_ref() {
        Some(crop) => {
            let request = ThumbnailRequest {
                source: ThumbnailSource::Image(crop.clone()),
                label: label.clone(),
            };
            match generate_thumbnail(gateway, model, &request) {
                Ok(image) => return ThumbnailOutcome::Generated(image),
                Err(err) => format!("crop thumbnail failed: {}", error_chain_text(&err, 240)),
            }
        }
        None => "no crop available".to_string(),
    };

    let request = ThumbnailRequest {
        source: ThumbnailSource::Query(item.text_query()),
        label,
    };
    match generate_thumbnail(gateway, model, &request) {
        Ok(image) => ThumbnailOutcome::FallbackUsed {
            image,
            reason: crop_failure,
        },
        Err(err) => ThumbnailOutcome::Failed {
            reason: format!(
                "{crop_failure}; text thumbnail failed: {}",
                error_chain_text(&err, 240)
            ),
        },
    }
}

/// One outcome per item, in item order, with at most `max_concurrency`
/// upstream calls in flight.
pub fn generate_thumbnails(
    gateway: &dyn GenerativeGateway,
    model: &str,
    items: &[DetectedItem],
    max_concurrency: usize,
) -> Vec<ThumbnailOutcome> {
    if items.is_empty() {
        return Vec::new();
    }
    let workers = max_concurrency.clamp(1, items.len());
    let next = AtomicUsize::new(0);
    let slots: Vec<Mutex<Option<ThumbnailOutcome>>> =
        items.iter().map(|_| Mutex::new(None)).collect();

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(item) = items.get(index) else {
                    break;
                };
                let outcome = thumbnail_for_item(gateway, model, item);
                if let Ok(mut slot) = slots[index].lock() {
                    *slot = Some(outcome);
                }
            });
        }
    });

    slots
        .into_iter()
        .map(|slot| {
            slot.into_inner().ok().flatten().unwrap_or_else(|| ThumbnailOutcome::Failed {
                reason: "thumbnail worker stopped before finishing".to_string(),
            })
        })
        .collect()
}

/// Write outcomes onto their items. Extra outcomes are ignored.
pub fn apply_thumbnails(items: &mut [DetectedItem], outcomes: &[ThumbnailOutcome]) {
    for (item, outcome) in items.iter_mut().zip(outcomes) {
        item.thumbnail_image = outcome.image().cloned();
        item.thumbnail_status = Some(outcome.status());
    }
}
