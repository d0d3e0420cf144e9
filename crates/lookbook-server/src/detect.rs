//! `lookbook detect`: run detection on a local photo and write the results
//! to a directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use lookbook_contracts::events::EventLog;
use lookbook_contracts::items::DetectedItem;
use lookbook_engine::adapters::{detect_items, SourceImage};
use lookbook_engine::fanout::{apply_thumbnails, generate_thumbnails};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::config::GatewayArgs;

#[derive(Debug, Clone, Parser)]
pub struct DetectArgs {
    #[arg(long)]
    pub image: PathBuf,
    #[arg(long)]
    pub out: PathBuf,
    /// Also generate a product thumbnail for every item.
    #[arg(long)]
    pub thumbnails: bool,
    #[command(flatten)]
    pub gateway: GatewayArgs,
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn write_artifacts(out: &Path, items: &[DetectedItem]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (index, item) in items.iter().enumerate() {
        if let Some(crop) = item.cropped_image.as_ref() {
            let path = out.join(format!("item-{index:02}-crop.png"));
            fs::write(&path, &crop.data)
                .with_context(|| format!("failed to write {}", path.display()))?;
            written.push(path);
        }
        if let Some(thumbnail) = item.thumbnail_image.as_ref() {
            let ext = extension_for_mime(&thumbnail.mime_type);
            let path = out.join(format!("item-{index:02}-thumbnail.{ext}"));
            fs::write(&path, &thumbnail.data)
                .with_context(|| format!("failed to write {}", path.display()))?;
            written.push(path);
        }
    }
    Ok(written)
}

pub fn run_detect(args: DetectArgs) -> Result<i32> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events = EventLog::new(args.out.join("events.jsonl")).for_request(Uuid::new_v4().to_string());

    let models = args.gateway.resolve_models()?;
    let gateway = args.gateway.build_gateway()?;
    let bytes = fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let source = SourceImage::decode(bytes, None)
        .with_context(|| format!("failed to decode {}", args.image.display()))?;

    events.emit(
        "request_started",
        payload(json!({
            "endpoint": "detect",
            "image": args.image.display().to_string(),
            "gateway": gateway.name(),
            "model": models.detect,
            "box_units": args.gateway.box_units.as_str(),
        })),
    )?;

    let units = args.gateway.box_units;
    let mut detection = match detect_items(gateway.as_ref(), &models.detect, &source, units) {
        Ok(detection) => detection,
        Err(err) => {
            events.emit(
                "request_failed",
                payload(json!({ "endpoint": "detect", "error": format!("{err:#}") })),
            )?;
            return Err(err);
        }
    };
    events.emit(
        "items_detected",
        payload(json!({
            "count": detection.items.len(),
            "image_width": source.width(),
            "image_height": source.height(),
            "thumbnails": args.thumbnails,
        })),
    )?;
    for (index, item) in detection.items.iter().enumerate() {
        if item.cropped_image.is_none() {
            events.emit(
                "crop_failed",
                payload(json!({ "index": index, "name": item.name })),
            )?;
        }
    }

    if args.thumbnails {
        let outcomes = generate_thumbnails(
            gateway.as_ref(),
            &models.thumbnail,
            &detection.items,
            args.gateway.thumbnail_concurrency,
        );
        apply_thumbnails(&mut detection.items, &outcomes);
        for (index, outcome) in outcomes.iter().enumerate() {
            events.emit(
                "thumbnail_outcome",
                payload(json!({
                    "index": index,
                    "status": outcome.status(),
                    "reason": outcome.reason(),
                })),
            )?;
        }
    }

    let written = write_artifacts(&args.out, &detection.items)?;
    let items_path = args.out.join("items.json");
    let document = json!({
        "items": detection.items,
        "warnings": detection.warnings,
    });
    fs::write(&items_path, serde_json::to_string_pretty(&document)?)
        .with_context(|| format!("failed to write {}", items_path.display()))?;
    events.emit(
        "request_finished",
        payload(json!({
            "endpoint": "detect",
            "items": detection.items.len(),
            "artifacts": written.len(),
        })),
    )?;

    for (index, item) in detection.items.iter().enumerate() {
        let status = item
            .thumbnail_status
            .map(|status| format!(" [thumbnail: {}]", status.as_str()))
            .unwrap_or_default();
        println!(
            "{index:>2}. {} ({}, {}){status}",
            item.name,
            item.category,
            item.color
        );
    }
    for warning in &detection.warnings {
        println!("warning: {warning}");
    }
    println!("Wrote {}", items_path.display());
    Ok(0)
}
