use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use lookbook_contracts::data_url::DataUrl;
use lookbook_contracts::items::{DetectedItem, RelatedProduct};
use lookbook_contracts::prompts::ItemLabel;
use lookbook_engine::adapters::{
    detect_items, generate_thumbnail, search_products, virtual_try_on, SourceImage,
    ThumbnailRequest, ThumbnailSource,
};
use lookbook_engine::error_chain_text;
use lookbook_engine::fanout::{apply_thumbnails, generate_thumbnails, ThumbnailOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::intake::{read_analyze_form, read_fitting_form};
use crate::state::{AppState, Audit};

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/api/health", get(health))
        .route("/api/analyze-fashion", post(analyze_fashion))
        .route("/api/generate-item-thumbnail", post(generate_item_thumbnail))
        .route("/api/product-search", post(product_search))
        .route("/api/virtual-fitting", post(virtual_fitting))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run gateway work on the blocking pool.
async fn run_blocking<T, F>(work: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("gateway task did not complete")?
}

fn parse_image_field(raw: &str) -> Result<DataUrl, ApiError> {
    raw.trim().parse::<DataUrl>().map_err(|err| {
        ApiError::bad_request(
            "Invalid image format",
            format!("Image must be a data URL (data:image/...;base64,...): {err}"),
        )
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "gateway": state.gateway.name(),
    }))
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    items: Vec<DetectedItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

async fn analyze_fashion(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let audit = Audit::start(state.events.as_ref(), "analyze-fashion");
    let result = analyze_fashion_inner(&state, &audit, multipart).await;
    audit.conclude(result).map(Json)
}

async fn analyze_fashion_inner(
    state: &AppState,
    audit: &Audit,
    multipart: Multipart,
) -> Result<AnalyzeResponse, ApiError> {
    let form = read_analyze_form(multipart).await?;
    let upload = form.image.ok_or_else(|| {
        ApiError::bad_request("No image provided", "multipart field 'image' is required")
    })?;
    let source = SourceImage::decode(upload.bytes, upload.content_type.as_deref())
        .map_err(|err| ApiError::bad_request("Invalid image", error_chain_text(&err, 240)))?;
    let (width, height) = (source.width(), source.height());

    let gateway = state.gateway.clone();
    let models = state.models.clone();
    let concurrency = state.thumbnail_concurrency;
    let units = state.box_units;
    let with_thumbnails = form.thumbnails;
    let (mut detection, outcomes) = run_blocking(move || {
        let mut detection = detect_items(gateway.as_ref(), &models.detect, &source, units)?;
        let mut outcomes = Vec::new();
        if with_thumbnails {
            outcomes =
                generate_thumbnails(gateway.as_ref(), &models.thumbnail, &detection.items, concurrency);
            apply_thumbnails(&mut detection.items, &outcomes);
        }
        Ok((detection, outcomes))
    })
    .await
    .map_err(|err| ApiError::from_upstream("Failed to analyze image", &err))?;

    audit.emit(
        "items_detected",
        json!({
            "count": detection.items.len(),
            "image_width": width,
            "image_height": height,
            "thumbnails": with_thumbnails,
        }),
    );
    for (index, item) in detection.items.iter().enumerate() {
        if item.cropped_image.is_none() {
            audit.emit(
                "crop_failed",
                json!({ "index": index, "name": item.name, "bounding_box": item.bounding_box }),
            );
        }
    }
    for (index, outcome) in outcomes.iter().enumerate() {
        audit.emit(
            "thumbnail_outcome",
            json!({
                "index": index,
                "status": outcome.status(),
                "reason": outcome.reason(),
            }),
        );
        if let ThumbnailOutcome::Failed { reason } = outcome {
            let name = detection
                .items
                .get(index)
                .map(|item| item.name.as_str())
                .unwrap_or_default();
            detection
                .warnings
                .push(format!("Item {index} ({name}): thumbnail failed: {reason}"));
        }
    }

    Ok(AnalyzeResponse {
        items: detection.items,
        warnings: detection.warnings,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThumbnailBody {
    image: Option<String>,
    cropped_image: Option<String>,
    query: Option<String>,
    search_query: Option<String>,
    name: Option<String>,
    category: Option<String>,
    color: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThumbnailResponse {
    success: bool,
    thumbnail_image: DataUrl,
}

async fn generate_item_thumbnail(
    State(state): State<AppState>,
    body: Result<Json<ThumbnailBody>, JsonRejection>,
) -> Result<Json<ThumbnailResponse>, ApiError> {
    let audit = Audit::start(state.events.as_ref(), "generate-item-thumbnail");
    let result = generate_item_thumbnail_inner(&state, body).await;
    audit.conclude(result).map(Json)
}

async fn generate_item_thumbnail_inner(
    state: &AppState,
    body: Result<Json<ThumbnailBody>, JsonRejection>,
) -> Result<ThumbnailResponse, ApiError> {
    let Json(body) = body?;
    let image = non_empty(body.cropped_image.or(body.image));
    let query = non_empty(body.search_query.or(body.query));
    let source = match (image, query) {
        (Some(image), _) => ThumbnailSource::Image(parse_image_field(&image)?),
        (None, Some(query)) => ThumbnailSource::Query(query),
        (None, None) => {
            return Err(ApiError::bad_request(
                "Invalid request body",
                "Expected JSON with 'croppedImage'/'image' OR 'searchQuery'/'query'.",
            ))
        }
    };
    let request = ThumbnailRequest {
        source,
        label: ItemLabel {
            name: non_empty(body.name),
            category: non_empty(body.category),
            color: non_empty(body.color),
        },
    };

    let gateway = state.gateway.clone();
    let models = state.models.clone();
    let thumbnail_image =
        run_blocking(move || generate_thumbnail(gateway.as_ref(), &models.thumbnail, &request))
            .await
            .map_err(|err| ApiError::from_upstream("Internal server error", &err))?;

    Ok(ThumbnailResponse {
        success: true,
        thumbnail_image,
    })
}

#[derive(Debug, Default, Deserialize)]
struct ProductSearchBody {
    image: Option<String>,
    query: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProductSearchResponse {
    products: Vec<RelatedProduct>,
}

async fn product_search(
    State(state): State<AppState>,
    body: Result<Json<ProductSearchBody>, JsonRejection>,
) -> Result<Json<ProductSearchResponse>, ApiError> {
    let audit = Audit::start(state.events.as_ref(), "product-search");
    let result = product_search_inner(&state, &audit, body).await;
    audit.conclude(result).map(Json)
}

async fn product_search_inner(
    state: &AppState,
    audit: &Audit,
    body: Result<Json<ProductSearchBody>, JsonRejection>,
) -> Result<ProductSearchResponse, ApiError> {
    let Json(body) = body?;
    // An image that is not a data URL is dropped; the query may still carry the search.
    let image = non_empty(body.image).and_then(|raw| match parse_image_field(&raw) {
        Ok(image) => Some(image),
        Err(err) => {
            tracing::warn!(
                request_id = audit.request_id(),
                reason = err.message(),
                "ignoring unusable product search image"
            );
            None
        }
    });
    let query = non_empty(body.query);
    if image.is_none() && query.is_none() {
        return Err(ApiError::bad_request(
            "Image or query is required",
            "Expected JSON with 'image' and/or 'query'.",
        ));
    }

    let gateway = state.gateway.clone();
    let models = state.models.clone();
    let products = run_blocking(move || {
        search_products(
            gateway.as_ref(),
            &models.product_search,
            image.as_ref(),
            query.as_deref(),
        )
    })
    .await
    // Every upstream failure is a 500 here, unparseable output included.
    .map_err(|err| {
        let mapped = ApiError::from_upstream("Failed to search products", &err);
        ApiError::internal("Failed to search products", mapped.message())
    })?;

    Ok(ProductSearchResponse { products })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FittingResponse {
    success: bool,
    message: String,
    result_image_data_url: DataUrl,
}

async fn virtual_fitting(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FittingResponse>, ApiError> {
    let audit = Audit::start(state.events.as_ref(), "virtual-fitting");
    let result = virtual_fitting_inner(&state, &audit, multipart).await;
    audit.conclude(result).map(Json)
}

async fn virtual_fitting_inner(
    state: &AppState,
    audit: &Audit,
    multipart: Multipart,
) -> Result<FittingResponse, ApiError> {
    let form = read_fitting_form(multipart).await?;
    if !form.skipped.is_empty() {
        tracing::debug!(
            request_id = audit.request_id(),
            skipped = ?form.skipped,
            "ignored garment fields without an image"
        );
    }
    let person = form
        .person
        .ok_or_else(|| ApiError::bad_request("personImage is required", "multipart field 'personImage' is required"))?
        .into_data_url();
    if form.garments.is_empty() {
        return Err(ApiError::bad_request(
            "At least one clothing image is required",
            "Send garmentImage or item_0, item_1, ... as files or data URLs.",
        ));
    }
    let garments = form.garments;
    audit.emit("try_on_inputs", json!({ "garments": garments.len() }));

    let gateway = state.gateway.clone();
    let models = state.models.clone();
    let result_image_data_url = run_blocking(move || {
        virtual_try_on(gateway.as_ref(), &models.try_on, &person, &garments)
    })
    .await
    .map_err(|err| ApiError::from_upstream("Failed to process virtual try-on", &err))?;

    Ok(FittingResponse {
        success: true,
        message: "Virtual Try-On completed successfully".to_string(),
        result_image_data_url,
    })
}
