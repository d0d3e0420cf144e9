use std::env;
use std::io::Cursor;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lookbook_contracts::data_url::DataUrl;
use lookbook_contracts::models::Task;
use lookbook_contracts::schema::SchemaError;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub mod adapters;
pub mod crop;
pub mod fanout;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    InlineImage(DataUrl),
}

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub task: Task,
    pub model: String,
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayResponse {
    pub parts: Vec<ContentPart>,
    pub warnings: Vec<String>,
}

impl GatewayResponse {
    /// All text parts joined in order, `None` when the model sent no text.
    pub fn text(&self) -> Option<String> {
        let texts = self
            .parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::InlineImage(_) => None,
            })
            .collect::<Vec<&str>>();
        if texts.is_empty() {
            return None;
        }
        Some(texts.concat())
    }

    pub fn first_image(&self) -> Option<&DataUrl> {
        self.parts.iter().find_map(|part| match part {
            ContentPart::InlineImage(image) => Some(image),
            ContentPart::Text(_) => None,
        })
    }
}

/// One blocking call to a generative model.
pub trait GenerativeGateway: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GatewayRequest) -> Result<GatewayResponse>;
}

/// Upstream failures the HTTP boundary reports with specific statuses.
///
/// They travel inside `anyhow::Error`; use [`gateway_error`] to find one in
/// a context chain.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} gateway is not configured: set GEMINI_API_KEY or GOOGLE_API_KEY")]
    NotConfigured(String),
    #[error("model response could not be parsed")]
    Unparseable(#[from] SchemaError),
    #[error("model returned no {0}")]
    NoPayload(&'static str),
}

pub fn gateway_error(err: &anyhow::Error) -> Option<&GatewayError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<GatewayError>())
}

pub struct GeminiGateway {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiGateway {
    pub fn new(api_base: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        let api_base = api_base.trim().trim_end_matches('/');
        Ok(Self {
            api_base: if api_base.is_empty() {
                DEFAULT_GEMINI_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            http,
        })
    }

    /// `GEMINI_API_BASE`, then `GEMINI_API_KEY` or `GOOGLE_API_KEY`.
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let api_base =
            non_empty_env("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());
        Self::new(&api_base, Self::api_key_from_env(), timeout)
    }

    fn api_key_from_env() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &GatewayRequest) -> Value {
        let parts = request
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => json!({ "text": text }),
                ContentPart::InlineImage(image) => image_part(image),
            })
            .collect::<Vec<Value>>();

        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            Value::Array(vec![json!({
                "role": "user",
                "parts": parts,
            })]),
        );
        let generation_config = if request.task.returns_image() {
            json!({ "responseModalities": ["TEXT", "IMAGE"] })
        } else {
            json!({ "responseMimeType": "application/json" })
        };
        payload.insert("generationConfig".to_string(), generation_config);
        Value::Object(payload)
    }

    fn extract_parts(response_payload: &Value, warnings: &mut Vec<String>) -> Result<Vec<ContentPart>> {
        if let Some(reason) = response_payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            push_unique_warning(warnings, format!("Gemini blocked the prompt: {reason}."));
        }

        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::new();

        for candidate in candidates {
            if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
                if reason != "STOP" {
                    push_unique_warning(
                        warnings,
                        format!("Gemini candidate finished with {reason}."),
                    );
                }
            }
            let parts = candidate
                .get("content")
                .and_then(Value::as_object)
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push(ContentPart::Text(text.to_string()));
                    continue;
                }
                let inline = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                out.push(ContentPart::InlineImage(DataUrl::new(mime_type, bytes)));
            }
        }

        Ok(out)
    }
}

impl GenerativeGateway for GeminiGateway {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(GatewayError::NotConfigured(self.name().to_string()).into());
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        let mut warnings = Vec::new();
        let parts = Self::extract_parts(&response_payload, &mut warnings)?;
        Ok(GatewayResponse { parts, warnings })
    }
}

/// Offline gateway with canned answers, for demos and tests without a key.
pub struct DryrunGateway;

impl DryrunGateway {
    fn detection_text() -> String {
        let payload = json!({
            "items": [
                {
                    "name": "Cropped Denim Jacket",
                    "brand": "Unknown",
                    "price": "$85",
                    "matchScore": 91,
                    "category": "outerwear",
                    "color": "light blue",
                    "material": "denim",
                    "boundingBox": {"x": 0.25, "y": 0.18, "width": 0.5, "height": 0.32},
                    "searchQuery": "light blue cropped denim jacket"
                },
                {
                    "name": "Pleated Midi Skirt",
                    "brand": "Unknown",
                    "price": "$60",
                    "matchScore": 84,
                    "category": "bottom",
                    "color": "cream",
                    "material": "polyester",
                    "boundingBox": {"x": 0.28, "y": 0.48, "width": 0.44, "height": 0.38},
                    "searchQuery": "cream pleated midi skirt"
                },
                {
                    "name": "White Leather Sneakers",
                    "brand": "Unknown",
                    "price": "$110",
                    "matchScore": 78,
                    "category": "shoes",
                    "color": "white",
                    "material": "leather",
                    "boundingBox": {"x": 0.3, "y": 0.88, "width": 0.4, "height": 0.2},
                    "searchQuery": "white leather low top sneakers"
                }
            ]
        });
        format!("```json\n{payload:#}\n```")
    }

    fn product_search_text() -> String {
        let products = [
            ("Levi's Trucker Jacket", "$98", "photo-1551028919-ac6635f0e5c9"),
            ("Everlane Denim Overshirt", "$78", "photo-1544923246-77307dd654cb"),
            ("COS Pleated Midi Skirt", "$89", "photo-1584370848010-d7d6ac627ed8"),
            ("Veja Campo Sneakers", "$150", "photo-1549298916-b41d501d3772"),
        ]
        .iter()
        .enumerate()
        .map(|(idx, (title, price, photo))| {
            json!({
                "title": title,
                "price": price,
                "imageUrl": format!("https://images.unsplash.com/{photo}?w=400"),
                "purchaseUrl": format!("https://shop.example.com/products/{idx}"),
            })
        })
        .collect::<Vec<Value>>();
        json!({ "products": products }).to_string()
    }

    fn render_image(request: &GatewayRequest) -> Result<DataUrl> {
        let prompt = request
            .parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::InlineImage(_) => None,
            })
            .collect::<Vec<&str>>()
            .join("\n");
        // Try-on output keeps the framing of the person photo.
        let (width, height) = match (request.task, request.parts.first()) {
            (Task::TryOn, Some(ContentPart::InlineImage(person))) => {
                image::load_from_memory(&person.data)
                    .map(|image| (image.width(), image.height()))
                    .unwrap_or((512, 768))
            }
            _ => (512, 512),
        };
        let (r, g, b) = color_from_prompt(&prompt, &request.model);
        let mut canvas = RgbImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        Ok(DataUrl::png(encode_png(&DynamicImage::ImageRgb8(canvas))?))
    }
}

impl GenerativeGateway for DryrunGateway {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        let part = match request.task {
            Task::Detect => ContentPart::Text(Self::detection_text()),
            Task::ProductSearch => ContentPart::Text(Self::product_search_text()),
            Task::Thumbnail | Task::TryOn => ContentPart::InlineImage(Self::render_image(request)?),
        };
        Ok(GatewayResponse {
            parts: vec![part],
            warnings: vec!["dryrun gateway: no upstream model was called.".to_string()],
        })
    }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("PNG encode failed")?;
    Ok(bytes)
}

fn image_part(image: &DataUrl) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": image.base64_data(),
        }
    })
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(reqwest::Error::without_url)
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Flatten an error and its causes into one line, skipping repeats.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

fn color_from_prompt(prompt: &str, model: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(model.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
