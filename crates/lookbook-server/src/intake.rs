//! Multipart form readers for the upload endpoints.

use axum::extract::multipart::Field;
use axum::extract::Multipart;
use lookbook_contracts::data_url::DataUrl;

use crate::error::ApiError;

/// MIME assumed for uploads that do not declare one.
const FALLBACK_UPLOAD_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl UploadedFile {
    pub fn into_data_url(self) -> DataUrl {
        let mime = self
            .content_type
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or_else(|| FALLBACK_UPLOAD_MIME.to_string());
        DataUrl::new(mime, self.bytes)
    }
}

async fn read_file(field: Field<'_>) -> Result<UploadedFile, ApiError> {
    let content_type = field
        .content_type()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty());
    let bytes = field.bytes().await?.to_vec();
    Ok(UploadedFile {
        bytes,
        content_type,
    })
}

fn is_file_field(field: &Field<'_>) -> bool {
    field.file_name().is_some()
        || field
            .content_type()
            .map(|value| !value.starts_with("text/"))
            .unwrap_or(false)
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Debug, Default)]
pub struct AnalyzeForm {
    pub image: Option<UploadedFile>,
    pub thumbnails: bool,
}

/// `image` file plus the optional `thumbnails` flag. Unknown fields are
/// ignored; an empty `image` counts as missing.
pub async fn read_analyze_form(mut multipart: Multipart) -> Result<AnalyzeForm, ApiError> {
    let mut form = AnalyzeForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let upload = read_file(field).await?;
                form.image = Some(upload).filter(|upload| !upload.bytes.is_empty());
            }
            Some("thumbnails") => form.thumbnails = parse_flag(&field.text().await?),
            _ => {}
        }
    }
    Ok(form)
}

#[derive(Debug, Default)]
pub struct FittingForm {
    pub person: Option<UploadedFile>,
    /// `garmentImage` first, then `item_*` fields in the order received.
    pub garments: Vec<DataUrl>,
    /// Names of garment fields that held neither a file nor a data URL.
    pub skipped: Vec<String>,
}

pub async fn read_fitting_form(mut multipart: Multipart) -> Result<FittingForm, ApiError> {
    let mut form = FittingForm::default();
    let mut garment: Option<DataUrl> = None;
    let mut items = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "personImage" {
            let upload = read_file(field).await?;
            form.person = Some(upload).filter(|upload| !upload.bytes.is_empty());
            continue;
        }
        if name != "garmentImage" && !name.starts_with("item_") {
            continue;
        }
        let image = if is_file_field(&field) {
            Some(read_file(field).await?)
                .filter(|upload| !upload.bytes.is_empty())
                .map(UploadedFile::into_data_url)
        } else {
            field.text().await?.trim().parse::<DataUrl>().ok()
        };
        match image {
            Some(image) if name == "garmentImage" => garment = Some(image),
            Some(image) => items.push(image),
            None => form.skipped.push(name),
        }
    }

    form.garments = garment.into_iter().chain(items).collect();
    Ok(form)
}

#[cfg(test)]
mod tests {
    use lookbook_contracts::data_url::DataUrl;

    use super::{parse_flag, UploadedFile};

    #[test]
    fn flags_accept_common_truthy_spellings() {
        for raw in ["1", "true", " TRUE ", "yes", "on"] {
            assert!(parse_flag(raw), "{raw}");
        }
        for raw in ["", "0", "false", "nope"] {
            assert!(!parse_flag(raw), "{raw}");
        }
    }

    #[test]
    fn uploads_without_image_mime_default_to_jpeg() {
        let upload = UploadedFile {
            bytes: vec![1, 2],
            content_type: Some("application/octet-stream".to_string()),
        };
        assert_eq!(
            upload.into_data_url(),
            DataUrl::new("image/jpeg", vec![1, 2])
        );

        let png = UploadedFile {
            bytes: vec![3],
            content_type: Some("image/png".to_string()),
        };
        assert_eq!(png.into_data_url().mime_type, "image/png");
    }
}
