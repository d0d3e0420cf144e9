use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_IMAGE_MIME: &str = "image/png";

/// An image carried as `data:<mime>;base64,<payload>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataUrlError {
    #[error("data URL must start with `data:`")]
    MissingScheme,
    #[error("data URL must be base64 encoded (`;base64,`)")]
    NotBase64,
    #[error("data URL payload is not valid base64")]
    InvalidPayload,
}

impl DataUrl {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        let mime_type = mime_type.into();
        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_IMAGE_MIME.to_string()
        } else {
            mime_type.trim().to_string()
        };
        Self { mime_type, data }
    }

    pub fn png(data: Vec<u8>) -> Self {
        Self::new(DEFAULT_IMAGE_MIME, data)
    }

    /// Base64 text of the payload, as inline request parts expect it.
    pub fn base64_data(&self) -> String {
        BASE64.encode(&self.data)
    }
}

impl FromStr for DataUrl {
    type Err = DataUrlError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let rest = raw
            .trim()
            .strip_prefix("data:")
            .ok_or(DataUrlError::MissingScheme)?;
        let (mime_type, payload) = rest.split_once(";base64,").ok_or(DataUrlError::NotBase64)?;
        let data = BASE64
            .decode(payload.trim().as_bytes())
            .map_err(|_| DataUrlError::InvalidPayload)?;
        Ok(Self::new(mime_type, data))
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.base64_data())
    }
}

impl Serialize for DataUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DataUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
