//! Body codec seam and built-in codecs.
//!
//! The engine never (de)serializes bodies itself; it asks the
//! [`CodecRegistry`] for a codec that can handle the media type in play.
//! JSON and plain-text codecs ship by default; additional codecs arrive
//! through the provider registry.

use std::sync::Arc;

use restbind_types::{MediaType, ProcessingError};
use serde_json::Value;

use crate::provider::DEFAULT_PROVIDER_PRIORITY;

/// Reads and writes entity bodies for a family of media types.
pub trait BodyCodec: Send + Sync {
    /// Default priority used when a registration carries none.
    fn priority(&self) -> u32 {
        DEFAULT_PROVIDER_PRIORITY
    }

    fn can_read(&self, media: &MediaType) -> bool;

    fn can_write(&self, media: &MediaType) -> bool;

    fn read(&self, bytes: &[u8], media: &MediaType) -> Result<Value, ProcessingError>;

    fn write(&self, value: &Value, media: &MediaType) -> Result<Vec<u8>, ProcessingError>;
}

/// Ordered collection of codecs; the first codec accepting a media type wins.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn BodyCodec>>,
}

impl CodecRegistry {
    /// Registry with the built-in JSON and plain-text codecs.
    pub fn with_defaults() -> Self {
        Self {
            codecs: vec![Arc::new(JsonCodec), Arc::new(TextCodec)],
        }
    }

    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Register an additional codec ahead of the defaults.
    pub fn push_front(&mut self, codec: Arc<dyn BodyCodec>) {
        self.codecs.insert(0, codec);
    }

    pub fn can_read(&self, media: &MediaType) -> bool {
        self.codecs.iter().any(|codec| codec.can_read(media))
    }

    pub fn can_write(&self, media: &MediaType) -> bool {
        self.codecs.iter().any(|codec| codec.can_write(media))
    }

    /// Decode `bytes` under `media`. Empty bodies decode to `Value::Null`.
    pub fn read(&self, bytes: &[u8], media: &MediaType) -> Result<Value, ProcessingError> {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        let codec = self
            .codecs
            .iter()
            .find(|codec| codec.can_read(media))
            .ok_or_else(|| ProcessingError::NoReader {
                media_type: media.to_string(),
            })?;
        codec.read(bytes, media)
    }

    pub fn write(&self, value: &Value, media: &MediaType) -> Result<Vec<u8>, ProcessingError> {
        let codec = self
            .codecs
            .iter()
            .find(|codec| codec.can_write(media))
            .ok_or_else(|| ProcessingError::NoWriter {
                media_type: media.to_string(),
            })?;
        codec.write(value, media)
    }
}

/// `application/json` and `*+json` codec backed by `serde_json`.
pub struct JsonCodec;

impl BodyCodec for JsonCodec {
    fn can_read(&self, media: &MediaType) -> bool {
        let essence = media.essence();
        essence == MediaType::JSON || essence.ends_with("+json")
    }

    fn can_write(&self, media: &MediaType) -> bool {
        self.can_read(media)
    }

    fn read(&self, bytes: &[u8], media: &MediaType) -> Result<Value, ProcessingError> {
        serde_json::from_slice(bytes).map_err(|error| ProcessingError::decode(media.to_string(), error.to_string()))
    }

    fn write(&self, value: &Value, media: &MediaType) -> Result<Vec<u8>, ProcessingError> {
        serde_json::to_vec(value).map_err(|error| ProcessingError::encode(media.to_string(), error.to_string()))
    }
}

/// `text/*` codec mapping bodies to and from JSON strings.
pub struct TextCodec;

impl BodyCodec for TextCodec {
    fn can_read(&self, media: &MediaType) -> bool {
        media.essence().starts_with("text/")
    }

    fn can_write(&self, media: &MediaType) -> bool {
        self.can_read(media)
    }

    fn read(&self, bytes: &[u8], _media: &MediaType) -> Result<Value, ProcessingError> {
        Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn write(&self, value: &Value, _media: &MediaType) -> Result<Vec<u8>, ProcessingError> {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Ok(text.into_bytes())
    }
}
