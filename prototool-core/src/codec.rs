//! # Dynamic Message Codec
//!
//! Converts between the binary wire format and structured text (JSON) for any
//! message described by a [`DescriptorSet`], without generated code.
//!
//! The two directions treat unknown fields differently:
//!
//! * **Binary decoding** keeps fields the descriptor does not know about. They are
//!   carried opaquely and written back out by [`encode`].
//! * **Text parsing** rejects them with [`CodecError::Parse`].
pub mod wire;

use crate::descriptor::{DescriptorSet, LookupError};
use prost_reflect::{
    DeserializeOptions, DynamicMessage, MessageDescriptor, ReflectMessage, SerializeOptions,
};

pub use wire::encode;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("Failed to decode '{message}' from binary: {source}")]
    Decode {
        message: String,
        source: prost::DecodeError,
    },
    #[error("Invalid JSON for '{message}': {source}")]
    Parse {
        message: String,
        source: serde_json::Error,
    },
    #[error("Failed to render '{message}' as JSON: {source}")]
    Render {
        message: String,
        source: serde_json::Error,
    },
}

/// Decodes `bytes` as the message named `type_name`.
pub fn decode(
    set: &DescriptorSet,
    type_name: &str,
    bytes: &[u8],
) -> Result<DynamicMessage, CodecError> {
    decode_message(set.message(type_name)?, bytes)
}

/// Decodes `bytes` against a resolved message descriptor.
pub fn decode_message(
    descriptor: MessageDescriptor,
    bytes: &[u8],
) -> Result<DynamicMessage, CodecError> {
    let message = descriptor.full_name().to_string();
    DynamicMessage::decode(descriptor, bytes).map_err(|source| CodecError::Decode { message, source })
}

/// Parses structured text as the message named `type_name`.
pub fn from_text(
    set: &DescriptorSet,
    type_name: &str,
    text: &str,
) -> Result<DynamicMessage, CodecError> {
    parse_message(set.message(type_name)?, text)
}

/// Parses structured text against a resolved message descriptor.
///
/// The whole input must be exactly one JSON object.
pub fn parse_message(
    descriptor: MessageDescriptor,
    text: &str,
) -> Result<DynamicMessage, CodecError> {
    let message = descriptor.full_name().to_string();
    let parse_error = |source| CodecError::Parse {
        message: message.clone(),
        source,
    };

    let mut deserializer = serde_json::Deserializer::from_str(text);
    let parsed = DynamicMessage::deserialize_with_options(
        descriptor,
        &mut deserializer,
        &strict_options(),
    )
    .map_err(parse_error)?;
    deserializer.end().map_err(parse_error)?;

    Ok(parsed)
}

/// Builds a message from an already parsed JSON value.
pub fn from_value(
    descriptor: MessageDescriptor,
    value: serde_json::Value,
) -> Result<DynamicMessage, CodecError> {
    let message = descriptor.full_name().to_string();
    DynamicMessage::deserialize_with_options(descriptor, value, &strict_options())
        .map_err(|source| CodecError::Parse { message, source })
}

/// Renders a message as compact structured text.
pub fn to_text(message: &DynamicMessage) -> Result<String, CodecError> {
    let value = to_value(message)?;
    Ok(value.to_string())
}

/// Renders a message as a JSON value.
pub fn to_value(message: &DynamicMessage) -> Result<serde_json::Value, CodecError> {
    message
        .serialize_with_options(serde_json::value::Serializer, &SerializeOptions::new())
        .map_err(|source| CodecError::Render {
            message: message.descriptor().full_name().to_string(),
            source,
        })
}

fn strict_options() -> DeserializeOptions {
    DeserializeOptions::new().deny_unknown_fields(true)
}
