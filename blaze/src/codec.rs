//! # Encodings
//!
//! Every blaze method is reachable in two encodings, selected by the `Content-Type` header:
//! `application/json` and `application/protobuf`.
//!
//! ## How JSON works
//!
//! Generated message types only implement [`prost::Message`]. JSON is produced by transcoding
//! them through a `prost_reflect::DynamicMessage` built from the descriptor embedded in the
//! generated code:
//!
//! 1. **Decode (JSON -> message)**: the body is deserialized into a `DynamicMessage` using the
//!    input `MessageDescriptor`, ignoring unknown fields, and then transcoded to the concrete type.
//! 2. **Encode (message -> JSON)**: the concrete message is transcoded into a `DynamicMessage`
//!    and serialized with the configured [`JsonOptions`].
use flate2::read::GzDecoder;
use prost::Message;
use prost_reflect::{
    DescriptorPool, DeserializeOptions, DynamicMessage, MessageDescriptor, MethodDescriptor,
    SerializeOptions,
};
use std::io::Read;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_PROTOBUF: &str = "application/protobuf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Protobuf,
}

impl Encoding {
    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Json => CONTENT_TYPE_JSON,
            Encoding::Protobuf => CONTENT_TYPE_PROTOBUF,
        }
    }

    /// Picks the encoding named by a `Content-Type` header value.
    ///
    /// Parameters after `;` are ignored and the media type is compared case-insensitively.
    /// Returns `None` for any other media type, including an absent header.
    pub fn from_content_type(header: Option<&str>) -> Option<Encoding> {
        let media_type = header?.split(';').next()?.trim().to_ascii_lowercase();
        match media_type.as_str() {
            CONTENT_TYPE_JSON => Some(Encoding::Json),
            CONTENT_TYPE_PROTOBUF => Some(Encoding::Protobuf),
            _ => None,
        }
    }
}

/// Rendering options for JSON responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonOptions {
    /// Render enum values as numbers instead of names.
    pub enums_as_ints: bool,
    /// Emit fields holding their default value instead of omitting them.
    pub emit_defaults: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    #[error("Failed to decompress the embedded descriptor: '{0}'")]
    Decompress(#[source] std::io::Error),
    #[error("Failed to decode the embedded descriptor: '{0}'")]
    Decode(#[from] prost_reflect::DescriptorError),
    #[error("Service '{0}' not found in the embedded descriptor")]
    ServiceNotFound(String),
    #[error("Method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },
}

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("Invalid JSON: '{0}'")]
    Json(#[from] serde_json::Error),
    #[error("Invalid protobuf: '{0}'")]
    Protobuf(#[from] prost::DecodeError),
    #[error("Failed to transcode message: '{0}'")]
    Transcode(#[from] prost::EncodeError),
}

/// The message schemas of one service, decoded from its embedded descriptor.
#[derive(Debug, Clone)]
pub struct Schema {
    pool: DescriptorPool,
}

impl Schema {
    /// Decodes a gzip-compressed, serialized `FileDescriptorSet`.
    pub fn from_gzipped(descriptor: &[u8]) -> Result<Self, SchemaError> {
        let mut bytes = Vec::new();
        GzDecoder::new(descriptor)
            .read_to_end(&mut bytes)
            .map_err(SchemaError::Decompress)?;
        let pool = DescriptorPool::decode(bytes.as_slice())?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Looks up `method` on the service with the fully qualified name `service`.
    pub fn method(&self, service: &str, method: &str) -> Result<MethodDescriptor, SchemaError> {
        let svc = self
            .pool
            .get_service_by_name(service)
            .ok_or_else(|| SchemaError::ServiceNotFound(service.to_string()))?;

        svc.methods()
            .find(|m| m.name() == method)
            .ok_or_else(|| SchemaError::MethodNotFound {
                service: service.to_string(),
                method: method.to_string(),
            })
    }
}

/// Decodes a JSON body into `T`, ignoring unknown fields.
pub fn decode_json<T>(desc: &MessageDescriptor, body: &[u8]) -> Result<T, CodecError>
where
    T: Message + Default,
{
    let mut deserializer = serde_json::Deserializer::from_slice(body);
    let options = DeserializeOptions::new().deny_unknown_fields(false);
    let dynamic =
        DynamicMessage::deserialize_with_options(desc.clone(), &mut deserializer, &options)?;
    deserializer.end()?;

    Ok(dynamic.transcode_to::<T>()?)
}

/// Encodes `msg` as JSON, using proto field names.
pub fn encode_json<T>(
    desc: &MessageDescriptor,
    msg: &T,
    options: JsonOptions,
) -> Result<Vec<u8>, CodecError>
where
    T: Message,
{
    let mut dynamic = DynamicMessage::new(desc.clone());
    dynamic.transcode_from(msg)?;

    let options = SerializeOptions::new()
        .use_proto_field_name(true)
        .use_enum_numbers(options.enums_as_ints)
        .skip_default_fields(!options.emit_defaults);

    let mut serializer = serde_json::Serializer::new(Vec::new());
    dynamic.serialize_with_options(&mut serializer, &options)?;
    Ok(serializer.into_inner())
}

pub fn decode_protobuf<T>(body: &[u8]) -> Result<T, CodecError>
where
    T: Message + Default,
{
    Ok(T::decode(body)?)
}

pub fn encode_protobuf<T>(msg: &T) -> Vec<u8>
where
    T: Message,
{
    msg.encode_to_vec()
}
