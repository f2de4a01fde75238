//! # Error Envelope
//!
//! The JSON body of every failed blaze call:
//!
//! ```json
//! { "code": "404", "msg": "user not found", "type": "not_found", "meta": { "id": "42" } }
//! ```
//!
//! `meta` is omitted when empty. Decoding rejects unknown fields so that bodies produced by
//! proxies or load balancers are not mistaken for protocol errors.
use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Messages longer than this many bytes are truncated on both ends of the wire.
pub const MAX_MSG_LEN: usize = 1_000_000;

/// Reserved metadata key carrying the string form of an `Internal` error's cause.
pub const WRAPPED_INTERNAL_ERROR_KEY: &str = "wrapped_internal_error";

const FALLBACK_BODY: &[u8] =
    br#"{"code":"500","msg":"There was an error but it could not be serialized into JSON","type":"internal"}"#;

#[derive(thiserror::Error, Debug)]
pub enum EnvelopeError {
    #[error("Unregistered error type: '{0}'")]
    UnregisteredType(String),
}

/// Wire representation of an [`Error`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorEnvelope {
    pub code: String,
    pub msg: String,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl ErrorEnvelope {
    pub fn from_error(err: &Error) -> Self {
        let mut meta = err.meta_map();
        if let (ErrorKind::Internal, Some(cause)) = (err.kind(), err.cause()) {
            meta.insert(WRAPPED_INTERNAL_ERROR_KEY.to_string(), cause.to_string());
        }

        Self {
            code: err.http_status().as_u16().to_string(),
            msg: truncate(err.msg()).to_string(),
            r#type: err.kind().tag().to_string(),
            meta,
        }
    }

    /// Rebuilds the [`Error`] described by this envelope.
    ///
    /// # Returns
    /// * `Ok(Error)` - The `type` tag is registered.
    /// * `Err(EnvelopeError)` - The tag is unknown.
    pub fn into_error(self) -> Result<Error, EnvelopeError> {
        let kind = ErrorKind::from_tag(&self.r#type)
            .ok_or_else(|| EnvelopeError::UnregisteredType(self.r#type.clone()))?;
        let msg = truncate(&self.msg).to_string();

        let mut err = match self.meta.get(WRAPPED_INTERNAL_ERROR_KEY) {
            Some(cause) if kind == ErrorKind::Internal => {
                Error::internal_with(cause.clone(), msg)
            }
            _ => Error::new(kind, msg),
        };

        for (key, value) in self.meta {
            if key == WRAPPED_INTERNAL_ERROR_KEY {
                continue;
            }
            err = err.with_meta(key, value);
        }

        Ok(err)
    }
}

/// Serializes `err` as an error response body.
///
/// Falls back to a fixed `internal` envelope if serialization fails.
pub fn marshal_error(err: &Error) -> Vec<u8> {
    serde_json::to_vec(&ErrorEnvelope::from_error(err)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize error envelope");
        FALLBACK_BODY.to_vec()
    })
}

fn truncate(msg: &str) -> &str {
    if msg.len() <= MAX_MSG_LEN {
        return msg;
    }
    let mut end = MAX_MSG_LEN;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    &msg[..end]
}
