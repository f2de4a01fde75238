//! # Blaze
//!
//! `blaze` is the runtime library behind the code emitted by `protoc-gen-blaze`. Generated
//! services speak a small RPC protocol over HTTP: every method is a `POST` to
//! `<path-prefix>/<Method>`, with a JSON or binary protobuf body selected by `Content-Type`.
//!
//! ## Key Components
//!
//! * **[`Error`]:** The closed error taxonomy. Every failure crossing a service boundary is one
//!   of the [`ErrorKind`]s, each mapped to an HTTP status.
//! * **[`envelope`]:** The JSON envelope errors travel in, and its reconstruction on the client.
//! * **[`client::Client`]:** The client half of the protocol, wrapped by generated clients.
//! * **[`server::ServerCore`]:** The server half: content-type routing, permissive decoding,
//!   panic containment and error responses.
//! * **[`Context`]:** Cancellation and deadlines, checked at fixed points of every client call.
//! * **[`trace::Tracer`]:** The seam through which spans are started and trace context travels.
//!
//! ## Re-exports
//!
//! This crate re-exports `async-trait`, `bytes`, `http`, `prost` and `prost-reflect` so that
//! generated code only needs a dependency on `blaze` itself.
pub mod client;
pub mod codec;
pub mod context;
pub mod envelope;
pub mod error;
pub mod response;
pub mod server;
pub mod trace;

pub use context::{Context, ContextError};
pub use error::{Error, ErrorKind, server_http_status};

// Re-exports
pub use async_trait::async_trait;
pub use bytes;
pub use http;
pub use prost;
pub use prost_reflect;

/// Header carrying the version of the generator a client was built with.
pub const BLAZE_VERSION_HEADER: &str = "Blaze-Version";

/// Type alias for the standard boxed error used in generic bounds.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Static description of a generated service, emitted next to it by `protoc-gen-blaze`.
#[derive(Debug, Clone, Copy)]
pub struct ServiceDescription {
    /// Fully qualified protobuf name, e.g. `echo.EchoService`.
    pub name: &'static str,
    /// Path prefix the service is mounted under, e.g. `/echo`.
    pub path_prefix: &'static str,
    /// Method names in declaration order. Generated code addresses methods by index.
    pub methods: &'static [&'static str],
    /// Version of the generator, sent as the `Blaze-Version` header.
    pub generator_version: &'static str,
    /// Gzip-compressed `FileDescriptorSet` holding the service and everything it references.
    pub file_descriptor: &'static [u8],
}
