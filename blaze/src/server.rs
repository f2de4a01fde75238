//! # Generic Server
//!
//! Generated servers route each request to a method index and hand it to
//! [`ServerCore::handle`], which implements the server half of the wire protocol:
//!
//! 1. **Tracing**: the trace context is extracted from the request headers and a server span
//!    wraps the whole call.
//! 2. **Content-Type routing**: `application/json` and `application/protobuf` select the
//!    encoding. Anything else, including a missing header, is answered with an
//!    `InvalidArgument` error and the service is never called.
//! 3. **Decoding**: request bodies are decoded permissively. Failures are `Malformed`.
//! 4. **Invocation**: the service method runs inside a panic guard. A panic is answered with
//!    an `Internal` error, flushed, and then resumed so the process can fail fast.
//! 5. **Encoding**: a successful output is encoded with the configured [`JsonOptions`]. A
//!    missing output (`Ok(None)`) is an `Internal` error, never an empty 200.
//!
//! Errors are always written as a JSON [`crate::envelope::ErrorEnvelope`] with the status
//! mapped from their kind.
use crate::codec::{self, Encoding, JsonOptions, Schema};
use crate::context::Context;
use crate::envelope::marshal_error;
use crate::error::Error;
use crate::trace::{LogTracer, SpanKind, Tracer};
use crate::ServiceDescription;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::FutureExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use prost::Message;
use prost_reflect::MethodDescriptor;
use std::any::Any;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Metadata key naming the request that could not be routed or was rejected.
pub const INVALID_ROUTE_META_KEY: &str = "blaze_invalid_route";

/// The sink a server writes its response into.
#[async_trait]
pub trait ResponseWriter: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commits the status line. Headers set afterwards are not sent.
    fn write_head(&mut self, status: StatusCode);

    /// Writes body bytes, returning how many were accepted.
    async fn write_body(&mut self, body: Bytes) -> io::Result<usize>;

    async fn flush(&mut self) -> io::Result<()>;
}

/// A [`ResponseWriter`] that collects the response in memory.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    /// Headers as they were when the status was committed.
    sent_headers: Option<HeaderMap>,
    body: BytesMut,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected response. The status defaults to 200 if none was written.
    pub fn into_response(self) -> http::Response<Bytes> {
        let mut response = http::Response::new(self.body.freeze());
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.sent_headers.unwrap_or(self.headers);
        response
    }

    fn commit(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
            self.sent_headers = Some(self.headers.clone());
        }
    }
}

#[async_trait]
impl ResponseWriter for BufferedResponse {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_head(&mut self, status: StatusCode) {
        self.commit(status);
    }

    async fn write_body(&mut self, body: Bytes) -> io::Result<usize> {
        self.commit(StatusCode::OK);
        self.body.extend_from_slice(&body);
        Ok(body.len())
    }

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A mountable blaze service.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// The path prefix the service answers under, e.g. `/echo`.
    fn mount_path(&self) -> &'static str;

    async fn serve(&self, request: http::Request<Bytes>, response: &mut dyn ResponseWriter);
}

/// Serves `request` and collects the response in memory.
pub async fn serve_buffered<S>(service: &S, request: http::Request<Bytes>) -> http::Response<Bytes>
where
    S: Service + ?Sized,
{
    let mut response = BufferedResponse::new();
    service.serve(request, &mut response).await;
    response.into_response()
}

#[derive(Clone)]
pub struct ServiceOptions {
    pub tracer: Arc<dyn Tracer>,
    /// Render enums as numbers in JSON responses.
    pub json_enums_as_ints: bool,
    /// Emit default-valued fields in JSON responses.
    pub json_emit_defaults: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            tracer: Arc::new(LogTracer),
            json_enums_as_ints: false,
            json_emit_defaults: false,
        }
    }
}

impl ServiceOptions {
    pub fn with_tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    pub fn with_json_enums_as_ints(mut self, enabled: bool) -> Self {
        self.json_enums_as_ints = enabled;
        self
    }

    pub fn with_json_emit_defaults(mut self, enabled: bool) -> Self {
        self.json_emit_defaults = enabled;
        self
    }

    fn json(&self) -> JsonOptions {
        JsonOptions {
            enums_as_ints: self.json_enums_as_ints,
            emit_defaults: self.json_emit_defaults,
        }
    }
}

/// The error a panicking service method is reported with.
#[derive(thiserror::Error, Debug)]
#[error("panic: {0}")]
pub struct PanicError(String);

impl PanicError {
    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self(msg)
    }
}

/// A `BadRoute` error for a request no method answers to.
pub fn server_bad_route_error(msg: &str, method: &Method, path: &str) -> Error {
    Error::bad_route(msg).with_meta(INVALID_ROUTE_META_KEY, format!("{method} {path}"))
}

/// An `InvalidArgument` error for a request the server refuses to handle.
pub fn server_invalid_request_error(
    argument: &str,
    validation_msg: &str,
    method: &Method,
    path: &str,
) -> Error {
    Error::invalid_argument(argument, validation_msg)
        .with_meta(INVALID_ROUTE_META_KEY, format!("{method} {path}"))
}

/// Writes `err` as a JSON error response.
///
/// A write failure is logged: the status line is already committed.
pub async fn write_error(response: &mut dyn ResponseWriter, err: &Error) {
    let body = marshal_error(err);

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(codec::CONTENT_TYPE_JSON));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    response.write_head(err.http_status());

    if let Err(write_err) = response.write_body(Bytes::from(body)).await {
        tracing::error!(error = %write_err, blaze_error = %err, "resp write failed");
    }
}

struct Failure {
    error: Error,
    panic: Option<Box<dyn Any + Send>>,
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self { error, panic: None }
    }
}

/// The server half of the protocol for one service.
pub struct ServerCore {
    description: &'static ServiceDescription,
    methods: Vec<MethodDescriptor>,
    options: ServiceOptions,
}

impl ServerCore {
    pub fn new(
        description: &'static ServiceDescription,
        options: ServiceOptions,
    ) -> Result<Self, Error> {
        let schema = Schema::from_gzipped(description.file_descriptor)
            .map_err(|e| Error::internal_with(e, "invalid embedded descriptor"))?;
        let methods = description
            .methods
            .iter()
            .map(|name| schema.method(description.name, name))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::internal_with(e, "invalid embedded descriptor"))?;

        Ok(Self {
            description,
            methods,
            options,
        })
    }

    pub fn description(&self) -> &'static ServiceDescription {
        self.description
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Finds the method a request is addressed to.
    ///
    /// Only `POST` requests whose path ends in `<path-prefix>/<Method>` are routed, so the
    /// service may be mounted below an outer prefix.
    pub fn route<B>(&self, request: &http::Request<B>) -> Option<usize> {
        if request.method() != Method::POST {
            return None;
        }
        let path = request.uri().path();
        self.description.methods.iter().position(|name| {
            path.strip_suffix(name)
                .and_then(|rest| rest.strip_suffix('/'))
                .is_some_and(|rest| rest.ends_with(self.description.path_prefix))
        })
    }

    /// Answers a request that [`ServerCore::route`] could not route.
    pub async fn write_bad_route<B>(
        &self,
        request: &http::Request<B>,
        response: &mut dyn ResponseWriter,
    ) {
        let path = request.uri().path();
        let msg = format!("no handler for path {path:?}");
        let err = server_bad_route_error(&msg, request.method(), path);
        tracing::debug!(method = %request.method(), path, "bad route");
        write_error(response, &err).await;
    }

    /// Handles one call to the method at index `method`.
    ///
    /// `call` invokes the service implementation. If it panics, the error response is written
    /// and flushed before the panic is resumed.
    pub async fn handle<I, O, F, Fut>(
        &self,
        method: usize,
        request: http::Request<Bytes>,
        response: &mut dyn ResponseWriter,
        call: F,
    ) where
        I: Message + Default + Send + 'static,
        O: Message + Send + 'static,
        F: FnOnce(Context, I) -> Fut + Send,
        Fut: Future<Output = Result<Option<O>, Error>> + Send,
    {
        let Some((&name, desc)) = self.description.methods.get(method).zip(self.methods.get(method))
        else {
            let err = Error::internal(format!(
                "method index {method} out of range for {}",
                self.description.name
            ));
            write_error(response, &err).await;
            return;
        };

        let tracer = &self.options.tracer;
        let parent = tracer.extract(request.headers());
        let span = tracer.start_span(
            &format!("{}/{name}", self.description.name),
            SpanKind::Server,
            &parent,
            &[("rpc.service", self.description.name), ("rpc.method", name)],
        );
        let ctx = Context::background().with_span_context(parent);

        let result = self
            .dispatch(ctx, desc, request, response, call)
            .instrument(span.clone())
            .await;

        match result {
            Ok(()) => tracer.end_span(span, None),
            Err(failure) => {
                tracer.end_span(span, Some(&failure.error));
                if let Some(payload) = failure.panic {
                    std::panic::resume_unwind(payload);
                }
            }
        }
    }

    async fn dispatch<I, O, F, Fut>(
        &self,
        ctx: Context,
        desc: &MethodDescriptor,
        request: http::Request<Bytes>,
        response: &mut dyn ResponseWriter,
        call: F,
    ) -> Result<(), Failure>
    where
        I: Message + Default + Send + 'static,
        O: Message + Send + 'static,
        F: FnOnce(Context, I) -> Fut + Send,
        Fut: Future<Output = Result<Option<O>, Error>> + Send,
    {
        let header = request
            .headers()
            .get(CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

        let Some(encoding) = Encoding::from_content_type(header.as_deref()) else {
            let msg = format!("unexpected Content-Type: {:?}", header.unwrap_or_default());
            let err = server_invalid_request_error(
                "Content-Type",
                &msg,
                request.method(),
                request.uri().path(),
            );
            write_error(response, &err).await;
            return Err(err.into());
        };
        tracing::Span::current().record("rpc.encoding", encoding.content_type());

        let input = match encoding {
            Encoding::Json => codec::decode_json::<I>(&desc.input(), request.body()).map_err(|e| {
                tracing::debug!(error = %e, "invalid json request");
                Error::malformed("the json request could not be decoded")
            }),
            Encoding::Protobuf => codec::decode_protobuf::<I>(request.body()).map_err(|e| {
                tracing::debug!(error = %e, "invalid protobuf request");
                Error::malformed("the protobuf request could not be decoded")
            }),
        };
        let input = match input {
            Ok(input) => input,
            Err(err) => {
                write_error(response, &err).await;
                return Err(err.into());
            }
        };

        let outcome = AssertUnwindSafe(async move { call(ctx, input).await })
            .catch_unwind()
            .await;

        let output = match outcome {
            Ok(Ok(Some(output))) => output,
            Ok(Ok(None)) => {
                let err = Error::internal("received a nil response. nil responses are not supported");
                write_error(response, &err).await;
                return Err(err.into());
            }
            Ok(Err(err)) => {
                write_error(response, &err).await;
                return Err(err.into());
            }
            Err(payload) => {
                let err = Error::internal_with(
                    PanicError::from_payload(payload.as_ref()),
                    "Internal service panic",
                );
                write_error(response, &err).await;
                if let Err(flush_err) = response.flush().await {
                    tracing::error!(error = %flush_err, "failed to flush panic response");
                }
                return Err(Failure {
                    error: err,
                    panic: Some(payload),
                });
            }
        };

        let body = match encoding {
            Encoding::Json => codec::encode_json(&desc.output(), &output, self.options.json())
                .map_err(|e| Error::internal_with(e, "failed to marshal json response")),
            Encoding::Protobuf => Ok(codec::encode_protobuf(&output)),
        };
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                write_error(response, &err).await;
                return Err(err.into());
            }
        };

        let len = body.len();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(encoding.content_type()));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        response.write_head(StatusCode::OK);

        match response.write_body(Bytes::from(body)).await {
            Ok(written) if written < len => {
                tracing::error!("failed to write response, {written} of {len} bytes written");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("failed to write response, 0 of {len} bytes written: {e}");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ErrorEnvelope;

    #[tokio::test]
    async fn test_buffered_response_commits_headers_with_status() {
        let mut response = BufferedResponse::new();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.write_head(StatusCode::CREATED);
        response
            .headers_mut()
            .insert("x-late", HeaderValue::from_static("dropped"));
        response.write_head(StatusCode::IM_A_TEAPOT);
        response.write_body(Bytes::from_static(b"{}")).await.unwrap();

        let response = response.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert!(response.headers().get("x-late").is_none());
        assert_eq!(response.body().as_ref(), b"{}");
    }

    #[tokio::test]
    async fn test_buffered_response_body_implies_ok() {
        let mut response = BufferedResponse::new();
        response.write_body(Bytes::from_static(b"hi")).await.unwrap();
        response
            .headers_mut()
            .insert("x-late", HeaderValue::from_static("dropped"));

        let response = response.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().is_empty());
    }

    #[tokio::test]
    async fn test_write_error() {
        let mut response = BufferedResponse::new();
        let err = Error::permission_denied("not yours").with_meta("owner", "alice");
        write_error(&mut response, &err).await;

        let response = response.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            response.headers()[CONTENT_LENGTH],
            response.body().len().to_string().as_str()
        );

        let envelope: ErrorEnvelope = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(envelope.code, "403");
        assert_eq!(envelope.r#type, "permission_denied");
        assert_eq!(envelope.meta["owner"], "alice");
    }

    #[test]
    fn test_route_errors_carry_request() {
        let err = server_bad_route_error("nope", &Method::GET, "/echo/UnaryEcho");
        assert_eq!(err.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(err.meta(INVALID_ROUTE_META_KEY), "GET /echo/UnaryEcho");

        let err = server_invalid_request_error("Content-Type", "bad", &Method::POST, "/x");
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.meta("argument"), "Content-Type");
        assert_eq!(err.meta(INVALID_ROUTE_META_KEY), "POST /x");
    }

    #[test]
    fn test_panic_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(PanicError::from_payload(payload.as_ref()).to_string(), "panic: static str");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(PanicError::from_payload(payload.as_ref()).to_string(), "panic: owned");
    }
}
