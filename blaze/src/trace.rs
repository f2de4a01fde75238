//! # Tracing
//!
//! Generated clients and servers do not know how spans are created or how trace context is
//! propagated; they call a [`Tracer`]. The default [`LogTracer`] records calls as `tracing`
//! spans and forwards the W3C and B3 propagation headers untouched, which is enough for a
//! subscriber-based exporter to stitch calls together.
use crate::context::Context;
use crate::error::Error;
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Header fields forwarded by [`LogTracer`].
pub const PROPAGATION_FIELDS: &[&str] = &[
    "traceparent",
    "tracestate",
    "b3",
    "x-b3-traceid",
    "x-b3-spanid",
    "x-b3-parentspanid",
    "x-b3-sampled",
];

/// Propagated trace context, as header name to header value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanContext(BTreeMap<String, String>);

impl SpanContext {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Client,
    Server,
}

impl SpanKind {
    fn as_str(self) -> &'static str {
        match self {
            SpanKind::Client => "client",
            SpanKind::Server => "server",
        }
    }
}

/// The tracing capability consumed by generated code.
pub trait Tracer: Send + Sync + 'static {
    /// Reads the propagated trace context from inbound request headers.
    fn extract(&self, headers: &HeaderMap) -> SpanContext;

    /// Writes the trace context of `ctx` into outbound request headers.
    fn inject(&self, ctx: &Context, headers: &mut HeaderMap);

    /// Starts a span for one call.
    ///
    /// # Arguments
    /// * `name` - Fully qualified method name, e.g. `echo.EchoService/UnaryEcho`.
    /// * `kind` - Whether the span covers the client or the server side.
    /// * `parent` - The propagated parent context.
    /// * `attributes` - Extra key/value attributes for the span.
    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        parent: &SpanContext,
        attributes: &[(&'static str, &str)],
    ) -> tracing::Span;

    /// Ends a span, recording the error the call failed with, if any.
    fn end_span(&self, span: tracing::Span, error: Option<&Error>);
}

impl<T: Tracer + ?Sized> Tracer for Arc<T> {
    fn extract(&self, headers: &HeaderMap) -> SpanContext {
        (**self).extract(headers)
    }

    fn inject(&self, ctx: &Context, headers: &mut HeaderMap) {
        (**self).inject(ctx, headers)
    }

    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        parent: &SpanContext,
        attributes: &[(&'static str, &str)],
    ) -> tracing::Span {
        (**self).start_span(name, kind, parent, attributes)
    }

    fn end_span(&self, span: tracing::Span, error: Option<&Error>) {
        (**self).end_span(span, error)
    }
}

/// Default tracer backed by `tracing` spans.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn extract(&self, headers: &HeaderMap) -> SpanContext {
        let mut span_context = SpanContext::default();
        for field in PROPAGATION_FIELDS {
            if let Some(value) = headers.get(*field).and_then(|v| v.to_str().ok()) {
                span_context.insert(*field, value);
            }
        }
        span_context
    }

    fn inject(&self, ctx: &Context, headers: &mut HeaderMap) {
        for (field, value) in ctx.span_context().iter() {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(field.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                tracing::debug!(field, "skipping invalid propagation header");
                continue;
            };
            headers.insert(name, value);
        }
    }

    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        parent: &SpanContext,
        attributes: &[(&'static str, &str)],
    ) -> tracing::Span {
        let span = tracing::info_span!(
            "blaze.rpc",
            otel.name = name,
            otel.kind = kind.as_str(),
            otel.status_code = tracing::field::Empty,
            rpc.system = "blaze",
            rpc.service = tracing::field::Empty,
            rpc.method = tracing::field::Empty,
            rpc.encoding = tracing::field::Empty,
            rpc.grpc.status_code = tracing::field::Empty,
            traceparent = parent.get("traceparent").unwrap_or_default(),
        );
        for (key, value) in attributes {
            span.record(*key, *value);
        }
        span
    }

    fn end_span(&self, span: tracing::Span, error: Option<&Error>) {
        match error {
            None => {
                span.record("otel.status_code", "OK");
                span.record("rpc.grpc.status_code", tonic::Code::Ok as i32);
            }
            Some(err) => {
                span.record("otel.status_code", "ERROR");
                span.record("rpc.grpc.status_code", err.kind().grpc_code() as i32);
                tracing::debug!(parent: &span, error = %err, "call failed");
            }
        }
    }
}
