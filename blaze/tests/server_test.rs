use blaze::bytes::Bytes;
use blaze::envelope::{ErrorEnvelope, WRAPPED_INTERNAL_ERROR_KEY};
use blaze::http::{self, Method, StatusCode, header};
use blaze::prost::Message;
use blaze::server::{
    BufferedResponse, INVALID_ROUTE_META_KEY, Service, ServiceOptions, serve_buffered,
};
use blaze::trace::{LogTracer, SpanContext, SpanKind, Tracer};
use blaze::{Context, Error, ErrorKind};
use echo_service::EchoServiceServer;
use echo_service::pb::{EchoRequest, EchoResponse, Tone};
use echo_service_impl::EchoServiceImpl;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};


fn server(options: ServiceOptions) -> EchoServiceServer<EchoServiceImpl> {
    EchoServiceServer::new(EchoServiceImpl, options).unwrap()
}

fn request(path: &str, content_type: Option<&str>, body: impl Into<Bytes>) -> http::Request<Bytes> {
    let mut builder = http::Request::builder().method(Method::POST).uri(path);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(body.into()).unwrap()
}

fn json_request(body: &'static str) -> http::Request<Bytes> {
    request("/echo/UnaryEcho", Some("application/json"), body)
}

fn read_envelope(response: &http::Response<Bytes>) -> ErrorEnvelope {
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    serde_json::from_slice(response.body()).unwrap()
}

#[tokio::test]
async fn test_json_call() {
    let server = server(ServiceOptions::default());
    let req = request(
        "/echo/UnaryEcho",
        Some("application/json; charset=utf-8"),
        r#"{"message": "hello", "unknown_field": 42}"#,
    );

    let response = serve_buffered(&server, req).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        response.body().len().to_string().as_str()
    );
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body, serde_json::json!({ "message": "hello" }));
}

#[tokio::test]
async fn test_json_options() {
    let options = ServiceOptions::default()
        .with_json_enums_as_ints(true)
        .with_json_emit_defaults(true);
    let server = server(options);

    let response = serve_buffered(&server, json_request(r#"{"tone": "TONE_LOUD"}"#)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body, serde_json::json!({ "message": "", "tone": 1 }));
}

#[tokio::test]
async fn test_protobuf_call() {
    let server = server(ServiceOptions::default());
    let input = EchoRequest {
        message: "binary".to_string(),
        tone: Tone::Loud as i32,
    };
    let req = request(
        "/api/echo/UnaryEcho",
        Some("application/protobuf"),
        input.encode_to_vec(),
    );

    let response = serve_buffered(&server, req).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/protobuf");
    let output = EchoResponse::decode(response.body().clone()).unwrap();
    assert_eq!(output.message, "binary");
    assert_eq!(output.tone(), Tone::Loud);
}

#[tokio::test]
async fn test_unexpected_content_type() {
    let server = server(ServiceOptions::default());

    let response = serve_buffered(&server, request("/echo/UnaryEcho", Some("text/plain"), "hi")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let envelope = read_envelope(&response);
    assert_eq!(envelope.r#type, "invalid_argument");
    assert!(envelope.msg.contains(r#""text/plain""#), "{}", envelope.msg);
    assert_eq!(envelope.meta["argument"], "Content-Type");
    assert_eq!(envelope.meta[INVALID_ROUTE_META_KEY], "POST /echo/UnaryEcho");
}

#[tokio::test]
async fn test_missing_content_type() {
    let server = server(ServiceOptions::default());

    let response = serve_buffered(&server, request("/echo/UnaryEcho", None, "{}")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let envelope = read_envelope(&response);
    assert_eq!(envelope.msg, r#"Content-Type unexpected Content-Type: """#);
}

#[tokio::test]
async fn test_malformed_requests() {
    let server = server(ServiceOptions::default());

    let response = serve_buffered(&server, json_request("{not json")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let envelope = read_envelope(&response);
    assert_eq!(envelope.r#type, "malformed");
    assert_eq!(envelope.msg, "the json request could not be decoded");

    let req = request("/echo/UnaryEcho", Some("application/protobuf"), vec![0xff, 0xff]);
    let response = serve_buffered(&server, req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_envelope(&response).msg,
        "the protobuf request could not be decoded"
    );
}

#[tokio::test]
async fn test_service_error() {
    let server = server(ServiceOptions::default());

    let response = serve_buffered(&server, json_request(r#"{"message": "fail"}"#)).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let envelope = read_envelope(&response);
    assert_eq!(envelope.code, "404");
    assert_eq!(envelope.r#type, "not_found");
    assert_eq!(envelope.msg, "nothing to echo");
    assert_eq!(envelope.meta["echo"], "fail");
}

#[tokio::test]
async fn test_nil_response_is_internal() {
    let server = server(ServiceOptions::default());

    let response = serve_buffered(&server, json_request(r#"{"message": "nil"}"#)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = read_envelope(&response);
    assert_eq!(envelope.r#type, "internal");
    assert!(envelope.msg.contains("nil responses are not supported"));
    assert!(!response.body().is_empty());
}

#[tokio::test]
async fn test_panic_is_answered_then_resumed() {
    let server = server(ServiceOptions::default());
    let mut response = BufferedResponse::new();

    let outcome = AssertUnwindSafe(server.serve(json_request(r#"{"message": "panic"}"#), &mut response))
        .catch_unwind()
        .await;

    let payload = outcome.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"echo exploded"));

    let response = response.into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = read_envelope(&response);
    assert_eq!(envelope.r#type, "internal");
    assert_eq!(envelope.meta[WRAPPED_INTERNAL_ERROR_KEY], "panic: echo exploded");
}

#[tokio::test]
async fn test_bad_route() {
    let server = server(ServiceOptions::default());
    assert_eq!(server.mount_path(), "/echo");

    let response = serve_buffered(&server, request("/echo/Missing", Some("application/json"), "{}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let envelope = read_envelope(&response);
    assert_eq!(envelope.r#type, "bad_route");
    assert_eq!(envelope.meta[INVALID_ROUTE_META_KEY], "POST /echo/Missing");

    let get = http::Request::builder()
        .method(Method::GET)
        .uri("/echo/UnaryEcho")
        .body(Bytes::new())
        .unwrap();
    let response = serve_buffered(&server, get).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        read_envelope(&response).meta[INVALID_ROUTE_META_KEY],
        "GET /echo/UnaryEcho"
    );
}


/// Records how every server span ended.
#[derive(Default)]
struct RecordingTracer {
    ended: Mutex<Vec<Option<(ErrorKind, String)>>>,
}

impl Tracer for RecordingTracer {
    fn extract(&self, headers: &http::HeaderMap) -> SpanContext {
        LogTracer.extract(headers)
    }

    fn inject(&self, ctx: &Context, headers: &mut http::HeaderMap) {
        LogTracer.inject(ctx, headers)
    }

    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        parent: &SpanContext,
        attributes: &[(&'static str, &str)],
    ) -> tracing::Span {
        LogTracer.start_span(name, kind, parent, attributes)
    }

    fn end_span(&self, span: tracing::Span, error: Option<&Error>) {
        self.ended
            .lock()
            .unwrap()
            .push(error.map(|err| (err.kind(), err.msg().to_string())));
        LogTracer.end_span(span, error)
    }
}

#[tokio::test]
async fn test_spans_end_with_call_outcome() {
    let tracer = Arc::new(RecordingTracer::default());
    let server = server(ServiceOptions::default().with_tracer(tracer.clone()));

    serve_buffered(&server, json_request(r#"{"message": "hello"}"#)).await;
    serve_buffered(&server, json_request(r#"{"message": "fail"}"#)).await;

    assert_eq!(
        *tracer.ended.lock().unwrap(),
        vec![
            None,
            Some((ErrorKind::NotFound, "nothing to echo".to_string())),
        ]
    );
}
