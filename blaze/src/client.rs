//! # Generic Client
//!
//! Generated clients are thin wrappers around [`Client`], which implements the client half
//! of the wire protocol for any service described by a [`ServiceDescription`].
//!
//! ## How it works
//!
//! At construction the client resolves one URL per method
//! (`<base>/<service-path-prefix>/<MethodName>`) and, for JSON clients, the message
//! descriptors needed to transcode requests and responses. Nothing is mutated afterwards, so
//! a single client can be shared freely between tasks.
//!
//! Each call then:
//!
//! 1. Encodes the input. A failure is an `Internal` error.
//! 2. Checks the [`Context`], builds a `POST` request and injects the trace context.
//! 3. Sends it through the [`HttpClient`] and checks the context again.
//! 4. Translates any non-200 response with [`error_from_response`].
//! 5. Decodes the output and checks the context one last time.
//!
//! ## Transports
//!
//! Anything implementing [`HttpClient`] can carry the calls. The standard transport is
//! `reqwest`: pass a [`reqwest::ClientBuilder`] and the client is built with redirects
//! disabled, because following a redirect would turn the `POST` into a body-less `GET`.
//! A ready-made [`reqwest::Client`] is accepted too, but it keeps whatever redirect policy
//! it was built with; build it with [`without_redirects`] to get redirect errors reported
//! as such.
use crate::codec::{self, Encoding, JsonOptions, Schema};
use crate::context::{Context, checkpoint};
use crate::error::Error;
use crate::response::error_from_response;
use crate::trace::{LogTracer, SpanKind, Tracer};
use crate::{BLAZE_VERSION_HEADER, BoxError, ServiceDescription};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode, header};
use prost::Message;
use prost_reflect::MethodDescriptor;
use std::sync::Arc;
use tracing::Instrument;

/// The transport used by generated clients: send a request, get a response.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError> {
        (**self).send(request).await
    }
}

/// A `reqwest` client that never follows redirects.
#[derive(Debug, Clone)]
pub struct StandardTransport {
    client: reqwest::Client,
}

impl StandardTransport {
    pub fn new() -> Result<Self, Error> {
        Self::from_builder(reqwest::Client::builder())
    }

    /// Builds the transport from a caller-configured builder, overriding its redirect policy.
    pub fn from_builder(builder: reqwest::ClientBuilder) -> Result<Self, Error> {
        let client = without_redirects(builder)
            .build()
            .map_err(|e| Error::internal_with(e, "could not build http client"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for StandardTransport {
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError> {
        HttpClient::send(&self.client, request).await
    }
}

/// Sends through a caller-built client. Its redirect policy is left as configured.
#[async_trait]
impl HttpClient for reqwest::Client {
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError> {
        let request = reqwest::Request::try_from(request)?;
        let response = self.execute(request).await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        let mut out = http::Response::new(body);
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

/// Makes sure the built client returns redirect responses instead of following them.
pub fn without_redirects(builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
    builder.redirect(reqwest::redirect::Policy::none())
}

/// Conversion into the transport of a generated client.
pub trait IntoHttpClient {
    fn into_http_client(self) -> Result<Arc<dyn HttpClient>, Error>;
}

impl IntoHttpClient for reqwest::ClientBuilder {
    fn into_http_client(self) -> Result<Arc<dyn HttpClient>, Error> {
        Ok(Arc::new(StandardTransport::from_builder(self)?))
    }
}

impl<T: HttpClient> IntoHttpClient for T {
    fn into_http_client(self) -> Result<Arc<dyn HttpClient>, Error> {
        Ok(Arc::new(self))
    }
}

#[derive(Clone)]
pub struct ClientOptions {
    pub tracer: Arc<dyn Tracer>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            tracer: Arc::new(LogTracer),
        }
    }
}

impl ClientOptions {
    pub fn with_tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }
}

/// Makes sure `addr` carries a scheme, defaulting to `https`.
pub fn url_base(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("https://{addr}")
    }
}

/// Builds a call request with the headers every blaze client sends.
pub fn new_http_request(
    url: &str,
    body: Bytes,
    encoding: Encoding,
    version: &str,
) -> Result<http::Request<Bytes>, http::Error> {
    http::Request::builder()
        .method(Method::POST)
        .uri(url)
        .header(header::ACCEPT, encoding.content_type())
        .header(header::CONTENT_TYPE, encoding.content_type())
        .header(BLAZE_VERSION_HEADER, version)
        .body(body)
}

struct Endpoint {
    name: &'static str,
    url: String,
    descriptor: Option<MethodDescriptor>,
}

/// The client half of the protocol for one service and one encoding.
pub struct Client {
    description: &'static ServiceDescription,
    encoding: Encoding,
    transport: Arc<dyn HttpClient>,
    endpoints: Vec<Endpoint>,
    options: ClientOptions,
}

impl Client {
    /// Creates a client for the service described by `description`.
    ///
    /// # Arguments
    /// * `description` - The static description emitted by the generator.
    /// * `encoding` - Encoding used for requests and expected for responses.
    /// * `addr` - Server address. A missing scheme defaults to `https`.
    /// * `transport` - A [`reqwest::ClientBuilder`] or any [`HttpClient`].
    /// * `options` - Client options.
    pub fn new(
        description: &'static ServiceDescription,
        encoding: Encoding,
        addr: &str,
        transport: impl IntoHttpClient,
        options: ClientOptions,
    ) -> Result<Self, Error> {
        let transport = transport.into_http_client()?;
        let schema = match encoding {
            Encoding::Json => Some(
                Schema::from_gzipped(description.file_descriptor)
                    .map_err(|e| Error::internal_with(e, "invalid embedded descriptor"))?,
            ),
            Encoding::Protobuf => None,
        };

        let prefix = format!("{}{}", url_base(addr), description.path_prefix);
        let endpoints = description
            .methods
            .iter()
            .map(|&name| {
                let descriptor = schema
                    .as_ref()
                    .map(|schema| schema.method(description.name, name))
                    .transpose()
                    .map_err(|e| Error::internal_with(e, "invalid embedded descriptor"))?;
                Ok(Endpoint {
                    name,
                    url: format!("{prefix}/{name}"),
                    descriptor,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            description,
            encoding,
            transport,
            endpoints,
            options,
        })
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The URL of the method at `method`, in declaration order.
    pub fn url(&self, method: usize) -> Option<&str> {
        self.endpoints.get(method).map(|e| e.url.as_str())
    }

    /// Performs the call to the method at index `method`.
    pub async fn call<I, O>(&self, ctx: &Context, method: usize, input: &I) -> Result<O, Error>
    where
        I: Message,
        O: Message + Default,
    {
        let endpoint = self.endpoints.get(method).ok_or_else(|| {
            Error::internal(format!(
                "method index {method} out of range for {}",
                self.description.name
            ))
        })?;

        let tracer = &self.options.tracer;
        let span = tracer.start_span(
            &format!("{}/{}", self.description.name, endpoint.name),
            SpanKind::Client,
            ctx.span_context(),
            &[
                ("rpc.service", self.description.name),
                ("rpc.method", endpoint.name),
                ("rpc.encoding", self.encoding.content_type()),
            ],
        );

        let result = self
            .do_request(ctx, endpoint, input)
            .instrument(span.clone())
            .await;
        tracer.end_span(span, result.as_ref().err());
        result
    }

    async fn do_request<I, O>(&self, ctx: &Context, endpoint: &Endpoint, input: &I) -> Result<O, Error>
    where
        I: Message,
        O: Message + Default,
    {
        let body = match (&self.encoding, &endpoint.descriptor) {
            (Encoding::Json, Some(desc)) => {
                codec::encode_json(&desc.input(), input, JsonOptions::default())
                    .map_err(|e| Error::internal_with(e, "failed to marshal json request"))?
            }
            _ => codec::encode_protobuf(input),
        };
        checkpoint(ctx)?;

        let mut request = new_http_request(
            &endpoint.url,
            Bytes::from(body),
            self.encoding,
            self.description.generator_version,
        )
        .map_err(|e| Error::internal_with(e, "could not build request"))?;
        self.options.tracer.inject(ctx, request.headers_mut());

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| Error::internal_with(e, "failed to do request"))?;
        checkpoint(ctx)?;

        if response.status() != StatusCode::OK {
            return Err(error_from_response(
                response.status(),
                response.headers(),
                response.body(),
            ));
        }

        let output = match (&self.encoding, &endpoint.descriptor) {
            (Encoding::Json, Some(desc)) => codec::decode_json(&desc.output(), response.body())
                .map_err(|e| Error::internal_with(e, "failed to unmarshal json response"))?,
            _ => codec::decode_protobuf(response.body())
                .map_err(|e| Error::internal_with(e, "failed to unmarshal proto response"))?,
        };
        checkpoint(ctx)?;

        Ok(output)
    }
}
