// Code generated by protoc-gen-blaze v0.1.0. DO NOT EDIT.
// source: echo.proto

// Package echo is a generated blaze stub package.
// This code was generated with protoc-gen-blaze v0.1.0.
//
// Echo protocol used by the blaze integration tests.
//
// It is generated from these files:
//     echo.proto

// =====================
// EchoService Interface
// =====================

/// EchoService echoes messages back to the caller.
///
/// Returning `Ok(None)` is answered with an `Internal` error.
#[::blaze::async_trait]
pub trait EchoService: Send + Sync + 'static {
    /// UnaryEcho returns the request message.
    async fn unary_echo(&self, ctx: ::blaze::Context, input: EchoRequest) -> ::blaze::Result<Option<EchoResponse>>;
}

pub const ECHO_SERVICE_PATH_PREFIX: &str = "/echo";

pub static ECHO_SERVICE_DESCRIPTION: ::blaze::ServiceDescription = ::blaze::ServiceDescription {
    name: "echo.EchoService",
    path_prefix: ECHO_SERVICE_PATH_PREFIX,
    methods: &["UnaryEcho"],
    generator_version: "v0.1.0",
    file_descriptor: BLAZE_FILE_DESCRIPTOR_08134AEA513E0001E92077A607EEB72D_0,
};

// ===========================
// EchoService Protobuf Client
// ===========================

/// Calls a [`EchoService`] server with protobuf bodies.
pub struct EchoServiceProtobufClient {
    client: ::blaze::client::Client,
}

impl EchoServiceProtobufClient {
    /// Creates a client for the server at `addr`.
    ///
    /// A `reqwest::ClientBuilder` transport is built with redirects disabled; any other
    /// [`::blaze::client::HttpClient`] is used as is.
    pub fn new(
        addr: &str,
        transport: impl ::blaze::client::IntoHttpClient,
        options: ::blaze::client::ClientOptions,
    ) -> ::blaze::Result<Self> {
        let client = ::blaze::client::Client::new(
            &ECHO_SERVICE_DESCRIPTION,
            ::blaze::codec::Encoding::Protobuf,
            addr,
            transport,
            options,
        )?;
        Ok(Self { client })
    }
}

#[::blaze::async_trait]
impl EchoService for EchoServiceProtobufClient {
    async fn unary_echo(&self, ctx: ::blaze::Context, input: EchoRequest) -> ::blaze::Result<Option<EchoResponse>> {
        self.client.call(&ctx, 0, &input).await.map(Some)
    }
}

// =======================
// EchoService JSON Client
// =======================

/// Calls a [`EchoService`] server with JSON bodies.
pub struct EchoServiceJsonClient {
    client: ::blaze::client::Client,
}

impl EchoServiceJsonClient {
    /// Creates a client for the server at `addr`.
    ///
    /// A `reqwest::ClientBuilder` transport is built with redirects disabled; any other
    /// [`::blaze::client::HttpClient`] is used as is.
    pub fn new(
        addr: &str,
        transport: impl ::blaze::client::IntoHttpClient,
        options: ::blaze::client::ClientOptions,
    ) -> ::blaze::Result<Self> {
        let client = ::blaze::client::Client::new(
            &ECHO_SERVICE_DESCRIPTION,
            ::blaze::codec::Encoding::Json,
            addr,
            transport,
            options,
        )?;
        Ok(Self { client })
    }
}

#[::blaze::async_trait]
impl EchoService for EchoServiceJsonClient {
    async fn unary_echo(&self, ctx: ::blaze::Context, input: EchoRequest) -> ::blaze::Result<Option<EchoResponse>> {
        self.client.call(&ctx, 0, &input).await.map(Some)
    }
}

// ===================
// EchoService Service
// ===================

/// Serves a [`EchoService`] implementation under [`ECHO_SERVICE_PATH_PREFIX`].
pub struct EchoServiceServer<T: EchoService> {
    service: T,
    core: ::blaze::server::ServerCore,
}

impl<T: EchoService> EchoServiceServer<T> {
    pub fn new(service: T, options: ::blaze::server::ServiceOptions) -> ::blaze::Result<Self> {
        let core = ::blaze::server::ServerCore::new(&ECHO_SERVICE_DESCRIPTION, options)?;
        Ok(Self { service, core })
    }

    async fn serve_unary_echo(
        &self,
        request: ::blaze::http::Request<::blaze::bytes::Bytes>,
        response: &mut dyn ::blaze::server::ResponseWriter,
    ) {
        let service = &self.service;
        self.core
            .handle(0, request, response, move |ctx, input: EchoRequest| async move {
                service.unary_echo(ctx, input).await
            })
            .await;
    }
}

#[::blaze::async_trait]
impl<T: EchoService> ::blaze::server::Service for EchoServiceServer<T> {
    fn mount_path(&self) -> &'static str {
        ECHO_SERVICE_PATH_PREFIX
    }

    async fn serve(
        &self,
        request: ::blaze::http::Request<::blaze::bytes::Bytes>,
        response: &mut dyn ::blaze::server::ResponseWriter,
    ) {
        match self.core.route(&request) {
            Some(0) => self.serve_unary_echo(request, response).await,
            _ => self.core.write_bad_route(&request, response).await,
        }
    }
}

const BLAZE_FILE_DESCRIPTOR_08134AEA513E0001E92077A607EEB72D_0: &[u8] = &[
    // 190 bytes of a gzipped FileDescriptorSet
    0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0xe3, 0x9a, 0xcb, 0xc4, 0xc5, 0x95,
    0x9a, 0x9c, 0x91, 0xaf, 0x57, 0x50, 0x94, 0x5f, 0x92, 0x2f, 0xc4, 0x02, 0x62, 0x2b, 0xb9, 0x73,
    0x71, 0xbb, 0x02, 0xe9, 0xa0, 0xd4, 0xc2, 0xd2, 0xd4, 0xe2, 0x12, 0x21, 0x09, 0x2e, 0xf6, 0xdc,
    0xd4, 0xe2, 0xe2, 0xc4, 0xf4, 0x54, 0x09, 0x46, 0x05, 0x46, 0x0d, 0xce, 0x20, 0x18, 0x57, 0x48,
    0x8e, 0x8b, 0xa5, 0x24, 0x3f, 0x2f, 0x55, 0x82, 0x09, 0x28, 0xcc, 0x67, 0xc4, 0xa5, 0x07, 0x36,
    0x29, 0x04, 0x28, 0x12, 0x04, 0x16, 0x57, 0xf2, 0xe0, 0xe2, 0x81, 0x18, 0x54, 0x5c, 0x90, 0x9f,
    0x57, 0x9c, 0x4a, 0xbe, 0x49, 0x5a, 0xda, 0x5c, 0x2c, 0x20, 0x9e, 0x90, 0x08, 0x97, 0x40, 0x88,
    0xbf, 0x9f, 0x6b, 0x7c, 0xa8, 0x5f, 0x70, 0x80, 0xab, 0xb3, 0xa7, 0x9b, 0xa7, 0xab, 0x8b, 0x00,
    0x83, 0x10, 0x2f, 0x17, 0x27, 0x58, 0xd4, 0xc7, 0x3f, 0xd4, 0x45, 0x80, 0xd1, 0xc8, 0x11, 0xe2,
    0xfe, 0xe0, 0xd4, 0xa2, 0xb2, 0xcc, 0xe4, 0x54, 0x21, 0x23, 0x2e, 0xce, 0xd0, 0xbc, 0xc4, 0xa2,
    0x4a, 0x90, 0x98, 0x90, 0x20, 0xc4, 0x68, 0x24, 0xff, 0x49, 0x09, 0x21, 0x0b, 0x41, 0x5c, 0x9a,
    0xc4, 0x06, 0x0e, 0x0f, 0x63, 0x00, 0x59, 0xdc, 0x8d, 0x56, 0x20, 0x01, 0x00, 0x00,
];
