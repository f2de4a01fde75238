//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide a blaze service and its message
//! types for integration testing the `blaze` runtime. It is not intended for production use.
//!
//! The messages are written the way `prost-build` generates them for `proto/echo.proto`, and
//! `src/echo.blaze.rs` is the checked-in output of `protoc-gen-blaze` for the same file.

pub mod pb {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct EchoRequest {
        #[prost(string, tag = "1")]
        pub message: ::prost::alloc::string::String,
        #[prost(enumeration = "Tone", tag = "2")]
        pub tone: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct EchoResponse {
        #[prost(string, tag = "1")]
        pub message: ::prost::alloc::string::String,
        #[prost(enumeration = "Tone", tag = "2")]
        pub tone: i32,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Tone {
        Unspecified = 0,
        Loud = 1,
    }

    include!("echo.blaze.rs");
}

pub use pb::{
    ECHO_SERVICE_DESCRIPTION, EchoService, EchoServiceJsonClient, EchoServiceProtobufClient,
    EchoServiceServer,
};
