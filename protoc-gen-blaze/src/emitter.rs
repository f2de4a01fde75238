//! # Service Code Emitter
//!
//! Turns one proto file into one generated Rust source unit. The unit is meant to be
//! `include!`d into the module holding the `prost` types of the same package, so it refers
//! to messages of its own package by their bare names.
//!
//! Emission happens in fixed passes:
//!
//! 1. Header comments, plus a package comment block on the first file of a run.
//! 2. `use` lines for the foreign packages method signatures refer to, and `pub use` lines
//!    forwarding the services of public imports.
//! 3. Per service: the interface trait, its `blaze::ServiceDescription` static, the protobuf
//!    and JSON clients, and the server.
//! 4. The compressed file descriptor.
//!
//! The accumulated text is then parsed with `syn`. Output that does not parse aborts the run.
use crate::descriptor::{byte_lines, embedded_descriptor};
use crate::generator::VERSION;
use crate::names::{ServiceNames, snake_ident};
use crate::resolver::Resolver;
use prost_reflect::{FileDescriptor, MethodDescriptor, ServiceDescriptor};
use prost_types::compiler::code_generator_response::File;
use std::collections::BTreeSet;
use std::io;

const FILE_SYNTAX_PATH: i32 = 12;
const FILE_PACKAGE_PATH: i32 = 2;
const FILE_SERVICE_PATH: i32 = 6;
const SERVICE_METHOD_PATH: i32 = 2;

#[derive(thiserror::Error, Debug)]
pub enum EmitError {
    #[error("{file}: generated source is not valid Rust: {source}")]
    InvalidSource {
        file: String,
        #[source]
        source: syn::Error,
    },
    #[error("{file}: failed to compress file descriptor: {source}")]
    Descriptor {
        file: String,
        #[source]
        source: io::Error,
    },
    #[error("streaming method {0} is not supported")]
    StreamingMethod(String),
}

/// Line-oriented source accumulator.
#[derive(Debug, Default)]
struct Printer {
    buf: String,
    indent: usize,
}

impl Printer {
    fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.indent {
                self.buf.push_str("    ");
            }
            self.buf.push_str(text);
        }
        self.buf.push('\n');
    }

    fn blank(&mut self) {
        self.buf.push('\n');
    }

    fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.indent += 1;
    }

    fn close(&mut self, text: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(text);
    }

    fn take(&mut self) -> String {
        self.indent = 0;
        std::mem::take(&mut self.buf)
    }
}

/// A method with its resolved Rust names.
struct ResolvedMethod {
    index: usize,
    name: String,
    ident: String,
    input: String,
    output: String,
    comments: Option<String>,
}

pub struct Emitter<'a> {
    resolver: &'a Resolver,
    files_hash: String,
    files_handled: usize,
    imported: BTreeSet<String>,
    forwarded: BTreeSet<String>,
    p: Printer,
}

impl<'a> Emitter<'a> {
    /// # Arguments
    /// * `resolver` - Names resolved for the whole run.
    /// * `files_hash` - Hash of the generated file names, used to name descriptor constants.
    pub fn new(resolver: &'a Resolver, files_hash: String) -> Self {
        Self {
            resolver,
            files_hash,
            files_handled: 0,
            imported: BTreeSet::new(),
            forwarded: BTreeSet::new(),
            p: Printer::default(),
        }
    }

    /// Generates the unit of `file`, or nothing if it declares no service.
    ///
    /// Files must be emitted in request order: the first one carries the package comment,
    /// and `use` lines already emitted by an earlier file of the run are not repeated, since
    /// all units of a package share one module.
    pub fn emit(&mut self, file: &FileDescriptor) -> Result<Option<File>, EmitError> {
        if file.services().next().is_none() {
            tracing::debug!(file = file.name(), "no services, skipping");
            return Ok(None);
        }

        let descriptor_const = format!(
            "BLAZE_FILE_DESCRIPTOR_{}_{}",
            self.files_hash.to_uppercase(),
            self.files_handled
        );

        let emitted = self.emit_passes(file, &descriptor_const);
        let content = self.p.take();
        emitted?;

        validate(file.name(), &content)?;
        self.files_handled += 1;

        Ok(Some(File {
            name: Some(self.resolver.output_file_name(file)),
            content: Some(content),
            ..Default::default()
        }))
    }

    fn emit_passes(&mut self, file: &FileDescriptor, descriptor_const: &str) -> Result<(), EmitError> {
        self.header(file);
        self.imports(file);
        for service in file.services() {
            let methods = self.methods(file, &service)?;
            self.service(file, &service, &methods, descriptor_const);
        }
        self.file_descriptor(file, descriptor_const)
    }

    fn methods(
        &self,
        file: &FileDescriptor,
        service: &ServiceDescriptor,
    ) -> Result<Vec<ResolvedMethod>, EmitError> {
        service
            .methods()
            .map(|method| self.method(file, service, &method))
            .collect()
    }

    fn method(
        &self,
        file: &FileDescriptor,
        service: &ServiceDescriptor,
        method: &MethodDescriptor,
    ) -> Result<ResolvedMethod, EmitError> {
        if method.is_client_streaming() || method.is_server_streaming() {
            return Err(EmitError::StreamingMethod(method.full_name().to_string()));
        }
        let path = [
            FILE_SERVICE_PATH,
            index_path(service.index()),
            SERVICE_METHOD_PATH,
            index_path(method.index()),
        ];
        Ok(ResolvedMethod {
            index: method.index(),
            name: method.name().to_string(),
            ident: snake_ident(method.name()),
            input: self.resolver.type_reference(&method.input()).to_string(),
            output: self.resolver.type_reference(&method.output()).to_string(),
            comments: leading_comments(file, &path),
        })
    }

    fn header(&mut self, file: &FileDescriptor) {
        self.p.line(format!(
            "// Code generated by protoc-gen-blaze {VERSION}. DO NOT EDIT."
        ));
        self.p.line(format!("// source: {}", file.name()));
        self.p.blank();

        if self.files_handled > 0 {
            return;
        }
        self.p.line(format!(
            "// Package {} is a generated blaze stub package.",
            self.resolver.gen_package()
        ));
        self.p.line(format!(
            "// This code was generated with protoc-gen-blaze {VERSION}."
        ));
        self.p.line("//");
        let comments = leading_comments(file, &[FILE_SYNTAX_PATH])
            .or_else(|| leading_comments(file, &[FILE_PACKAGE_PATH]));
        if let Some(comments) = comments {
            for line in comment_lines(&comments) {
                self.p.line(format!("// {line}").trim_end());
            }
            self.p.line("//");
        }
        self.p.line("// It is generated from these files:");
        let names: Vec<String> = self
            .resolver
            .gen_files()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        for name in names {
            self.p.line(format!("//     {name}"));
        }
        self.p.blank();
    }

    fn imports(&mut self, file: &FileDescriptor) {
        let mut any = false;
        for import in self.resolver.imports(file) {
            if !self.imported.insert(import.alias.clone()) {
                continue;
            }
            if import.path.rsplit("::").next() == Some(import.alias.as_str()) {
                self.p.line(format!("use {};", import.path));
            } else {
                self.p.line(format!("use {} as {};", import.path, import.alias));
            }
            any = true;
        }
        if any {
            self.p.blank();
        }

        for forward in self.resolver.public_forwards(file) {
            if !self.forwarded.insert(forward.file.clone()) {
                continue;
            }
            self.p.line(format!("// Services of public import {}.", forward.file));
            self.p.line(format!(
                "pub use {}::{{{}}};",
                forward.path,
                forward.symbols.join(", ")
            ));
            self.p.blank();
        }
    }

    fn section(&mut self, title: &str) {
        let rule = "=".repeat(title.len());
        self.p.line(format!("// {rule}"));
        self.p.line(format!("// {title}"));
        self.p.line(format!("// {rule}"));
        self.p.blank();
    }

    fn doc(&mut self, comments: Option<&str>) {
        let Some(comments) = comments else {
            return;
        };
        for line in comment_lines(comments) {
            self.p.line(format!("/// {line}").trim_end());
        }
    }

    fn service(
        &mut self,
        file: &FileDescriptor,
        service: &ServiceDescriptor,
        methods: &[ResolvedMethod],
        descriptor_const: &str,
    ) {
        let names = ServiceNames::new(service.name());
        let comments = leading_comments(file, &[FILE_SERVICE_PATH, index_path(service.index())]);

        self.section(&format!("{} Interface", names.service));
        self.interface(&names, comments.as_deref(), methods);
        self.description(service, &names, methods, descriptor_const);

        self.section(&format!("{} Protobuf Client", names.service));
        self.client(&names, &names.protobuf_client, "Protobuf", methods);

        self.section(&format!("{} JSON Client", names.service));
        self.client(&names, &names.json_client, "Json", methods);

        self.section(&format!("{} Service", names.service));
        self.server(&names, methods);
    }

    fn signature(method: &ResolvedMethod) -> String {
        format!(
            "async fn {}(&self, ctx: ::blaze::Context, input: {}) -> ::blaze::Result<Option<{}>>",
            method.ident, method.input, method.output
        )
    }

    fn interface(&mut self, names: &ServiceNames, comments: Option<&str>, methods: &[ResolvedMethod]) {
        self.doc(comments);
        if comments.is_some() {
            self.p.line("///");
        }
        self.p.line("/// Returning `Ok(None)` is answered with an `Internal` error.");
        self.p.line("#[::blaze::async_trait]");
        self.p.open(format!("pub trait {}: Send + Sync + 'static {{", names.service));
        for (i, method) in methods.iter().enumerate() {
            if i > 0 {
                self.p.blank();
            }
            self.doc(method.comments.as_deref());
            self.p.line(format!("{};", Self::signature(method)));
        }
        self.p.close("}");
        self.p.blank();
    }

    fn description(
        &mut self,
        service: &ServiceDescriptor,
        names: &ServiceNames,
        methods: &[ResolvedMethod],
        descriptor_const: &str,
    ) {
        self.p.line(format!(
            "pub const {}: &str = {:?};",
            names.path_prefix,
            self.resolver.mount_path()
        ));
        self.p.blank();

        let method_names: Vec<String> = methods.iter().map(|m| format!("{:?}", m.name)).collect();
        self.p.open(format!(
            "pub static {}: ::blaze::ServiceDescription = ::blaze::ServiceDescription {{",
            names.description
        ));
        self.p.line(format!("name: {:?},", service.full_name()));
        self.p.line(format!("path_prefix: {},", names.path_prefix));
        self.p.line(format!("methods: &[{}],", method_names.join(", ")));
        self.p.line(format!("generator_version: {VERSION:?},"));
        self.p.line(format!("file_descriptor: {descriptor_const},"));
        self.p.close("};");
        self.p.blank();
    }

    fn client(&mut self, names: &ServiceNames, client: &str, encoding: &str, methods: &[ResolvedMethod]) {
        let wire = match encoding {
            "Json" => "JSON",
            _ => "protobuf",
        };
        self.p.line(format!(
            "/// Calls a [`{}`] server with {wire} bodies.",
            names.service
        ));
        self.p.open(format!("pub struct {client} {{"));
        self.p.line("client: ::blaze::client::Client,");
        self.p.close("}");
        self.p.blank();

        self.p.open(format!("impl {client} {{"));
        self.p.line("/// Creates a client for the server at `addr`.");
        self.p.line("///");
        self.p.line(
            "/// A `reqwest::ClientBuilder` transport is built with redirects disabled; any other",
        );
        self.p.line("/// [`::blaze::client::HttpClient`] is used as is.");
        self.p.open("pub fn new(");
        self.p.line("addr: &str,");
        self.p.line("transport: impl ::blaze::client::IntoHttpClient,");
        self.p.line("options: ::blaze::client::ClientOptions,");
        self.p.close(") -> ::blaze::Result<Self> {");
        self.p.indent += 1;
        self.p.open("let client = ::blaze::client::Client::new(");
        self.p.line(format!("&{},", names.description));
        self.p.line(format!("::blaze::codec::Encoding::{encoding},"));
        self.p.line("addr,");
        self.p.line("transport,");
        self.p.line("options,");
        self.p.close(")?;");
        self.p.line("Ok(Self { client })");
        self.p.close("}");
        self.p.close("}");
        self.p.blank();

        self.p.line("#[::blaze::async_trait]");
        self.p.open(format!("impl {} for {client} {{", names.service));
        for (i, method) in methods.iter().enumerate() {
            if i > 0 {
                self.p.blank();
            }
            self.p.open(format!("{} {{", Self::signature(method)));
            self.p.line(format!(
                "self.client.call(&ctx, {}, &input).await.map(Some)",
                method.index
            ));
            self.p.close("}");
        }
        self.p.close("}");
        self.p.blank();
    }

    fn server(&mut self, names: &ServiceNames, methods: &[ResolvedMethod]) {
        let server = &names.server;
        let service = &names.service;

        self.p.line(format!(
            "/// Serves a [`{service}`] implementation under [`{}`].",
            names.path_prefix
        ));
        self.p.open(format!("pub struct {server}<T: {service}> {{"));
        self.p.line("service: T,");
        self.p.line("core: ::blaze::server::ServerCore,");
        self.p.close("}");
        self.p.blank();

        self.p.open(format!("impl<T: {service}> {server}<T> {{"));
        self.p.open(
            "pub fn new(service: T, options: ::blaze::server::ServiceOptions) -> ::blaze::Result<Self> {",
        );
        self.p.line(format!(
            "let core = ::blaze::server::ServerCore::new(&{}, options)?;",
            names.description
        ));
        self.p.line("Ok(Self { service, core })");
        self.p.close("}");

        for method in methods {
            self.p.blank();
            self.p.open(format!("async fn serve_{}(", method.ident.trim_start_matches("r#")));
            self.p.line("&self,");
            self.p.line("request: ::blaze::http::Request<::blaze::bytes::Bytes>,");
            self.p.line("response: &mut dyn ::blaze::server::ResponseWriter,");
            self.p.close(") {");
            self.p.indent += 1;
            self.p.line("let service = &self.service;");
            self.p.open("self.core");
            self.p.open(format!(
                ".handle({}, request, response, move |ctx, input: {}| async move {{",
                method.index, method.input
            ));
            self.p.line(format!("service.{}(ctx, input).await", method.ident));
            self.p.close("})");
            self.p.line(".await;");
            self.p.indent -= 1;
            self.p.close("}");
        }
        self.p.close("}");
        self.p.blank();

        self.p.line("#[::blaze::async_trait]");
        self.p.open(format!("impl<T: {service}> ::blaze::server::Service for {server}<T> {{"));
        self.p.open("fn mount_path(&self) -> &'static str {");
        self.p.line(&names.path_prefix);
        self.p.close("}");
        self.p.blank();
        self.p.open("async fn serve(");
        self.p.line("&self,");
        self.p.line("request: ::blaze::http::Request<::blaze::bytes::Bytes>,");
        self.p.line("response: &mut dyn ::blaze::server::ResponseWriter,");
        self.p.close(") {");
        self.p.indent += 1;
        self.p.open("match self.core.route(&request) {");
        for method in methods {
            self.p.line(format!(
                "Some({}) => self.serve_{}(request, response).await,",
                method.index,
                method.ident.trim_start_matches("r#")
            ));
        }
        self.p.line("_ => self.core.write_bad_route(&request, response).await,");
        self.p.close("}");
        self.p.close("}");
        self.p.close("}");
        self.p.blank();
    }

    fn file_descriptor(&mut self, file: &FileDescriptor, name: &str) -> Result<(), EmitError> {
        let bytes = embedded_descriptor(file).map_err(|source| EmitError::Descriptor {
            file: file.name().to_string(),
            source,
        })?;

        self.p.open(format!("const {name}: &[u8] = &["));
        self.p.line(format!(
            "// {} bytes of a gzipped FileDescriptorSet",
            bytes.len()
        ));
        for line in byte_lines(&bytes) {
            self.p.line(line);
        }
        self.p.close("];");
        Ok(())
    }
}

fn index_path(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

/// The leading comments attached to the element at `path`, if any.
fn leading_comments(file: &FileDescriptor, path: &[i32]) -> Option<String> {
    file.file_descriptor_proto()
        .source_code_info
        .as_ref()?
        .location
        .iter()
        .find(|location| location.path == path)
        .and_then(|location| location.leading_comments.clone())
        .filter(|comments| !comments.trim().is_empty())
}

/// Comment lines with the single space `protoc` keeps after `//` removed.
fn comment_lines(comments: &str) -> impl Iterator<Item = &str> {
    comments
        .trim_end_matches('\n')
        .split('\n')
        .map(|line| line.strip_prefix(' ').unwrap_or(line))
}

/// Parses the generated source, reporting it with line numbers when it is not valid Rust.
fn validate(file: &str, content: &str) -> Result<(), EmitError> {
    syn::parse_file(content).map(drop).map_err(|source| {
        let numbered: Vec<String> = content
            .lines()
            .enumerate()
            .map(|(i, line)| format!("{:5}\t{line}", i + 1))
            .collect();
        tracing::error!(file, error = %source, "invalid generated source:\n{}", numbered.join("\n"));
        EmitError::InvalidSource {
            file: file.to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use crate::test_support::{file, message, pool, service};
    use pretty_assertions::assert_eq;
    use prost_types::source_code_info::Location;
    use prost_types::{FileDescriptorProto, SourceCodeInfo};

    fn location(path: &[i32], comments: &str) -> Location {
        Location {
            path: path.to_vec(),
            leading_comments: Some(comments.to_string()),
            ..Default::default()
        }
    }

    fn echo_file() -> FileDescriptorProto {
        let mut proto = file(
            "echo/echo.proto",
            "echo",
            vec![message("EchoRequest", vec![]), message("EchoResponse", vec![])],
            vec![service(
                "EchoService",
                &[
                    ("UnaryEcho", ".echo.EchoRequest", ".echo.EchoResponse"),
                    ("Type", ".echo.EchoRequest", ".echo.EchoResponse"),
                ],
            )],
            &[],
        );
        proto.source_code_info = Some(SourceCodeInfo {
            location: vec![
                location(&[12], " Echo protocol.\n"),
                location(&[6, 0], " Echoes messages back.\n"),
                location(&[6, 0, 2, 0], " Returns the request message.\n"),
            ],
        });
        proto
    }

    fn emit_all(protos: Vec<FileDescriptorProto>, generate: &[&str]) -> Vec<File> {
        let pool = pool(protos);
        let order: Vec<String> = pool.files().map(|f| f.name().to_string()).collect();
        let generate: Vec<String> = generate.iter().map(|s| s.to_string()).collect();
        let resolver = Resolver::new(&pool, &order, &generate, Params::default()).unwrap();
        let mut emitter = Emitter::new(&resolver, "00ff".to_string());
        resolver
            .gen_files()
            .iter()
            .filter_map(|f| emitter.emit(f).unwrap())
            .collect()
    }

    #[test]
    fn test_emits_valid_service_unit() {
        let files = emit_all(vec![echo_file()], &["echo/echo.proto"]);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name(), "echo/echo.blaze.rs");

        let content = files[0].content();
        assert!(content.starts_with(&format!(
            "// Code generated by protoc-gen-blaze {VERSION}. DO NOT EDIT.\n// source: echo/echo.proto\n"
        )));
        assert!(content.contains("// Package echo is a generated blaze stub package."));
        assert!(content.contains("// Echo protocol."));
        assert!(content.contains("//     echo/echo.proto"));
        assert!(content.contains("/// Echoes messages back."));
        assert!(content.contains("    /// Returns the request message."));
        assert!(content.contains(
            "async fn unary_echo(&self, ctx: ::blaze::Context, input: EchoRequest) -> ::blaze::Result<Option<EchoResponse>>;"
        ));
        assert!(content.contains("async fn r#type(&self"));
        assert!(content.contains("pub const ECHO_SERVICE_PATH_PREFIX: &str = \"/echo\";"));
        assert!(content.contains("methods: &[\"UnaryEcho\", \"Type\"],"));
        assert!(content.contains("file_descriptor: BLAZE_FILE_DESCRIPTOR_00FF_0,"));
        assert!(content.contains("pub struct EchoServiceProtobufClient {"));
        assert!(content.contains("::blaze::codec::Encoding::Json,"));
        assert!(content.contains("Some(1) => self.serve_type(request, response).await,"));
        assert!(content.contains("bytes of a gzipped FileDescriptorSet"));
        assert!(!content.contains("\nuse "));

        syn::parse_file(content).unwrap();
    }

    #[test]
    fn test_files_without_services_are_skipped() {
        let files = emit_all(
            vec![
                file("echo/types.proto", "echo", vec![message("Msg", vec![])], vec![], &[]),
                echo_file(),
            ],
            &["echo/types.proto", "echo/echo.proto"],
        );
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name(), "echo/echo.blaze.rs");
    }

    #[test]
    fn test_foreign_types_are_imported_once() {
        let common = file(
            "common/types.proto",
            "common",
            vec![message("Id", vec![message("Part", vec![])])],
            vec![],
            &[],
        );
        let first = file(
            "shop/a.proto",
            "shop",
            vec![message("Item", vec![])],
            vec![service("Items", &[("Get", ".common.Id", ".shop.Item")])],
            &["common/types.proto"],
        );
        let second = file(
            "shop/b.proto",
            "shop",
            vec![],
            vec![service("Parts", &[("Get", ".common.Id.Part", ".common.Id")])],
            &["common/types.proto"],
        );
        let files = emit_all(vec![common, first, second], &["shop/a.proto", "shop/b.proto"]);
        assert_eq!(files.len(), 2);

        let a = files[0].content();
        assert!(a.contains("\nuse crate::common;\n"));
        assert!(a.contains("input: common::Id"));
        assert!(a.contains("// Package shop"));

        let b = files[1].content();
        assert!(!b.contains("use crate::common"));
        assert!(!b.contains("// Package shop"));
        assert!(b.contains("input: common::id::Part"));
        assert!(b.contains("file_descriptor: BLAZE_FILE_DESCRIPTOR_00FF_1,"));
        syn::parse_file(b).unwrap();
    }

    #[test]
    fn test_well_known_types_resolve_to_prost() {
        let empty = file(
            "google/protobuf/empty.proto",
            "google.protobuf",
            vec![message("Empty", vec![])],
            vec![],
            &[],
        );
        let timestamp = file(
            "google/protobuf/timestamp.proto",
            "google.protobuf",
            vec![message("Timestamp", vec![])],
            vec![],
            &[],
        );
        let clock = file(
            "clock/clock.proto",
            "clock",
            vec![],
            vec![service(
                "Clock",
                &[
                    ("Ping", ".google.protobuf.Empty", ".google.protobuf.Empty"),
                    ("Now", ".google.protobuf.Empty", ".google.protobuf.Timestamp"),
                ],
            )],
            &["google/protobuf/empty.proto", "google/protobuf/timestamp.proto"],
        );
        let files = emit_all(vec![empty, timestamp, clock], &["clock/clock.proto"]);

        let content = files[0].content();
        assert!(content.contains(
            "async fn ping(&self, ctx: ::blaze::Context, input: ()) -> ::blaze::Result<Option<()>>;"
        ));
        assert!(content.contains("-> ::blaze::Result<Option<::prost_types::Timestamp>>;"));
        assert!(!content.contains("\nuse "));
        assert!(!content.contains("google_golang_org"));

        syn::parse_file(content).unwrap();
    }

    #[test]
    fn test_streaming_methods_are_rejected() {
        let mut proto = echo_file();
        proto.service[0].method[0].server_streaming = Some(true);
        let pool = pool(vec![proto]);
        let order = vec!["echo/echo.proto".to_string()];
        let resolver = Resolver::new(&pool, &order, &order, Params::default()).unwrap();
        let mut emitter = Emitter::new(&resolver, "00".to_string());

        let err = emitter.emit(&resolver.gen_files()[0]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "streaming method echo.EchoService.UnaryEcho is not supported"
        );
    }

    #[test]
    fn test_validate_reports_invalid_source() {
        let err = validate("broken.proto", "pub fn (").unwrap_err();
        assert!(matches!(err, EmitError::InvalidSource { ref file, .. } if file == "broken.proto"));
    }
}
