//! # Names
//!
//! Identifier helpers shared by the resolver and the emitter, and the [`PackageNameTable`]
//! that hands out collision-free aliases for imported packages.
//!
//! Type and module names follow the conventions of `prost-build`, so that generated code
//! refers to the message types `prost` generated for the same files.
use heck::{ToShoutySnakeCase, ToSnakeCase, ToUpperCamelCase};
use std::collections::BTreeSet;

/// Names generated code may rely on, registered before any package alias.
pub const RESERVED_NAMES: &[&str] = &[
    "alloc", "blaze", "bytes", "core", "crate", "http", "prost", "self", "std", "super",
];

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "crate",
    "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl",
    "in", "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "self", "Self", "static", "struct", "super", "trait", "true", "try", "type",
    "typeof", "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

pub fn is_keyword(ident: &str) -> bool {
    KEYWORDS.contains(&ident)
}

/// Assigns unique aliases to package names, in first-seen order.
///
/// The first registration of `name` gets `name`; later ones get `name1`, `name2`, and so on,
/// skipping any alias already taken.
#[derive(Debug, Default)]
pub struct PackageNameTable {
    in_use: BTreeSet<String>,
}

impl PackageNameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with [`RESERVED_NAMES`] already taken.
    pub fn with_reserved() -> Self {
        let mut table = Self::new();
        for name in RESERVED_NAMES {
            table.register(name);
        }
        table
    }

    pub fn register(&mut self, name: &str) -> String {
        let mut alias = name.to_string();
        let mut i = 1;
        while self.in_use.contains(&alias) {
            alias = format!("{name}{i}");
            i += 1;
        }
        self.in_use.insert(alias.clone());
        alias
    }
}

/// Turns an arbitrary string into a lower case identifier.
///
/// Characters that cannot appear in an identifier become `_`, a leading digit gets a `_`
/// prefix and keywords get a `_` suffix.
pub fn clean_identifier(s: &str) -> String {
    let mut ident: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if is_keyword(&ident) {
        ident.push('_');
    }
    ident
}

/// The file name of `path` without directory and extension.
pub fn base_name(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

/// The directory part of `path`, or an empty string.
pub fn dir_name(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or_default()
}

/// A type name as `prost` spells it.
pub fn type_ident(name: &str) -> String {
    let ident = name.to_upper_camel_case();
    if ident == "Self" {
        return format!("{ident}_");
    }
    ident
}

/// A module, field or method name as `prost` spells it.
pub fn snake_ident(name: &str) -> String {
    let ident = name.to_snake_case();
    match ident.as_str() {
        "crate" | "self" | "super" => format!("{ident}_"),
        _ if is_keyword(&ident) => format!("r#{ident}"),
        _ => ident,
    }
}

pub fn const_ident(name: &str) -> String {
    name.to_shouty_snake_case()
}

/// The Rust items generated for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNames {
    pub service: String,
    pub protobuf_client: String,
    pub json_client: String,
    pub server: String,
    pub path_prefix: String,
    pub description: String,
}

impl ServiceNames {
    pub fn new(service: &str) -> Self {
        let service = type_ident(service);
        let shouty = const_ident(&service);
        Self {
            protobuf_client: format!("{service}ProtobufClient"),
            json_client: format!("{service}JsonClient"),
            server: format!("{service}Server"),
            path_prefix: format!("{shouty}_PATH_PREFIX"),
            description: format!("{shouty}_DESCRIPTION"),
            service,
        }
    }

    /// Every public item, in emission order.
    pub fn symbols(&self) -> Vec<String> {
        vec![
            self.service.clone(),
            self.protobuf_client.clone(),
            self.json_client.clone(),
            self.server.clone(),
            self.path_prefix.clone(),
            self.description.clone(),
        ]
    }
}

/// Converts an import path into a Rust module path.
///
/// Segments may be separated by `/` or `::`. Relative paths are resolved from the crate root,
/// so `common/types` becomes `crate::common::types`, while `::prost_types` and
/// `super::common` are kept as written.
pub fn rust_path(import_path: &str) -> String {
    let trimmed = import_path.trim_matches('/');
    let absolute = trimmed.starts_with("::");

    let segments: Vec<String> = trimmed
        .split("::")
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .map(|segment| match segment {
            "crate" | "self" | "super" => segment.to_string(),
            other => clean_identifier(other),
        })
        .collect();

    let path = segments.join("::");
    match segments.first().map(String::as_str) {
        None => "crate".to_string(),
        _ if absolute => format!("::{path}"),
        Some("crate" | "self" | "super") => path,
        Some(_) => format!("crate::{path}"),
    }
}
