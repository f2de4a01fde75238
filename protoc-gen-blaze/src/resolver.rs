//! # Type & Name Resolution
//!
//! Before anything is emitted, the [`Resolver`] decides, deterministically and from the
//! order of the request alone:
//!
//! * the package name shared by every generated file,
//! * a unique alias for the package of every dependency file,
//! * the output file name and import path of every file,
//! * the Rust path of every message referenced by a service method.
//!
//! ## Well-known types
//!
//! Files of the `google.protobuf` package resolve the way `prost-build` compiles them:
//! wrappers and `Empty` become Rust primitives and everything else lives in `::prost_types`.
//! An explicit `M` mapping of such a file turns this off.
//!
//! ## Package options
//!
//! The only standard file option carrying an import path and a package name is
//! `go_package` (`"path;name"` or `"path"`). When any file being generated sets it, all of
//! them must agree on the package name it yields. Otherwise the proto package names must
//! agree.
use crate::names::{
    PackageNameTable, ServiceNames, base_name, clean_identifier, dir_name, rust_path, snake_ident,
    type_ident,
};
use crate::params::{Params, PathsMode};
use prost_reflect::{DescriptorPool, EnumDescriptor, FileDescriptor, MessageDescriptor};
use std::collections::BTreeMap;
use std::fmt;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("files have conflicting go_package settings, must be the same: {0:?} and {1:?}")]
    ConflictingPackageOption(String, String),
    #[error(
        "files have conflicting package names, must be the same or overridden with go_package: {0:?} and {1:?}"
    )]
    ConflictingPackageNames(String, String),
    #[error("could not find file named {0}")]
    FileNotFound(String),
    #[error("no files to generate")]
    NoFilesToGenerate,
}

const WELL_KNOWN_PACKAGE: &str = "google.protobuf";
const WELL_KNOWN_PATH: &str = "::prost_types";

/// Well-known types `prost` maps to Rust types instead of `prost_types` structs.
fn well_known_primitive(full_name: &str) -> Option<&'static str> {
    let primitive = match full_name {
        "google.protobuf.Empty" => "()",
        "google.protobuf.BoolValue" => "bool",
        "google.protobuf.BytesValue" => "::prost::alloc::vec::Vec<u8>",
        "google.protobuf.DoubleValue" => "f64",
        "google.protobuf.FloatValue" => "f32",
        "google.protobuf.Int32Value" => "i32",
        "google.protobuf.Int64Value" => "i64",
        "google.protobuf.StringValue" => "::prost::alloc::string::String",
        "google.protobuf.UInt32Value" => "u32",
        "google.protobuf.UInt64Value" => "u64",
        _ => return None,
    };
    Some(primitive)
}

/// A message or enum a type reference can be resolved for.
#[derive(Debug, Clone)]
pub enum NamedType {
    Message(MessageDescriptor),
    Enum(EnumDescriptor),
}

impl NamedType {
    fn parent_file(&self) -> FileDescriptor {
        match self {
            NamedType::Message(message) => message.parent_file(),
            NamedType::Enum(enum_) => enum_.parent_file(),
        }
    }

    fn parent_message(&self) -> Option<MessageDescriptor> {
        match self {
            NamedType::Message(message) => message.parent_message(),
            NamedType::Enum(enum_) => enum_.parent_message(),
        }
    }

    fn name(&self) -> &str {
        match self {
            NamedType::Message(message) => message.name(),
            NamedType::Enum(enum_) => enum_.name(),
        }
    }

    fn full_name(&self) -> &str {
        match self {
            NamedType::Message(message) => message.full_name(),
            NamedType::Enum(enum_) => enum_.full_name(),
        }
    }
}

impl From<&MessageDescriptor> for NamedType {
    fn from(message: &MessageDescriptor) -> Self {
        NamedType::Message(message.clone())
    }
}

impl From<&EnumDescriptor> for NamedType {
    fn from(enum_: &EnumDescriptor) -> Self {
        NamedType::Enum(enum_.clone())
    }
}

/// A resolved reference to a message or enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeReference {
    /// Alias or absolute path of the home package, when it is not the generated package.
    pub package: Option<String>,
    /// Module names of the enclosing messages, outermost first.
    pub lineage: Vec<String>,
    pub name: String,
}

impl fmt::Display for TypeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(package) = &self.package {
            write!(f, "{package}::")?;
        }
        for module in &self.lineage {
            write!(f, "{module}::")?;
        }
        f.write_str(&self.name)
    }
}

/// A `use` line of a generated file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Import {
    pub path: String,
    pub alias: String,
}

/// Symbols of a public dependency re-exported by a generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicForward {
    /// The `.proto` file the symbols come from.
    pub file: String,
    pub path: String,
    pub symbols: Vec<String>,
}

/// The `go_package`-style option of a file: import path and package name.
fn package_option(file: &FileDescriptor) -> Option<(String, String)> {
    let option = file
        .file_descriptor_proto()
        .options
        .as_ref()
        .and_then(|options| options.go_package.as_deref())
        .filter(|option| !option.is_empty())?;

    let (path, name) = match option.split_once(';') {
        Some((path, name)) => (path, name),
        None => (option, option.rsplit('/').next().unwrap_or(option)),
    };
    Some((path.to_string(), name.to_string()))
}

/// The package name a file would get without an option.
fn implicit_package_name(file: &FileDescriptor) -> String {
    match file.package_name() {
        "" => base_name(file.name()).to_string(),
        package => package.to_string(),
    }
}

/// Picks the package name shared by all generated files.
pub fn deduce_gen_package_name(gen_files: &[FileDescriptor]) -> Result<String, ResolveError> {
    let mut gen_name: Option<String> = None;
    for file in gen_files {
        if let Some((_, name)) = package_option(file) {
            let name = clean_identifier(&name);
            match &gen_name {
                Some(current) if *current != name => {
                    return Err(ResolveError::ConflictingPackageOption(current.clone(), name));
                }
                _ => gen_name = Some(name),
            }
        }
    }
    if let Some(name) = gen_name {
        return Ok(name);
    }

    for file in gen_files {
        let name = clean_identifier(&implicit_package_name(file));
        match &gen_name {
            Some(current) if *current != name => {
                return Err(ResolveError::ConflictingPackageNames(current.clone(), name));
            }
            _ => gen_name = Some(name),
        }
    }
    gen_name.ok_or(ResolveError::NoFilesToGenerate)
}

pub struct Resolver {
    params: Params,
    gen_files: Vec<FileDescriptor>,
    gen_package: String,
    file_aliases: BTreeMap<String, String>,
}

impl Resolver {
    /// Resolves the names of one generation run.
    ///
    /// # Arguments
    /// * `pool` - Every file of the request.
    /// * `file_order` - File names in request order. Aliases are handed out in this order.
    /// * `files_to_generate` - Names of the files to generate.
    /// * `params` - Parsed plugin parameters.
    pub fn new(
        pool: &DescriptorPool,
        file_order: &[String],
        files_to_generate: &[String],
        params: Params,
    ) -> Result<Self, ResolveError> {
        if files_to_generate.is_empty() {
            return Err(ResolveError::NoFilesToGenerate);
        }
        let gen_files = files_to_generate
            .iter()
            .map(|name| {
                pool.get_file_by_name(name)
                    .ok_or_else(|| ResolveError::FileNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let gen_package = deduce_gen_package_name(&gen_files)?;

        let mut names = PackageNameTable::with_reserved();
        names.register(&gen_package);
        let mut file_aliases = BTreeMap::new();
        for name in file_order {
            let file = pool
                .get_file_by_name(name)
                .ok_or_else(|| ResolveError::FileNotFound(name.clone()))?;
            let alias = if gen_files.contains(&file) {
                gen_package.clone()
            } else {
                names.register(&clean_identifier(&implicit_package_name(&file)))
            };
            tracing::debug!(file = name.as_str(), alias = alias.as_str(), "package alias");
            file_aliases.insert(name.clone(), alias);
        }

        Ok(Self {
            params,
            gen_files,
            gen_package,
            file_aliases,
        })
    }

    pub fn gen_files(&self) -> &[FileDescriptor] {
        &self.gen_files
    }

    pub fn gen_package(&self) -> &str {
        &self.gen_package
    }

    /// Path prefix services of the generated package are mounted under.
    pub fn mount_path(&self) -> String {
        format!("/{}", self.gen_package.trim_matches('_').replace('_', "/"))
    }

    /// The alias of the package `file` belongs to.
    pub fn alias(&self, file: &FileDescriptor) -> &str {
        self.file_aliases
            .get(file.name())
            .map(String::as_str)
            .unwrap_or(&self.gen_package)
    }

    /// Name of the file generated for `file`.
    pub fn output_file_name(&self, file: &FileDescriptor) -> String {
        let stem = file.name().strip_suffix(".proto").unwrap_or(file.name());
        let name = format!("{stem}.blaze.rs");

        match (self.params.paths, package_option(file)) {
            (PathsMode::Import, Some((path, _))) if !path.is_empty() => {
                format!("{}/{}.blaze.rs", path.trim_end_matches('/'), base_name(file.name()))
            }
            _ => name,
        }
    }

    /// Whether `file` holds well-known types resolved into `::prost_types`.
    fn is_well_known(&self, file: &FileDescriptor) -> bool {
        file.package_name() == WELL_KNOWN_PACKAGE
            && !self.params.import_map.contains_key(file.name())
    }

    /// The Rust path the types of `file` are imported from.
    ///
    /// An explicit mapping wins over the package option, which wins over the directory of
    /// the output file. The configured prefix is prepended in every case, except for
    /// well-known types.
    pub fn import_path(&self, file: &FileDescriptor) -> String {
        if self.is_well_known(file) {
            return WELL_KNOWN_PATH.to_string();
        }
        let path = match self.params.import_map.get(file.name()) {
            Some(mapped) => mapped.clone(),
            None => match package_option(file) {
                Some((path, _)) if !path.is_empty() => path,
                _ => dir_name(&self.output_file_name(file)).to_string(),
            },
        };
        rust_path(&format!("{}{path}", self.params.import_prefix))
    }

    /// Resolves the Rust name of a message or enum as seen from the generated package.
    pub fn type_reference(&self, ty: impl Into<NamedType>) -> TypeReference {
        let ty = ty.into();
        let file = ty.parent_file();
        let package = if self.is_well_known(&file) {
            if let Some(primitive) = well_known_primitive(ty.full_name()) {
                return TypeReference {
                    package: None,
                    lineage: Vec::new(),
                    name: primitive.to_string(),
                };
            }
            Some(WELL_KNOWN_PATH.to_string())
        } else {
            let alias = self.alias(&file);
            (alias != self.gen_package).then(|| alias.to_string())
        };

        let mut lineage = Vec::new();
        let mut parent = ty.parent_message();
        while let Some(outer) = parent {
            lineage.push(snake_ident(outer.name()));
            parent = outer.parent_message();
        }
        lineage.reverse();

        TypeReference {
            package,
            lineage,
            name: type_ident(ty.name()),
        }
    }

    /// The `use` lines `file` needs: one per foreign package used by a method signature.
    pub fn imports(&self, file: &FileDescriptor) -> Vec<Import> {
        let mut imports = Vec::new();
        for service in file.services() {
            for method in service.methods() {
                for message in [method.input(), method.output()] {
                    let home = message.parent_file();
                    let alias = self.alias(&home);
                    if alias == self.gen_package || self.is_well_known(&home) {
                        continue;
                    }
                    let import = Import {
                        path: self.import_path(&home),
                        alias: alias.to_string(),
                    };
                    if !imports.contains(&import) {
                        imports.push(import);
                    }
                }
            }
        }
        imports.sort();
        imports
    }

    /// Service symbols re-exported on behalf of the public imports of `file`.
    pub fn public_forwards(&self, file: &FileDescriptor) -> Vec<PublicForward> {
        let public = &file.file_descriptor_proto().public_dependency;
        file.dependencies()
            .enumerate()
            .filter(|(i, _)| public.iter().any(|&p| usize::try_from(p) == Ok(*i)))
            .map(|(_, dep)| dep)
            .filter(|dep| self.alias(dep) != self.gen_package)
            .filter(|dep| dep.services().next().is_some())
            .map(|dep| PublicForward {
                file: dep.name().to_string(),
                path: self.import_path(&dep),
                symbols: dep
                    .services()
                    .flat_map(|service| ServiceNames::new(service.name()).symbols())
                    .collect(),
            })
            .collect()
    }
}
