//! Orchestrates one plugin invocation: parameters, name resolution, then emission of every
//! file in request order. Generation is all-or-nothing: the first error aborts the run.
use crate::descriptor::files_hash;
use crate::emitter::{EmitError, Emitter};
use crate::params::{Params, ParamsError};
use crate::resolver::{ResolveError, Resolver};
use prost_reflect::{DescriptorError, DescriptorPool};
use prost_types::FileDescriptorSet;
use prost_types::compiler::code_generator_response::Feature;
use prost_types::compiler::{CodeGeneratorRequest, CodeGeneratorResponse};

/// Version baked into generated code and sent as the `Blaze-Version` header.
pub const VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

#[derive(thiserror::Error, Debug)]
pub enum GenerateError {
    #[error("could not parse parameters passed to --blaze_out: {0}")]
    Params(#[from] ParamsError),
    #[error("invalid descriptor set: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("package name deduction failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Emit(#[from] EmitError),
}

pub fn generate(request: CodeGeneratorRequest) -> Result<CodeGeneratorResponse, GenerateError> {
    let params = Params::parse(request.parameter())?;
    tracing::debug!(?params, files = ?request.file_to_generate, "generating");

    let order: Vec<String> = request
        .proto_file
        .iter()
        .map(|file| file.name().to_string())
        .collect();
    let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet {
        file: request.proto_file,
    })?;
    let resolver = Resolver::new(&pool, &order, &request.file_to_generate, params)?;

    let mut emitter = Emitter::new(&resolver, files_hash(&request.file_to_generate));
    let mut file = Vec::new();
    for gen_file in resolver.gen_files() {
        if let Some(generated) = emitter.emit(gen_file)? {
            tracing::debug!(file = generated.name(), "generated");
            file.push(generated);
        }
    }

    Ok(CodeGeneratorResponse {
        file,
        supported_features: Some(Feature::Proto3Optional as u64),
        ..Default::default()
    })
}
