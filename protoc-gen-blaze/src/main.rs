//! # protoc-gen-blaze
//!
//! A `protoc` plugin generating blaze service code for Rust. `protoc` runs it with a
//! `CodeGeneratorRequest` on stdin and reads the `CodeGeneratorResponse` from stdout:
//!
//! ```bash
//! protoc --plugin=protoc-gen-blaze --prost_out=src/pb --blaze_out=src/pb echo.proto
//! ```
//!
//! 1. **Parameters**: [`params`] parses the `--blaze_out` parameter string.
//! 2. **Resolution**: [`resolver`] picks the generated package name, the aliases of imported
//!    packages and the Rust path of every referenced message.
//! 3. **Emission**: [`emitter`] writes one source unit per file that declares services.
//!
//! Logs go to stderr and are filtered with `RUST_LOG`. Any error aborts the run with exit
//! status 1 and no output.
mod descriptor;
mod emitter;
mod generator;
mod names;
mod params;
mod resolver;
#[cfg(test)]
mod test_support;

use anyhow::Context;
use clap::Parser;
use prost::Message;
use prost_types::compiler::CodeGeneratorRequest;
use std::io::{self, Read, Write};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "protoc-gen-blaze",
    version,
    about = "protoc plugin generating blaze clients and servers",
    long_about = "Reads a CodeGeneratorRequest from stdin and writes a CodeGeneratorResponse to stdout. Run it through protoc with --blaze_out."
)]
struct Cli {}

fn main() {
    Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    if let Err(err) = run() {
        tracing::error!(error = ?err, "generation failed");
        eprintln!("protoc-gen-blaze: {err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut input = Vec::new();
    io::stdin()
        .read_to_end(&mut input)
        .context("failed to read request from stdin")?;
    let request = CodeGeneratorRequest::decode(input.as_slice())
        .context("failed to decode CodeGeneratorRequest")?;

    let response = generator::generate(request)?;

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(&response.encode_to_vec())
        .context("failed to write response to stdout")?;
    stdout.flush().context("failed to flush stdout")?;
    Ok(())
}
