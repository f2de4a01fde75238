//! # Plugin Parameters
//!
//! `protoc` hands the plugin a single comma separated parameter string, e.g.
//!
//! ```text
//! --blaze_out=import_prefix=crate::proto::,paths=source_relative,Mcommon/types.proto=crate::common:.
//! ```
//!
//! Every entry must be a `k=v` pair with a non-empty value. Recognized keys:
//!
//! * `import_prefix=<path>`: prepended to every import path.
//! * `paths=source_relative|import`: where output files are placed.
//! * `M<proto-file>=<import-path>`: import path of a single dependency file.
//! * `go_import_mapping@<proto-file>=<import-path>`: same as the `M` form.
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParamsError {
    #[error("invalid parameter \"{0}\": expected format of parameter to be k=v")]
    InvalidFormat(String),
    #[error("unknown parameter \"{0}\"")]
    UnknownParameter(String),
    #[error("invalid value \"{value}\" for parameter \"paths\": expected \"source_relative\" or \"import\"")]
    InvalidPaths { value: String },
}

/// How output file names are derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PathsMode {
    /// Output files are placed under the import path of their package.
    #[default]
    Import,
    /// Output files are placed next to their `.proto` file.
    SourceRelative,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pub import_prefix: String,
    pub import_map: BTreeMap<String, String>,
    pub paths: PathsMode,
}

impl Params {
    pub fn parse(parameter: &str) -> Result<Self, ParamsError> {
        let mut params = Params::default();

        for entry in parameter.split(',').filter(|entry| !entry.is_empty()) {
            let (key, value) = match entry.split_once('=') {
                Some((key, value)) if !value.is_empty() => (key, value),
                Some((key, _)) => return Err(ParamsError::InvalidFormat(key.to_string())),
                None => return Err(ParamsError::InvalidFormat(entry.to_string())),
            };

            match key {
                "import_prefix" => params.import_prefix = value.to_string(),
                "paths" => {
                    params.paths = match value {
                        "source_relative" => PathsMode::SourceRelative,
                        "import" => PathsMode::Import,
                        other => {
                            return Err(ParamsError::InvalidPaths {
                                value: other.to_string(),
                            });
                        }
                    }
                }
                _ => {
                    let file = key
                        .strip_prefix("go_import_mapping@")
                        .or_else(|| key.strip_prefix('M'))
                        .filter(|file| !file.is_empty())
                        .ok_or_else(|| ParamsError::UnknownParameter(key.to_string()))?;
                    params
                        .import_map
                        .insert(file.to_string(), value.to_string());
                }
            }
        }

        Ok(params)
    }
}
