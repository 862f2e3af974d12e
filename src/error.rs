use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CmipError {
    #[error("missing config file cmip-dr.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("config field `{0}` must not be empty")]
    EmptyRequest(&'static str),

    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("invalid region polygon: {0}")]
    InvalidRegion(String),

    #[error("ESGF search request failed: {0}")]
    SearchHttp(String),

    #[error("ESGF search returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("failed to parse ESGF search response: {0}")]
    SearchParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("crop failed: {0}")]
    Crop(String),

    #[error("region cropping requires the `netcdf` feature")]
    CropUnavailable,
}
