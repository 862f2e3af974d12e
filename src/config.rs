use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::Frequency;
use crate::error::CmipError;
use crate::region::{Region, RegionSpec};

pub const DEFAULT_CONFIG_FILE: &str = "cmip-dr.json";
pub const DEFAULT_DATA_ROOT: &str = "data/CMIP6";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub variables: NameList,
    pub experiments: NameList,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub data_root: Option<String>,
    #[serde(default)]
    pub skip: Vec<String>,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default)]
    pub region: Option<RegionSpec>,
}

/// A single name or a list of names, so `"variables": "tas"` and
/// `"variables": ["tas", "pr"]` both parse.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum NameList {
    One(String),
    Many(Vec<String>),
}

impl NameList {
    fn into_vec(self) -> Vec<String> {
        match self {
            NameList::One(value) => vec![value],
            NameList::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub variables: Vec<String>,
    pub experiments: Vec<String>,
    pub model: Option<String>,
    pub frequency: Frequency,
    pub data_root: Utf8PathBuf,
    pub skip: Vec<String>,
    pub select: Vec<String>,
    pub region: Option<Region>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CmipError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(CmipError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CmipError::ConfigRead(config_path.clone()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|err| CmipError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CmipError> {
        let variables = config.variables.into_vec();
        if variables.is_empty() {
            return Err(CmipError::EmptyRequest("variables"));
        }
        let experiments = config.experiments.into_vec();
        if experiments.is_empty() {
            return Err(CmipError::EmptyRequest("experiments"));
        }

        let region = config
            .region
            .as_ref()
            .map(Region::resolve)
            .transpose()?;

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            variables,
            experiments,
            model: config.model,
            frequency: config.frequency.unwrap_or_default(),
            data_root: Utf8PathBuf::from(
                config
                    .data_root
                    .unwrap_or_else(|| DEFAULT_DATA_ROOT.to_string()),
            ),
            skip: config.skip,
            select: config.select,
            region,
        })
    }
}
