use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Experiments that require full-century coverage verification because they
/// are future-projection runs.
pub const SCENARIO_EXPERIMENTS: [&str; 2] = ["ssp126", "ssp585"];

/// A scenario dataset must start in this year to be accepted.
pub const SCENARIO_START_YEAR: i32 = 2015;

/// A scenario dataset must cover at least through this year to be accepted.
pub const SCENARIO_MIN_STOP_YEAR: i32 = 2099;

/// Scenario files ending past this year are discarded.
pub const SCENARIO_MAX_FILE_END_YEAR: i32 = 2100;

pub fn is_long_horizon_scenario(experiment: &str) -> bool {
    SCENARIO_EXPERIMENTS.contains(&experiment)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Mon,
    Day,
    Yr,
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency::Mon
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Mon => write!(f, "mon"),
            Frequency::Day => write!(f, "day"),
            Frequency::Yr => write!(f, "yr"),
        }
    }
}

/// One dataset entry returned by the ESGF search service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub dataset_id: String,
    pub source_id: String,
    pub variant_label: String,
    pub variable: String,
    pub experiment_id: String,
    pub frequency: Option<String>,
    pub nominal_resolution: Option<String>,
    pub size: Option<u64>,
    pub datetime_start: Option<DateTime<Utc>>,
    pub datetime_stop: Option<DateTime<Utc>>,
}

impl SearchRecord {
    pub fn has_coverage(&self) -> bool {
        self.datetime_start.is_some() && self.datetime_stop.is_some()
    }

    pub fn matches(&self, model: &str, variant: &str, variable: &str, experiment: &str) -> bool {
        self.source_id == model
            && self.variant_label == variant
            && self.variable == variable
            && self.experiment_id == experiment
    }
}

/// One downloadable file exposed by a dataset's file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,
    pub url: String,
}

/// Year range embedded in a CMIP filename's trailing `_YYYYMM-YYYYMM.nc` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileYearWindow {
    pub start_year: i32,
    pub end_year: i32,
}

pub fn file_year_window(filename: &str) -> Option<FileYearWindow> {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| {
        Regex::new(r"_(\d{4})\d{2}-(\d{4})\d{2}\.nc$").expect("valid filename token regex")
    });
    let captures = token.captures(filename)?;
    let start_year = captures.get(1)?.as_str().parse().ok()?;
    let end_year = captures.get(2)?.as_str().parse().ok()?;
    Some(FileYearWindow {
        start_year,
        end_year,
    })
}

/// Scenario file filter: keep only files fully inside the 2015..=2100 window.
/// Filenames without a parseable year token are excluded.
pub fn within_scenario_window(filename: &str) -> bool {
    match file_year_window(filename) {
        Some(window) => {
            window.start_year >= SCENARIO_START_YEAR
                && window.end_year <= SCENARIO_MAX_FILE_END_YEAR
        }
        None => false,
    }
}
