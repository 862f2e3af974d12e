use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::catalog::Catalog;
use crate::domain::SearchRecord;
use crate::error::CmipError;

/// Human-readable byte count, two decimals, B through TB. The TB pass
/// divides like every other unit, so sizes past 1024 TB wrap back down.
pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    let mut unit = UNITS[0];
    for candidate in UNITS {
        unit = candidate;
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
    }
    format!("{value:.2} {unit}")
}

/// One row of the model summary table. Group columns are blanked on
/// continuation rows, mirroring a spreadsheet with merged cells.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub model: String,
    pub num_variants: String,
    pub variants: String,
    pub variable: String,
    pub nominal_resolution: String,
    pub experiment: String,
    pub date_start: String,
    pub date_stop: String,
    pub size: String,
}

const CSV_HEADER: [&str; 9] = [
    "Model",
    "Number of Variants",
    "Variants",
    "Variables",
    "Nominal Resolution",
    "Experiments",
    "Date Start",
    "Date Stop",
    "Size",
];

/// Builds the summary for a filtered catalog, walking the requested
/// variable and experiment orders and pulling metadata from the first
/// matching search record.
pub fn summary_rows(
    catalog: &Catalog,
    records: &[SearchRecord],
    variables: &[String],
    experiments: &[String],
) -> Vec<SummaryRow> {
    let mut rows = Vec::new();
    for (model, entry) in &catalog.models {
        let num_variants = entry.variants.len();
        let mut labels: Vec<&str> = entry.variants.iter().map(|v| v.label.as_str()).collect();
        labels.sort_unstable();
        let variants = labels.join(", ");

        let mut first_model_row = true;
        for variable in variables {
            let nominal_resolution = records
                .iter()
                .find(|record| record.source_id == *model && record.variable == *variable)
                .and_then(|record| record.nominal_resolution.clone())
                .unwrap_or_default();

            let mut first_variable_row = true;
            for experiment in experiments {
                let matched = records.iter().find(|record| {
                    record.source_id == *model
                        && record.variable == *variable
                        && record.experiment_id == *experiment
                        && record.has_coverage()
                });

                let size = matched
                    .and_then(|record| record.size)
                    .map(format_size)
                    .unwrap_or_default();
                let date_start = matched
                    .and_then(|record| record.datetime_start)
                    .map(|stamp| stamp.to_rfc3339())
                    .unwrap_or_default();
                let date_stop = matched
                    .and_then(|record| record.datetime_stop)
                    .map(|stamp| stamp.to_rfc3339())
                    .unwrap_or_default();

                let (model_col, num_col, variants_col) = if first_model_row && first_variable_row {
                    (model.clone(), num_variants.to_string(), variants.clone())
                } else {
                    (String::new(), String::new(), String::new())
                };
                let (variable_col, resolution_col) = if first_variable_row {
                    (variable.clone(), nominal_resolution.clone())
                } else {
                    (String::new(), String::new())
                };

                rows.push(SummaryRow {
                    model: model_col,
                    num_variants: num_col,
                    variants: variants_col,
                    variable: variable_col,
                    nominal_resolution: resolution_col,
                    experiment: experiment.clone(),
                    date_start,
                    date_stop,
                    size,
                });
                first_variable_row = false;
            }
            first_model_row = false;
        }
    }
    rows
}

pub fn write_csv(rows: &[SummaryRow], path: &Path) -> Result<(), CmipError> {
    let mut out = String::new();
    out.push_str(&CSV_HEADER.map(csv_escape).join(","));
    out.push('\n');
    for row in rows {
        let fields = [
            row.model.as_str(),
            row.num_variants.as_str(),
            row.variants.as_str(),
            row.variable.as_str(),
            row.nominal_resolution.as_str(),
            row.experiment.as_str(),
            row.date_start.as_str(),
            row.date_stop.as_str(),
            row.size.as_str(),
        ];
        out.push_str(&fields.map(csv_escape).join(","));
        out.push('\n');
    }
    fs::write(path, out)
        .map_err(|err| CmipError::Filesystem(format!("write {}: {err}", path.display())))
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
