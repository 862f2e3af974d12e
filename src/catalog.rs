use std::collections::BTreeMap;

use chrono::Datelike;
use serde::Serialize;

use crate::domain::{
    SCENARIO_MIN_STOP_YEAR, SCENARIO_START_YEAR, SearchRecord, is_long_horizon_scenario,
};

/// Nested view of the search results: model -> variant -> variable ->
/// experiment list. Model keys are sorted ascending; variants, variables and
/// experiments keep first-seen order until the completeness filter sorts the
/// surviving experiment lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catalog {
    pub models: BTreeMap<String, ModelEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelEntry {
    pub variants: Vec<VariantEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantEntry {
    pub label: String,
    pub variables: Vec<VariableEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableEntry {
    pub name: String,
    pub experiments: Vec<String>,
}

/// Acceptance rule applied to every record before grouping. Records without
/// full temporal coverage are dropped; long-horizon scenario records must
/// start in 2015 and reach at least 2099.
pub fn accepts(record: &SearchRecord) -> bool {
    let (Some(start), Some(stop)) = (record.datetime_start, record.datetime_stop) else {
        return false;
    };
    if is_long_horizon_scenario(&record.experiment_id) {
        start.year() == SCENARIO_START_YEAR && stop.year() >= SCENARIO_MIN_STOP_YEAR
    } else {
        true
    }
}

impl Catalog {
    /// Groups accepted records into the nested tree. An empty record
    /// sequence yields an empty catalog.
    pub fn from_records(records: &[SearchRecord]) -> Catalog {
        let mut catalog = Catalog::default();
        for record in records.iter().filter(|record| accepts(record)) {
            catalog.insert(
                &record.source_id,
                &record.variant_label,
                &record.variable,
                &record.experiment_id,
            );
        }
        catalog
    }

    fn insert(&mut self, model: &str, variant: &str, variable: &str, experiment: &str) {
        let entry = self.models.entry(model.to_string()).or_default();
        let variant_index = match entry
            .variants
            .iter()
            .position(|candidate| candidate.label == variant)
        {
            Some(index) => index,
            None => {
                entry.variants.push(VariantEntry {
                    label: variant.to_string(),
                    variables: Vec::new(),
                });
                entry.variants.len() - 1
            }
        };
        let variant_entry = &mut entry.variants[variant_index];
        let variable_index = match variant_entry
            .variables
            .iter()
            .position(|candidate| candidate.name == variable)
        {
            Some(index) => index,
            None => {
                variant_entry.variables.push(VariableEntry {
                    name: variable.to_string(),
                    experiments: Vec::new(),
                });
                variant_entry.variables.len() - 1
            }
        };
        let variable_entry = &mut variant_entry.variables[variable_index];
        if !variable_entry
            .experiments
            .iter()
            .any(|existing| existing == experiment)
        {
            variable_entry.experiments.push(experiment.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Pure completeness filter: a variant survives iff it offers exactly
    /// the requested variables and, for every one of them, exactly the
    /// requested experiments (both order-insensitive). Partial coverage
    /// drops the whole variant; models left without variants are removed.
    /// Surviving experiment lists come out sorted ascending.
    pub fn filter_complete(&self, variables: &[String], experiments: &[String]) -> Catalog {
        let mut wanted_variables: Vec<&str> = variables.iter().map(String::as_str).collect();
        wanted_variables.sort_unstable();
        let mut wanted_experiments: Vec<&str> = experiments.iter().map(String::as_str).collect();
        wanted_experiments.sort_unstable();

        let mut filtered = Catalog::default();
        for (model, entry) in &self.models {
            let mut surviving = Vec::new();
            for variant in &entry.variants {
                let mut names: Vec<&str> =
                    variant.variables.iter().map(|v| v.name.as_str()).collect();
                names.sort_unstable();
                if names != wanted_variables {
                    continue;
                }
                let complete = variant.variables.iter().all(|variable| {
                    let mut offered: Vec<&str> =
                        variable.experiments.iter().map(String::as_str).collect();
                    offered.sort_unstable();
                    offered == wanted_experiments
                });
                if !complete {
                    continue;
                }
                let mut kept = variant.clone();
                for variable in &mut kept.variables {
                    variable.experiments.sort_unstable();
                }
                surviving.push(kept);
            }
            if !surviving.is_empty() {
                filtered.models.insert(
                    model.clone(),
                    ModelEntry {
                        variants: surviving,
                    },
                );
            }
        }
        filtered
    }
}
