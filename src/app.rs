use tracing::warn;

use crate::catalog::Catalog;
use crate::config::ResolvedConfig;
use crate::domain::{
    FileEntry, SearchRecord, is_long_horizon_scenario, within_scenario_window,
};
use crate::error::CmipError;
use crate::esgf::{SearchClient, SearchQuery};
use crate::fetch::{Fetcher, FileTransport};
use crate::region::Region;
use crate::report::{SummaryRow, summary_rows};
use crate::store::DataStore;

/// At most this many variants are downloaded per model, bounding the
/// download volume for heavily-sampled ensembles.
pub const VARIANT_CAP: usize = 5;

/// Empty `skip`/`select` fall back to the config's defaults.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub skip: Vec<String>,
    pub select: Vec<String>,
    pub region: Option<Region>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Single-run pipeline: search once, build and filter the catalog, then
/// walk the filtered catalog downloading files. Search results and catalogs
/// are computed lazily and cached for the life of the run.
pub struct App<S: SearchClient, T: FileTransport> {
    search: S,
    fetcher: Fetcher<T>,
    store: DataStore,
    config: ResolvedConfig,
    records: Option<Vec<SearchRecord>>,
    catalog: Option<Catalog>,
    filtered: Option<Catalog>,
}

impl<S: SearchClient, T: FileTransport> App<S, T> {
    pub fn new(search: S, fetcher: Fetcher<T>, store: DataStore, config: ResolvedConfig) -> Self {
        Self {
            search,
            fetcher,
            store,
            config,
            records: None,
            catalog: None,
            filtered: None,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    fn query(&self) -> SearchQuery {
        SearchQuery::cmip6(
            self.config.variables.clone(),
            self.config.experiments.clone(),
            self.config.frequency,
            self.config.model.clone(),
        )
    }

    pub fn records(&mut self) -> Result<&[SearchRecord], CmipError> {
        if self.records.is_none() {
            let query = self.query();
            self.records = Some(self.search.search(&query)?);
        }
        Ok(self.records.as_deref().unwrap_or_default())
    }

    pub fn catalog(&mut self) -> Result<&Catalog, CmipError> {
        if self.catalog.is_none() {
            let catalog = Catalog::from_records(self.records()?);
            self.catalog = Some(catalog);
        }
        Ok(self.catalog.get_or_insert_with(Catalog::default))
    }

    pub fn filtered_catalog(&mut self) -> Result<&Catalog, CmipError> {
        if self.filtered.is_none() {
            let variables = self.config.variables.clone();
            let experiments = self.config.experiments.clone();
            let filtered = self.catalog()?.filter_complete(&variables, &experiments);
            self.filtered = Some(filtered);
        }
        Ok(self.filtered.get_or_insert_with(Catalog::default))
    }

    pub fn summary(&mut self) -> Result<Vec<SummaryRow>, CmipError> {
        let variables = self.config.variables.clone();
        let experiments = self.config.experiments.clone();
        let filtered = self.filtered_catalog()?.clone();
        let records = self.records()?;
        Ok(summary_rows(&filtered, records, &variables, &experiments))
    }

    /// Walks the filtered catalog and downloads every resolved file.
    /// Per-file failures are logged and skipped; the run only aborts on
    /// search or filesystem errors.
    pub fn download(
        &mut self,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<(), CmipError> {
        if options.region.is_some() && !cfg!(feature = "netcdf") {
            return Err(CmipError::CropUnavailable);
        }

        let filtered = self.filtered_catalog()?.clone();
        let records = self.records()?.to_vec();

        let select = if options.select.is_empty() {
            self.config.select.clone()
        } else {
            options.select.clone()
        };
        let skip = if options.skip.is_empty() {
            self.config.skip.clone()
        } else {
            options.skip.clone()
        };

        let models: Vec<&str> = if !select.is_empty() {
            filtered
                .model_names()
                .filter(|model| select.iter().any(|wanted| wanted == model))
                .collect()
        } else if !skip.is_empty() {
            filtered
                .model_names()
                .filter(|model| !skip.iter().any(|skipped| skipped == model))
                .collect()
        } else {
            filtered.model_names().collect()
        };

        for model in models {
            let entry = &filtered.models[model];
            for variant in entry.variants.iter().take(VARIANT_CAP) {
                for variable in &variant.variables {
                    for experiment in &variable.experiments {
                        sink.event(ProgressEvent {
                            message: format!(
                                "{model} {variant} {variable} {experiment}",
                                variant = variant.label,
                                variable = variable.name
                            ),
                        });
                        self.download_triple(
                            &records,
                            model,
                            &variant.label,
                            &variable.name,
                            experiment,
                            options.region.as_ref(),
                            sink,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn download_triple(
        &self,
        records: &[SearchRecord],
        model: &str,
        variant: &str,
        variable: &str,
        experiment: &str,
        region: Option<&Region>,
        sink: &dyn ProgressSink,
    ) -> Result<(), CmipError> {
        let matches = records
            .iter()
            .filter(|record| record.matches(model, variant, variable, experiment));

        for record in matches {
            let mut files = self.search.list_files(record)?;
            if is_long_horizon_scenario(experiment) {
                files.retain(|file| within_scenario_window(&file.filename));
            }
            if files.is_empty() {
                continue;
            }

            let dir = self
                .store
                .ensure_dataset_dir(model, variant, variable, experiment)?;
            for file in &files {
                self.download_file(file, &dir, region, sink)?;
            }
            // First record with usable files wins; later matches would
            // mostly duplicate the same dataset on other index nodes.
            break;
        }
        Ok(())
    }

    fn download_file(
        &self,
        file: &FileEntry,
        dir: &camino::Utf8Path,
        region: Option<&Region>,
        sink: &dyn ProgressSink,
    ) -> Result<(), CmipError> {
        let path = dir.join(&file.filename);
        let exists = path.as_std_path().exists()
            || region
                .map(|region| {
                    DataStore::crop_path(&path, &region.name)
                        .as_std_path()
                        .exists()
                })
                .unwrap_or(false);
        if exists {
            sink.event(ProgressEvent {
                message: format!("{} exists, skipping", file.filename),
            });
            return Ok(());
        }

        if let Err(err) = self
            .fetcher
            .fetch(&file.url, path.as_std_path(), sink)
        {
            warn!("failed to download {}: {err}", file.filename);
            sink.event(ProgressEvent {
                message: format!("failed to download {}: {err}", file.filename),
            });
            return Ok(());
        }

        if let Some(region) = region {
            self.crop_downloaded(&path, region, sink)?;
        }
        Ok(())
    }

    #[cfg(feature = "netcdf")]
    fn crop_downloaded(
        &self,
        path: &camino::Utf8Path,
        region: &Region,
        sink: &dyn ProgressSink,
    ) -> Result<(), CmipError> {
        let variable = path
            .file_name()
            .and_then(|name| name.split('_').next())
            .unwrap_or_default()
            .to_string();
        let crop_path = DataStore::crop_path(path, &region.name);
        crate::crop::crop_file(
            path.as_std_path(),
            crop_path.as_std_path(),
            region,
            &variable,
        )?;
        std::fs::remove_file(path.as_std_path())
            .map_err(|err| CmipError::Filesystem(format!("remove {path}: {err}")))?;
        sink.event(ProgressEvent {
            message: format!("cropped to {crop_path}"),
        });
        Ok(())
    }

    #[cfg(not(feature = "netcdf"))]
    fn crop_downloaded(
        &self,
        _path: &camino::Utf8Path,
        _region: &Region,
        _sink: &dyn ProgressSink,
    ) -> Result<(), CmipError> {
        Err(CmipError::CropUnavailable)
    }
}
