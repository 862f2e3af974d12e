use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::CmipError;

/// On-disk layout for downloaded data:
/// `<root>/<model>/<variant>/<variable>/<experiment>/<filename>`, with
/// cropped files suffixed `_<region>_crop.nc`.
#[derive(Debug, Clone)]
pub struct DataStore {
    root: Utf8PathBuf,
}

impl DataStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn dataset_dir(
        &self,
        model: &str,
        variant: &str,
        variable: &str,
        experiment: &str,
    ) -> Utf8PathBuf {
        self.root
            .join(model)
            .join(variant)
            .join(variable)
            .join(experiment)
    }

    pub fn ensure_dataset_dir(
        &self,
        model: &str,
        variant: &str,
        variable: &str,
        experiment: &str,
    ) -> Result<Utf8PathBuf, CmipError> {
        let dir = self.dataset_dir(model, variant, variable, experiment);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| CmipError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(dir)
    }

    /// Path of the cropped variant of `path`: the `.nc` extension is
    /// replaced by `_<region>_crop.nc`.
    pub fn crop_path(path: &Utf8Path, region_name: &str) -> Utf8PathBuf {
        let file_name = path.file_name().unwrap_or_default();
        let stem = file_name.strip_suffix(".nc").unwrap_or(file_name);
        path.with_file_name(format!("{stem}_{region_name}_crop.nc"))
    }
}
