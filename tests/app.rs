use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{TimeZone, Utc};

use cmip_data_retriever::app::{App, DownloadOptions};
use cmip_data_retriever::config::ResolvedConfig;
use cmip_data_retriever::domain::{FileEntry, Frequency, SearchRecord};
use cmip_data_retriever::error::CmipError;
use cmip_data_retriever::esgf::{SearchClient, SearchQuery};
use cmip_data_retriever::fetch::{
    FetchError, FetchResponse, Fetcher, FileTransport, RetryPolicy,
};
use cmip_data_retriever::output::JsonOutput;
use cmip_data_retriever::store::DataStore;

const BODY: &[u8] = b"netcdf-bytes";

#[derive(Default)]
struct MockSearch {
    records: Vec<SearchRecord>,
    files: HashMap<String, Vec<FileEntry>>,
}

impl SearchClient for MockSearch {
    fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchRecord>, CmipError> {
        Ok(self.records.clone())
    }

    fn list_files(&self, record: &SearchRecord) -> Result<Vec<FileEntry>, CmipError> {
        Ok(self.files.get(&record.dataset_id).cloned().unwrap_or_default())
    }
}

#[derive(Default, Clone)]
struct RecordingTransport {
    fetched: Arc<Mutex<Vec<String>>>,
    fail_urls: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransport {
    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl FileTransport for RecordingTransport {
    fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        if self.fail_urls.lock().unwrap().iter().any(|bad| bad == url) {
            return Err(FetchError::Fatal("server returned status 403".to_string()));
        }
        self.fetched.lock().unwrap().push(url.to_string());
        Ok(FetchResponse {
            content_length: Some(BODY.len() as u64),
            body: Box::new(Cursor::new(BODY.to_vec())),
        })
    }
}

fn record(model: &str, variant: &str, variable: &str, experiment: &str) -> SearchRecord {
    record_on_node(model, variant, variable, experiment, "node1")
}

fn record_on_node(
    model: &str,
    variant: &str,
    variable: &str,
    experiment: &str,
    node: &str,
) -> SearchRecord {
    SearchRecord {
        dataset_id: format!("CMIP6.{model}.{experiment}.{variant}.{variable}|{node}"),
        source_id: model.to_string(),
        variant_label: variant.to_string(),
        variable: variable.to_string(),
        experiment_id: experiment.to_string(),
        frequency: Some("mon".to_string()),
        nominal_resolution: Some("250 km".to_string()),
        size: Some(BODY.len() as u64),
        datetime_start: Utc.with_ymd_and_hms(2015, 1, 16, 12, 0, 0).single(),
        datetime_stop: Utc.with_ymd_and_hms(2100, 12, 16, 12, 0, 0).single(),
    }
}

fn filename(model: &str, variant: &str, variable: &str, experiment: &str) -> String {
    format!("{variable}_Amon_{model}_{experiment}_{variant}_gn_201501-210012.nc")
}

fn file_entry(model: &str, variant: &str, variable: &str, experiment: &str) -> FileEntry {
    let name = filename(model, variant, variable, experiment);
    FileEntry {
        url: format!("http://esgf.node/{name}"),
        filename: name,
    }
}

fn config(variables: &[&str], experiments: &[&str], root: &Utf8PathBuf) -> ResolvedConfig {
    ResolvedConfig {
        schema_version: 1,
        variables: variables.iter().map(|s| s.to_string()).collect(),
        experiments: experiments.iter().map(|s| s.to_string()).collect(),
        model: None,
        frequency: Frequency::Mon,
        data_root: root.clone(),
        skip: Vec::new(),
        select: Vec::new(),
        region: None,
    }
}

struct Fixture {
    app: App<MockSearch, RecordingTransport>,
    transport: RecordingTransport,
    root: Utf8PathBuf,
    _temp: tempfile::TempDir,
}

fn fixture(search: MockSearch, variables: &[&str], experiments: &[&str]) -> Fixture {
    fixture_adjusted(search, variables, experiments, |_| {})
}

fn fixture_adjusted(
    search: MockSearch,
    variables: &[&str],
    experiments: &[&str],
    adjust: impl FnOnce(&mut ResolvedConfig),
) -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();
    let transport = RecordingTransport::default();
    let fetcher = Fetcher::new(
        transport.clone(),
        RetryPolicy {
            max_retries: 3,
            wait: Duration::from_millis(0),
        },
    );
    let store = DataStore::new(root.clone());
    let mut config = config(variables, experiments, &root);
    adjust(&mut config);
    let app = App::new(search, fetcher, store, config);
    Fixture {
        app,
        transport,
        root,
        _temp: temp,
    }
}

/// Registers a record plus a single matching file listing.
fn add_complete(search: &mut MockSearch, model: &str, variant: &str, variable: &str, experiment: &str) {
    let record = record(model, variant, variable, experiment);
    search
        .files
        .insert(record.dataset_id.clone(), vec![file_entry(model, variant, variable, experiment)]);
    search.records.push(record);
}

#[test]
fn incomplete_model_is_filtered_and_not_downloaded() {
    let mut search = MockSearch::default();
    for experiment in ["ssp126", "ssp585"] {
        add_complete(&mut search, "AAA-CM", "r1i1p1f1", "tas", experiment);
    }
    // BBB-CM misses ssp585.
    add_complete(&mut search, "BBB-CM", "r1i1p1f1", "tas", "ssp126");

    let mut fx = fixture(search, &["tas"], &["ssp126", "ssp585"]);

    let filtered = fx.app.filtered_catalog().unwrap();
    let models: Vec<&str> = filtered.model_names().collect();
    assert_eq!(models, vec!["AAA-CM"]);

    fx.app
        .download(&DownloadOptions::default(), &JsonOutput)
        .unwrap();

    let aaa = fx.root.join("AAA-CM/r1i1p1f1/tas/ssp126").join(filename(
        "AAA-CM", "r1i1p1f1", "tas", "ssp126",
    ));
    assert!(aaa.as_std_path().exists());
    assert!(!fx.root.join("BBB-CM").as_std_path().exists());
    assert_eq!(fx.transport.fetched().len(), 2);
}

#[test]
fn scenario_files_outside_window_are_dropped() {
    let mut search = MockSearch::default();
    let rec = record("AAA-CM", "r1i1p1f1", "tas", "ssp126");
    search.files.insert(
        rec.dataset_id.clone(),
        vec![
            FileEntry {
                filename: "tas_Amon_AAA-CM_ssp126_r1i1p1f1_gn_201501-210012.nc".to_string(),
                url: "http://esgf.node/in-window.nc".to_string(),
            },
            FileEntry {
                filename: "tas_Amon_AAA-CM_ssp126_r1i1p1f1_gn_201401-210012.nc".to_string(),
                url: "http://esgf.node/starts-too-early.nc".to_string(),
            },
            FileEntry {
                filename: "tas_Amon_AAA-CM_ssp126_r1i1p1f1_gn_201501-210112.nc".to_string(),
                url: "http://esgf.node/ends-too-late.nc".to_string(),
            },
        ],
    );
    search.records.push(rec);

    let mut fx = fixture(search, &["tas"], &["ssp126"]);
    fx.app
        .download(&DownloadOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(
        fx.transport.fetched(),
        vec!["http://esgf.node/in-window.nc".to_string()]
    );
}

#[test]
fn non_scenario_experiment_keeps_all_files() {
    let mut search = MockSearch::default();
    let mut rec = record("AAA-CM", "r1i1p1f1", "tas", "historical");
    rec.datetime_start = Utc.with_ymd_and_hms(1850, 1, 16, 0, 0, 0).single();
    rec.datetime_stop = Utc.with_ymd_and_hms(2014, 12, 16, 0, 0, 0).single();
    search.files.insert(
        rec.dataset_id.clone(),
        vec![
            FileEntry {
                filename: "tas_Amon_AAA-CM_historical_r1i1p1f1_gn_185001-201412.nc".to_string(),
                url: "http://esgf.node/historical-1.nc".to_string(),
            },
            FileEntry {
                filename: "tas_Amon_AAA-CM_historical_r1i1p1f1_gn_no-token.nc".to_string(),
                url: "http://esgf.node/historical-2.nc".to_string(),
            },
        ],
    );
    search.records.push(rec);

    let mut fx = fixture(search, &["tas"], &["historical"]);
    fx.app
        .download(&DownloadOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(fx.transport.fetched().len(), 2);
}

#[test]
fn first_matching_record_with_files_wins() {
    let mut search = MockSearch::default();
    let first = record_on_node("AAA-CM", "r1i1p1f1", "tas", "ssp126", "node1");
    let second = record_on_node("AAA-CM", "r1i1p1f1", "tas", "ssp126", "node2");
    search.files.insert(
        first.dataset_id.clone(),
        vec![FileEntry {
            filename: filename("AAA-CM", "r1i1p1f1", "tas", "ssp126"),
            url: "http://node1/tas.nc".to_string(),
        }],
    );
    search.files.insert(
        second.dataset_id.clone(),
        vec![FileEntry {
            filename: "tas_Amon_AAA-CM_ssp126_r1i1p1f1_gn_201501-210011.nc".to_string(),
            url: "http://node2/tas.nc".to_string(),
        }],
    );
    search.records.push(first);
    search.records.push(second);

    let mut fx = fixture(search, &["tas"], &["ssp126"]);
    fx.app
        .download(&DownloadOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(fx.transport.fetched(), vec!["http://node1/tas.nc".to_string()]);
}

#[test]
fn record_with_no_usable_files_falls_through_to_next() {
    let mut search = MockSearch::default();
    let first = record_on_node("AAA-CM", "r1i1p1f1", "tas", "ssp126", "node1");
    let second = record_on_node("AAA-CM", "r1i1p1f1", "tas", "ssp126", "node2");
    // Every file on the first record violates the scenario window.
    search.files.insert(
        first.dataset_id.clone(),
        vec![FileEntry {
            filename: "tas_Amon_AAA-CM_ssp126_r1i1p1f1_gn_201401-210012.nc".to_string(),
            url: "http://node1/tas.nc".to_string(),
        }],
    );
    search.files.insert(
        second.dataset_id.clone(),
        vec![FileEntry {
            filename: filename("AAA-CM", "r1i1p1f1", "tas", "ssp126"),
            url: "http://node2/tas.nc".to_string(),
        }],
    );
    search.records.push(first);
    search.records.push(second);

    let mut fx = fixture(search, &["tas"], &["ssp126"]);
    fx.app
        .download(&DownloadOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(fx.transport.fetched(), vec!["http://node2/tas.nc".to_string()]);
}

#[test]
fn existing_files_are_not_refetched() {
    let mut search = MockSearch::default();
    add_complete(&mut search, "AAA-CM", "r1i1p1f1", "tas", "ssp126");

    let mut fx = fixture(search, &["tas"], &["ssp126"]);
    let dir = fx.root.join("AAA-CM/r1i1p1f1/tas/ssp126");
    std::fs::create_dir_all(dir.as_std_path()).unwrap();
    std::fs::write(
        dir.join(filename("AAA-CM", "r1i1p1f1", "tas", "ssp126"))
            .as_std_path(),
        b"already here",
    )
    .unwrap();

    fx.app
        .download(&DownloadOptions::default(), &JsonOutput)
        .unwrap();

    assert!(fx.transport.fetched().is_empty());
}

#[test]
fn select_restricts_and_skip_excludes() {
    let mut search = MockSearch::default();
    add_complete(&mut search, "AAA-CM", "r1i1p1f1", "tas", "ssp126");
    add_complete(&mut search, "BBB-CM", "r1i1p1f1", "tas", "ssp126");

    let mut fx = fixture(search, &["tas"], &["ssp126"]);
    fx.app
        .download(
            &DownloadOptions {
                select: vec!["BBB-CM".to_string()],
                ..DownloadOptions::default()
            },
            &JsonOutput,
        )
        .unwrap();
    assert!(fx.root.join("BBB-CM").as_std_path().exists());
    assert!(!fx.root.join("AAA-CM").as_std_path().exists());

    let mut search = MockSearch::default();
    add_complete(&mut search, "AAA-CM", "r1i1p1f1", "tas", "ssp126");
    add_complete(&mut search, "BBB-CM", "r1i1p1f1", "tas", "ssp126");
    let mut fx = fixture(search, &["tas"], &["ssp126"]);
    fx.app
        .download(
            &DownloadOptions {
                skip: vec!["BBB-CM".to_string()],
                ..DownloadOptions::default()
            },
            &JsonOutput,
        )
        .unwrap();
    assert!(fx.root.join("AAA-CM").as_std_path().exists());
    assert!(!fx.root.join("BBB-CM").as_std_path().exists());
}

#[test]
fn config_skip_applies_when_options_give_none() {
    let mut search = MockSearch::default();
    add_complete(&mut search, "AAA-CM", "r1i1p1f1", "tas", "ssp126");
    add_complete(&mut search, "BBB-CM", "r1i1p1f1", "tas", "ssp126");

    let mut fx = fixture_adjusted(search, &["tas"], &["ssp126"], |config| {
        config.skip = vec!["BBB-CM".to_string()];
    });
    fx.app
        .download(&DownloadOptions::default(), &JsonOutput)
        .unwrap();

    assert!(fx.root.join("AAA-CM").as_std_path().exists());
    assert!(!fx.root.join("BBB-CM").as_std_path().exists());
}

#[test]
fn explicit_select_overrides_config_skip() {
    let mut search = MockSearch::default();
    add_complete(&mut search, "AAA-CM", "r1i1p1f1", "tas", "ssp126");
    add_complete(&mut search, "BBB-CM", "r1i1p1f1", "tas", "ssp126");

    let mut fx = fixture_adjusted(search, &["tas"], &["ssp126"], |config| {
        config.skip = vec!["BBB-CM".to_string()];
    });
    fx.app
        .download(
            &DownloadOptions {
                select: vec!["BBB-CM".to_string()],
                ..DownloadOptions::default()
            },
            &JsonOutput,
        )
        .unwrap();

    assert!(fx.root.join("BBB-CM").as_std_path().exists());
    assert!(!fx.root.join("AAA-CM").as_std_path().exists());
}

#[test]
fn at_most_five_variants_per_model() {
    let mut search = MockSearch::default();
    for i in 1..=7 {
        add_complete(&mut search, "AAA-CM", &format!("r{i}i1p1f1"), "tas", "ssp126");
    }

    let mut fx = fixture(search, &["tas"], &["ssp126"]);
    fx.app
        .download(&DownloadOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(fx.transport.fetched().len(), 5);
}

#[test]
fn failed_download_does_not_abort_the_run() {
    let mut search = MockSearch::default();
    add_complete(&mut search, "AAA-CM", "r1i1p1f1", "tas", "ssp126");
    add_complete(&mut search, "AAA-CM", "r1i1p1f1", "tas", "ssp585");

    let mut fx = fixture(search, &["tas"], &["ssp126", "ssp585"]);
    let bad = file_entry("AAA-CM", "r1i1p1f1", "tas", "ssp126").url;
    fx.transport.fail_urls.lock().unwrap().push(bad);

    fx.app
        .download(&DownloadOptions::default(), &JsonOutput)
        .unwrap();

    let ssp585 = fx.root.join("AAA-CM/r1i1p1f1/tas/ssp585").join(filename(
        "AAA-CM", "r1i1p1f1", "tas", "ssp585",
    ));
    assert!(ssp585.as_std_path().exists());
    let ssp126 = fx.root.join("AAA-CM/r1i1p1f1/tas/ssp126").join(filename(
        "AAA-CM", "r1i1p1f1", "tas", "ssp126",
    ));
    assert!(!ssp126.as_std_path().exists());
}

#[cfg(not(feature = "netcdf"))]
#[test]
fn region_download_requires_netcdf_feature() {
    use assert_matches::assert_matches;
    use cmip_data_retriever::region::{Region, RegionSpec};

    let mut search = MockSearch::default();
    add_complete(&mut search, "AAA-CM", "r1i1p1f1", "tas", "ssp126");

    let mut fx = fixture(search, &["tas"], &["ssp126"]);
    let region = Region::resolve(&RegionSpec::Named("med".to_string())).unwrap();
    let err = fx
        .app
        .download(
            &DownloadOptions {
                region: Some(region),
                ..DownloadOptions::default()
            },
            &JsonOutput,
        )
        .unwrap_err();
    assert_matches!(err, CmipError::CropUnavailable);
}
