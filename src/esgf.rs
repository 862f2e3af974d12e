use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::domain::{FileEntry, Frequency, SearchRecord};
use crate::error::CmipError;

const ESGF_SEARCH_BASE: &str = "https://esgf-node.llnl.gov/esg-search";
const PAGE_SIZE: usize = 1000;

/// Facet filters for a dataset search against the federated index.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub project: String,
    pub variables: Vec<String>,
    pub experiments: Vec<String>,
    pub frequency: Frequency,
    pub grid_labels: String,
    pub model: Option<String>,
}

impl SearchQuery {
    pub fn cmip6(
        variables: Vec<String>,
        experiments: Vec<String>,
        frequency: Frequency,
        model: Option<String>,
    ) -> SearchQuery {
        SearchQuery {
            project: "CMIP6".to_string(),
            variables,
            experiments,
            frequency,
            grid_labels: "gn,gr".to_string(),
            model,
        }
    }
}

/// Boundary to the remote search service. The orchestrator only depends on
/// this trait, so tests drive it with synthetic records.
pub trait SearchClient: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchRecord>, CmipError>;
    fn list_files(&self, record: &SearchRecord) -> Result<Vec<FileEntry>, CmipError>;
}

#[derive(Clone)]
pub struct EsgfHttpClient {
    client: Client,
    base_url: String,
}

impl EsgfHttpClient {
    pub fn new() -> Result<Self, CmipError> {
        Self::with_base_url(ESGF_SEARCH_BASE)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, CmipError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cmip-dr/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CmipError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CmipError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    fn fetch_page(&self, params: &[(&str, String)], offset: usize) -> Result<Value, CmipError> {
        let url = format!("{}/search", self.base_url);
        let response = self.send_with_retries(|| {
            self.client
                .get(&url)
                .query(params)
                .query(&[("limit", PAGE_SIZE.to_string())])
                .query(&[("offset", offset.to_string())])
                .query(&[("format", "application/solr+json".to_string())])
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "ESGF search failed".to_string());
            return Err(CmipError::SearchStatus { status, message });
        }
        response
            .json::<Value>()
            .map_err(|err| CmipError::SearchParse(err.to_string()))
    }

    fn fetch_all_docs(&self, params: &[(&str, String)]) -> Result<Vec<Value>, CmipError> {
        let mut docs = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.fetch_page(params, offset)?;
            let response = page
                .get("response")
                .ok_or_else(|| CmipError::SearchParse("missing `response` object".to_string()))?;
            let num_found = response
                .get("numFound")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let page_docs = response
                .get("docs")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if page_docs.is_empty() {
                break;
            }
            offset += page_docs.len();
            docs.extend(page_docs);
            if docs.len() >= num_found {
                break;
            }
        }
        Ok(docs)
    }

    fn send_with_retries<F>(&self, make_req: F) -> Result<reqwest::blocking::Response, CmipError>
    where
        F: Fn() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(CmipError::SearchHttp(err.to_string()));
                }
            }
        }
    }
}

impl SearchClient for EsgfHttpClient {
    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchRecord>, CmipError> {
        let mut params = vec![
            ("type", "Dataset".to_string()),
            ("project", query.project.clone()),
            ("variable", query.variables.join(",")),
            ("experiment_id", query.experiments.join(",")),
            ("frequency", query.frequency.to_string()),
            ("grid_label", query.grid_labels.clone()),
            ("latest", "true".to_string()),
            ("distrib", "true".to_string()),
        ];
        if let Some(model) = &query.model {
            params.push(("source_id", model.clone()));
        }

        let docs = self.fetch_all_docs(&params)?;
        debug!("search returned {} dataset records", docs.len());
        Ok(docs.iter().filter_map(parse_dataset_doc).collect())
    }

    fn list_files(&self, record: &SearchRecord) -> Result<Vec<FileEntry>, CmipError> {
        let params = vec![
            ("type", "File".to_string()),
            ("dataset_id", record.dataset_id.clone()),
        ];
        let docs = self.fetch_all_docs(&params)?;
        Ok(docs.iter().filter_map(parse_file_doc).collect())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Solr dataset docs carry most facets as one-element string arrays.
fn first_string(doc: &Value, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Array(values) => values.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn parse_timestamp(doc: &Value, key: &str) -> Option<DateTime<Utc>> {
    let raw = first_string(doc, key)?;
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|stamp| stamp.with_timezone(&Utc))
}

fn parse_dataset_doc(doc: &Value) -> Option<SearchRecord> {
    Some(SearchRecord {
        dataset_id: first_string(doc, "id")?,
        source_id: first_string(doc, "source_id")?,
        variant_label: first_string(doc, "variant_label")?,
        variable: first_string(doc, "variable")?,
        experiment_id: first_string(doc, "experiment_id")?,
        frequency: first_string(doc, "frequency"),
        nominal_resolution: first_string(doc, "nominal_resolution"),
        size: doc.get("size").and_then(Value::as_u64),
        datetime_start: parse_timestamp(doc, "datetime_start"),
        datetime_stop: parse_timestamp(doc, "datetime_stop"),
    })
}

/// File docs list access methods as `url|mime|service` strings; only the
/// plain HTTP endpoint is downloadable here.
fn parse_file_doc(doc: &Value) -> Option<FileEntry> {
    let filename = first_string(doc, "title")?;
    let urls = doc.get("url").and_then(Value::as_array)?;
    let download_url = urls
        .iter()
        .filter_map(Value::as_str)
        .find(|entry| entry.ends_with("HTTPServer"))
        .and_then(|entry| entry.split('|').next())?;
    Some(FileEntry {
        filename,
        url: download_url.to_string(),
    })
}
