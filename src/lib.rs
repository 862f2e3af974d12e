//! Discover, filter, and download CMIP6 climate model output from the ESGF
//! federated archive, with optional geographic cropping of the results.

pub mod app;
pub mod catalog;
pub mod config;
pub mod crop;
pub mod domain;
pub mod error;
pub mod esgf;
pub mod fetch;
pub mod output;
pub mod region;
pub mod report;
pub mod store;
