//! Runtime configuration for the screening harness.
//!
//! Values start from compiled defaults and may be overridden by environment variables.
//! The resulting `ScreeningConfig` is passed explicitly into each component, so tests can
//! point an index at a temporary directory and a client at a local server.

use crate::core_modules::dataset_index::DatasetIndex;
use crate::core_modules::image_acceptance::AcceptancePolicy;
use crate::core_modules::inference_client::{ClientError, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT, InferenceClient};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DATASET_ROOT_ENV: &str = "REFUGE_DATASET_ROOT";
pub const API_URL_ENV: &str = "REFUGE_API_URL";
pub const TIMEOUT_ENV: &str = "REFUGE_TIMEOUT_SECS";
pub const MIN_DIMENSION_ENV: &str = "REFUGE_MIN_DIMENSION";
pub const MIN_CONTRAST_ENV: &str = "REFUGE_MIN_CONTRAST";

pub const DEFAULT_DATASET_ROOT: &str = "./REFUGE_sample";
const MAX_DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct ScreeningConfig {
    pub dataset_root: PathBuf,
    pub endpoint: String,
    /// Per-request timeout for the classifier.
    pub request_timeout: Duration,
    pub acceptance: AcceptancePolicy,
    /// Run `acceptance` on every sample before sending it.
    pub prescreen: bool,
    /// In-flight request limit for `run_concurrent`.
    pub concurrency: usize,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from(DEFAULT_DATASET_ROOT),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            acceptance: AcceptancePolicy::default(),
            prescreen: false,
            concurrency: default_concurrency(),
        }
    }
}

impl ScreeningConfig {
    /// Defaults overlaid with `REFUGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each `REFUGE_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(root) = lookup(DATASET_ROOT_ENV) {
            config.dataset_root = PathBuf::from(root);
        }
        if let Some(url) = lookup(API_URL_ENV) {
            config.endpoint = url;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, TIMEOUT_ENV) {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(min_dimension) = parse_var::<u32>(&lookup, MIN_DIMENSION_ENV) {
            config.acceptance.min_dimension = min_dimension;
        }
        if let Some(min_contrast) = parse_var::<f64>(&lookup, MIN_CONTRAST_ENV) {
            config.acceptance.min_contrast = min_contrast;
        }

        config
    }

    pub fn dataset_index(&self) -> DatasetIndex {
        DatasetIndex::new(self.dataset_root.clone())
    }

    pub fn inference_client(&self) -> Result<InferenceClient, ClientError> {
        InferenceClient::new(&self.endpoint)
    }
}

/// Available CPUs, clamped to `1..=8`.
pub fn default_concurrency() -> usize {
    num_cpus::get().clamp(1, MAX_DEFAULT_CONCURRENCY)
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable configuration value");
            None
        }
    }
}
