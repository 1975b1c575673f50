//! Build and query settings.
//!
//! Uses Figment to merge built-in defaults, an optional TOML file and
//! `SIMILARITY_*` environment variables (`__` separates nested keys, e.g.
//! `SIMILARITY_MODEL__N_COMPONENTS=100`).

use crate::{Error, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "similarity.toml";

pub const DEFAULT_SECTIONS_TO_REMOVE: &[&str] = &[
    "bibliography",
    "external links",
    "footnotes",
    "further reading",
    "notes",
    "references",
    "see also",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Minimum fraction of documents a term must appear in.
    pub min_df: f64,
    /// Maximum fraction of documents a term may appear in.
    pub max_df: f64,
    pub sublinear_tf: bool,
    pub smooth_idf: bool,
    /// Reduced dimensionality; 0 keeps the sparse vectors.
    pub n_components: usize,
    pub seed: u64,
    /// Size of the analysis worker pool; 0 means one per CPU.
    pub workers: usize,
    pub max_faults_per_worker: usize,
    /// Ceiling on per-document artifact writes per second, across all workers.
    pub max_artifact_qps: f64,
    pub train_fraction: f64,
    pub min_token_chars: usize,
    pub sections_to_remove: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            min_df: 0.0001,
            max_df: 0.20,
            sublinear_tf: true,
            smooth_idf: true,
            n_components: 0,
            seed: 42,
            workers: 0,
            max_faults_per_worker: 20,
            max_artifact_qps: 24.0,
            train_fraction: 1.0,
            min_token_chars: 4,
            sections_to_remove: DEFAULT_SECTIONS_TO_REMOVE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    /// Rows scoring below this are dropped from results.
    pub min_score: f32,
    /// Weight of the description vector relative to the body text.
    pub description_weight: f32,
}

impl Default for SearchConfig {
    fn default() -> Self { Self { top_k: 10, min_score: 0.0, description_weight: 0.25 } }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelConfig,
    pub search: SearchConfig,
}

impl Settings {
    /// Load settings from `path` (or `similarity.toml` when absent) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("SIMILARITY_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        if self.search.top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be at least 1".into()));
        }
        if !(self.search.description_weight >= 0.0) {
            return Err(Error::InvalidConfig("description_weight must not be negative".into()));
        }
        Ok(())
    }
}

impl ModelConfig {
    /// Range checks; NaN fails every one of them.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_df) || !(0.0..=1.0).contains(&self.max_df) {
            return Err(Error::InvalidConfig(format!("df bounds must be fractions, got min_df={} max_df={}", self.min_df, self.max_df)));
        }
        if self.max_df < self.min_df {
            return Err(Error::InvalidConfig(format!("max_df {} is below min_df {}", self.max_df, self.min_df)));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!("train_fraction must be in (0, 1], got {}", self.train_fraction)));
        }
        if !(self.max_artifact_qps > 0.0) {
            return Err(Error::InvalidConfig(format!("max_artifact_qps must be positive, got {}", self.max_artifact_qps)));
        }
        Ok(())
    }
}
