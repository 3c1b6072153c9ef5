//! Ambient configuration: a `ReplayConfig` loaded once per run from
//! hard-coded defaults, layered with an optional TOML file, layered again
//! with CLI flags — the same defaults-then-file-then-flags precedence the
//! teacher's own `EvmArgs`/onchain config split embodies, just collapsed
//! into one struct since this core has a single configuration surface.
use std::fs;
use std::path::Path as FsPath;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::harness::ChainPolicy;
use crate::mutation::MutationConfig;
use crate::rules::RuleExtractionConfig;
use crate::types::Address;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub rpc_endpoint: String,
    pub chain_id: u64,
    pub worker_count: usize,
    pub deadline_secs: u64,
    pub max_success: usize,
    pub similarity_threshold: f64,
    pub max_candidates: usize,
    pub protected_contracts: Vec<Address>,
    pub prefer_first_extracted_call: bool,
    pub chain_policy: ChainPolicy,
    pub mutation: MutationConfig,
    pub rule_extraction: RuleExtractionConfig,
}

impl ReplayConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Load defaults, merge a TOML file if present at `path`, return the
    /// result. Absence of the file is not an error: defaults stand alone.
    pub fn load(path: Option<&FsPath>) -> Result<Self, String> {
        let mut config = Self::default();
        if let Some(path) = path {
            if path.exists() {
                let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
                let from_file: PartialConfig = toml::from_str(&raw).map_err(|e| e.to_string())?;
                config.merge(from_file);
            }
        }
        Ok(config)
    }

    fn merge(&mut self, partial: PartialConfig) {
        if let Some(v) = partial.rpc_endpoint {
            self.rpc_endpoint = v;
        }
        if let Some(v) = partial.chain_id {
            self.chain_id = v;
        }
        if let Some(v) = partial.worker_count {
            self.worker_count = v;
        }
        if let Some(v) = partial.deadline_secs {
            self.deadline_secs = v;
        }
        if let Some(v) = partial.max_success {
            self.max_success = v;
        }
        if let Some(v) = partial.similarity_threshold {
            self.similarity_threshold = v;
        }
        if let Some(v) = partial.max_candidates {
            self.max_candidates = v;
        }
        if let Some(v) = partial.protected_contracts {
            self.protected_contracts = v;
        }
        if let Some(v) = partial.prefer_first_extracted_call {
            self.prefer_first_extracted_call = v;
        }
    }

    /// Apply CLI overrides, which take precedence over both defaults and a
    /// loaded TOML file.
    pub fn apply_overrides(&mut self, overrides: CliOverrides) {
        if let Some(v) = overrides.rpc_endpoint {
            self.rpc_endpoint = v;
        }
        if let Some(v) = overrides.chain_id {
            self.chain_id = v;
        }
        if let Some(v) = overrides.worker_count {
            self.worker_count = v;
        }
        if let Some(v) = overrides.deadline_secs {
            self.deadline_secs = v;
        }
        if let Some(v) = overrides.max_success {
            self.max_success = v;
        }
        if let Some(v) = overrides.similarity_threshold {
            self.similarity_threshold = v;
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: "http://localhost:8545".to_string(),
            chain_id: 1,
            worker_count: 8,
            deadline_secs: 60,
            max_success: 5,
            similarity_threshold: 0.8,
            max_candidates: 10_000,
            protected_contracts: Vec::new(),
            prefer_first_extracted_call: true,
            chain_policy: ChainPolicy::for_chain_id(1),
            mutation: MutationConfig::default(),
            rule_extraction: RuleExtractionConfig::default(),
        }
    }
}

/// The subset of [`ReplayConfig`] a TOML file may override; every field is
/// optional so a partial file only touches what it mentions.
#[derive(Clone, Debug, Default, Deserialize)]
struct PartialConfig {
    rpc_endpoint: Option<String>,
    chain_id: Option<u64>,
    worker_count: Option<usize>,
    deadline_secs: Option<u64>,
    max_success: Option<usize>,
    similarity_threshold: Option<f64>,
    max_candidates: Option<usize>,
    protected_contracts: Option<Vec<Address>>,
    prefer_first_extracted_call: Option<bool>,
}

/// CLI-supplied overrides, the highest-precedence layer. Populated from
/// `clap` flags in `main.rs`.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub rpc_endpoint: Option<String>,
    pub chain_id: Option<u64>,
    pub worker_count: Option<usize>,
    pub deadline_secs: Option<u64>,
    pub max_success: Option<usize>,
    pub similarity_threshold: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let config = ReplayConfig::default();
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.max_success, 5);
        assert!(config.chain_policy.force_push0);
    }

    #[test]
    fn file_layer_overrides_defaults_selectively() {
        let mut config = ReplayConfig::default();
        config.merge(PartialConfig {
            worker_count: Some(16),
            ..Default::default()
        });
        assert_eq!(config.worker_count, 16);
        assert_eq!(config.max_success, 5);
    }

    #[test]
    fn cli_layer_overrides_everything_beneath_it() {
        let mut config = ReplayConfig::default();
        config.merge(PartialConfig {
            worker_count: Some(16),
            ..Default::default()
        });
        config.apply_overrides(CliOverrides {
            worker_count: Some(32),
            ..Default::default()
        });
        assert_eq!(config.worker_count, 32);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ReplayConfig::load(Some(FsPath::new("/nonexistent/path.toml"))).unwrap();
        assert_eq!(config.worker_count, ReplayConfig::default().worker_count);
    }
}
