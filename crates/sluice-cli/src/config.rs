//! TOML configuration for the `sluice` binary.
//!
//! `[query]` is the engine's [`QueryPolicy`] verbatim. `[cluster]` describes
//! the simulated in-process cluster the binary queries.

use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;
use sluice_types::QueryPolicy;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Query policy applied to every query.
    pub query: QueryPolicy,
    /// Simulated cluster layout.
    pub cluster: ClusterSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[cluster]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Number of nodes.
    pub nodes: usize,
    /// Namespace every node serves.
    pub namespace: String,
    /// Set the records are written to.
    pub set: String,
    /// Records stored on each node.
    pub records_per_node: usize,
    /// 1-based indexes of nodes whose sessions fail on open.
    pub failing_nodes: Vec<usize>,
    /// Latency range for opening a node session, `[min, max]` in ms.
    pub open_latency_ms: [u64; 2],
    /// Latency range before each record, `[min, max]` in ms.
    pub record_latency_ms: [u64; 2],
    /// Start a partition migration this many ms into the query.
    pub migrate_after_ms: Option<u64>,
    /// RNG seed for the simulated latency.
    pub seed: u64,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            nodes: 4,
            namespace: "test".to_string(),
            set: "demo".to_string(),
            records_per_node: 1000,
            failing_nodes: Vec::new(),
            open_latency_ms: [1, 5],
            record_latency_ms: [0, 0],
            migrate_after_ms: None,
            seed: 42,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("cannot read {}", p.display()))?;
                toml::from_str(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject layouts the simulator cannot build.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cluster.nodes == 0 || self.cluster.nodes > u8::MAX as usize {
            bail!("cluster.nodes must be between 1 and 255, got {}", self.cluster.nodes);
        }
        if let Some(&bad) = self
            .cluster
            .failing_nodes
            .iter()
            .find(|&&n| n == 0 || n > self.cluster.nodes)
        {
            bail!(
                "cluster.failing_nodes entry {bad} is outside 1..={}",
                self.cluster.nodes
            );
        }
        for (name, [min, max]) in [
            ("open_latency_ms", self.cluster.open_latency_ms),
            ("record_latency_ms", self.cluster.record_latency_ms),
        ] {
            if min > max {
                bail!("cluster.{name} min {min} exceeds max {max}");
            }
        }
        self.query.validate().context("invalid [query] section")?;
        Ok(())
    }
}
