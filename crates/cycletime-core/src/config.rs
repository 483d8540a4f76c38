use serde::{Deserialize, Serialize};
use std::path::Path;

/// Analysis configuration loaded from `cycletime.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub suites: SuiteNames,
}

/// Tunable heuristic cut-offs used by the test-timeline analyzer and the correlator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    /// Elapsed time from the first test start that still counts as the setup
    /// phase. Serialized fixture/bootstrap chains in the e2e suite finish well
    /// inside this window on a healthy run.
    pub setup_cutoff_secs: f64,

    /// Tests running longer than this are treated as waiting on backend compute.
    /// Interactive UI tests rarely exceed it while compute-wait tests poll on a
    /// 20s cadence, so this separates the two populations.
    pub polling_threshold_ms: i64,

    /// Polling share (percent of aggregate test time) above which the polling
    /// finding is raised.
    pub polling_finding_pct: f64,

    /// Average webapp CPU (cores) below which the application counts as idle.
    pub headroom_cpu_cores: f64,

    /// Highest tolerated pending connection-pool count for the headroom finding.
    pub headroom_max_pending: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            setup_cutoff_secs: 340.0,
            polling_threshold_ms: 16_000,
            polling_finding_pct: 50.0,
            headroom_cpu_cores: 1.0,
            headroom_max_pending: 0.0,
        }
    }
}

/// Display names for the two test suites in a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SuiteNames {
    /// Integration suite split across fork-join pools.
    pub integration: String,
    /// End-to-end suite with a setup chain and compute polling.
    pub e2e: String,
}

impl Default for SuiteNames {
    fn default() -> Self {
        Self {
            integration: "Kono".to_string(),
            e2e: "Substantiate".to_string(),
        }
    }
}

/// Load analysis configuration from a TOML file.
pub fn load_config(path: &Path) -> anyhow::Result<AnalysisConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
    parse_config(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))
}

/// Parse analysis configuration from TOML text.
pub fn parse_config(content: &str) -> anyhow::Result<AnalysisConfig> {
    Ok(toml::from_str(content)?)
}
