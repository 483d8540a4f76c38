use std::path::{Path, PathBuf};

/// Artifact locations inside a materialized run directory.
///
/// ```text
/// <run>/logs/concord-log.txt
/// <run>/logs/webapp-logs.json
/// <run>/logs/dispatcher-logs.json
/// <run>/kono-report/data/timeline.json
/// <run>/substantiate-report/data/timeline.json
/// <run>/metrics/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub base_dir: PathBuf,
}

impl RunLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn orchestration_log(&self) -> PathBuf {
        self.logs_dir().join("concord-log.txt")
    }

    pub fn integration_timeline(&self) -> PathBuf {
        timeline(&self.base_dir, "kono-report")
    }

    pub fn e2e_timeline(&self) -> PathBuf {
        timeline(&self.base_dir, "substantiate-report")
    }

    pub fn webapp_logs(&self) -> PathBuf {
        self.logs_dir().join("webapp-logs.json")
    }

    pub fn dispatcher_logs(&self) -> PathBuf {
        self.logs_dir().join("dispatcher-logs.json")
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.base_dir.join("metrics")
    }

    fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }
}

fn timeline(base: &Path, report: &str) -> PathBuf {
    base.join(report).join("data").join("timeline.json")
}
