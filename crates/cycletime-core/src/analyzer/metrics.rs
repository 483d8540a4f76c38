use crate::config::Thresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Containers whose series win over any other result in a query response.
const PREFERRED_CONTAINERS: &[&str] = &["webapp", "dispatcher"];

/// min/max/average of one numeric time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub unit: String,
}

/// Summaries of every metric found in a run's metrics directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub cpu: Option<MetricSummary>,
    pub memory: Option<MetricSummary>,
    pub dispatcher_cpu: Option<MetricSummary>,
    pub dispatcher_memory: Option<MetricSummary>,
    pub pool_active: Option<MetricSummary>,
    pub pool_pending: Option<MetricSummary>,
    pub jetty_threads: Option<MetricSummary>,
    pub jvm_heap: Option<MetricSummary>,
    pub jvm_threads: Option<MetricSummary>,
    pub gc: Option<MetricSummary>,
}

impl MetricsResult {
    /// The application is idle enough that it cannot be the bottleneck: low
    /// average CPU and no request ever waited for a pooled connection.
    pub fn has_headroom(&self, thresholds: &Thresholds) -> bool {
        match (&self.cpu, &self.pool_pending) {
            (Some(cpu), Some(pending)) => {
                cpu.average < thresholds.headroom_cpu_cores
                    && pending.max <= thresholds.headroom_max_pending
            }
            _ => false,
        }
    }
}

/// Where a metric lives in the metrics directory.
enum MetricFile {
    Exact(&'static str),
    /// First match in sorted order.
    Glob(&'static str),
}

struct MetricSource {
    file: MetricFile,
    name: &'static str,
    unit: &'static str,
    slot: fn(&mut MetricsResult) -> &mut Option<MetricSummary>,
}

const METRIC_SOURCES: &[MetricSource] = &[
    MetricSource {
        file: MetricFile::Exact("webapp-cpu.json"),
        name: "CPU",
        unit: "cores",
        slot: |m| &mut m.cpu,
    },
    MetricSource {
        file: MetricFile::Exact("webapp-memory.json"),
        name: "Memory",
        unit: "bytes",
        slot: |m| &mut m.memory,
    },
    MetricSource {
        file: MetricFile::Exact("dispatcher-cpu.json"),
        name: "Dispatcher CPU",
        unit: "cores",
        slot: |m| &mut m.dispatcher_cpu,
    },
    MetricSource {
        file: MetricFile::Exact("dispatcher-memory.json"),
        name: "Dispatcher Memory",
        unit: "bytes",
        slot: |m| &mut m.dispatcher_memory,
    },
    MetricSource {
        file: MetricFile::Glob("hikaricp_connections_active*.json"),
        name: "HikariCP Active",
        unit: "connections",
        slot: |m| &mut m.pool_active,
    },
    MetricSource {
        file: MetricFile::Glob("hikaricp_connections_pending*.json"),
        name: "HikariCP Pending",
        unit: "connections",
        slot: |m| &mut m.pool_pending,
    },
    MetricSource {
        file: MetricFile::Glob("jetty_threads_busy*.json"),
        name: "Jetty Threads",
        unit: "threads",
        slot: |m| &mut m.jetty_threads,
    },
    MetricSource {
        file: MetricFile::Glob("jvm_memory_used_bytes*.json"),
        name: "JVM Heap",
        unit: "bytes",
        slot: |m| &mut m.jvm_heap,
    },
    MetricSource {
        file: MetricFile::Glob("jvm_threads_current*.json"),
        name: "JVM Threads",
        unit: "threads",
        slot: |m| &mut m.jvm_threads,
    },
    MetricSource {
        file: MetricFile::Glob("rate_jvm_gc*.json"),
        name: "GC Rate",
        unit: "s/s",
        slot: |m| &mut m.gc,
    },
];

// Prometheus query_range envelope.

#[derive(Debug, Deserialize)]
struct PromEnvelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: PromData,
}

#[derive(Debug, Default, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromSeries>,
}

#[derive(Debug, Deserialize)]
struct PromSeries {
    #[serde(default)]
    metric: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(serde_json::Value, serde_json::Value)>,
}

/// Summarize every known metric file in `metrics_dir`. Missing or unusable
/// files leave their slot empty; this never fails.
pub fn analyze_dir(metrics_dir: &Path) -> MetricsResult {
    let mut result = MetricsResult::default();

    if !metrics_dir.is_dir() {
        warn!(dir = %metrics_dir.display(), "metrics directory not found; skipping metrics");
        return result;
    }

    for source in METRIC_SOURCES {
        let Some(path) = resolve(metrics_dir, &source.file) else {
            debug!(metric = source.name, "no metric file");
            continue;
        };
        *(source.slot)(&mut result) = summarize_file(&path, source.name, source.unit);
    }

    result
}

fn resolve(dir: &Path, file: &MetricFile) -> Option<PathBuf> {
    match file {
        MetricFile::Exact(name) => Some(dir.join(name)),
        MetricFile::Glob(pattern) => {
            let full = format!("{}/{}", glob::Pattern::escape(&dir.to_string_lossy()), pattern);
            let mut matches: Vec<PathBuf> = glob::glob(&full).ok()?.filter_map(|r| r.ok()).collect();
            matches.sort();
            matches.into_iter().next()
        }
    }
}

/// Load and summarize one metric file.
pub fn summarize_file(path: &Path, name: &str, unit: &str) -> Option<MetricSummary> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "metric file unreadable");
            return None;
        }
    };
    summarize(&content, name, unit)
}

/// Summarize a Prometheus range-query response. Prefers the series of a known
/// application container and falls back to the first series.
pub fn summarize(content: &str, name: &str, unit: &str) -> Option<MetricSummary> {
    let envelope: PromEnvelope = match serde_json::from_str(content) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(metric = name, error = %err, "metric file is not valid JSON");
            return None;
        }
    };
    if envelope.status != "success" {
        debug!(metric = name, status = %envelope.status, "metric query did not succeed");
        return None;
    }

    let series = &envelope.data.result;
    let target = series
        .iter()
        .find(|s| {
            s.metric
                .get("container")
                .is_some_and(|c| PREFERRED_CONTAINERS.contains(&c.as_str()))
        })
        .or_else(|| series.first())?;

    let samples: Vec<f64> = target.values.iter().filter_map(|(_, v)| sample_value(v)).collect();
    if samples.is_empty() {
        debug!(metric = name, "metric series has no numeric samples");
        return None;
    }

    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let average = samples.iter().sum::<f64>() / samples.len() as f64;

    Some(MetricSummary {
        name: name.to_string(),
        min,
        max,
        average,
        unit: unit.to_string(),
    })
}

fn sample_value(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        serde_json::Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    (!n.is_nan()).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn series(container: &str, values: &[&str]) -> serde_json::Value {
        let values: Vec<serde_json::Value> = values
            .iter()
            .enumerate()
            .map(|(i, v)| json!([1_771_957_264 + i as i64 * 30, v]))
            .collect();
        json!({"metric": {"container": container, "pod": "webapp-0"}, "values": values})
    }

    fn response(result: Vec<serde_json::Value>) -> String {
        json!({"status": "success", "data": {"resultType": "matrix", "result": result}}).to_string()
    }

    #[test]
    fn summarizes_preferred_container() {
        let content = response(vec![
            series("istio-proxy", &["9.0", "9.5"]),
            series("webapp", &["0.2", "2.09", "0.1", "NaN", "bogus"]),
        ]);
        let summary = summarize(&content, "CPU", "cores").unwrap();
        assert_eq!(summary.max, 2.09);
        assert_eq!(summary.min, 0.1);
        assert!((summary.average - 0.796_666).abs() < 1e-5);
        assert_eq!(summary.unit, "cores");
    }

    #[test]
    fn falls_back_to_first_series() {
        let content = response(vec![series("sidecar", &["1", "3"]), series("other", &["100"])]);
        let summary = summarize(&content, "Jetty Threads", "threads").unwrap();
        assert_eq!(summary.average, 2.0);
    }

    #[test]
    fn unusable_inputs_yield_none() {
        assert!(summarize("not json", "CPU", "cores").is_none());
        assert!(summarize(&json!({"status": "error"}).to_string(), "CPU", "cores").is_none());
        assert!(summarize(&response(vec![]), "CPU", "cores").is_none());
        assert!(summarize(&response(vec![series("webapp", &["NaN"])]), "CPU", "cores").is_none());
        assert!(summarize_file(Path::new("/nonexistent/webapp-cpu.json"), "CPU", "cores").is_none());
    }

    #[test]
    fn accepts_numeric_samples() {
        let content = json!({"status": "success", "data": {"result": [
            {"metric": {}, "values": [[1, 4], [2, 0.5]]}
        ]}})
        .to_string();
        let summary = summarize(&content, "HikariCP Active", "connections").unwrap();
        assert_eq!(summary.max, 4.0);
    }

    #[test]
    fn headroom_requires_both_metrics() {
        let thresholds = Thresholds::default();
        let cpu = MetricSummary {
            name: "CPU".into(),
            min: 0.05,
            max: 2.09,
            average: 0.3,
            unit: "cores".into(),
        };
        let pending = MetricSummary {
            name: "HikariCP Pending".into(),
            min: 0.0,
            max: 0.0,
            average: 0.0,
            unit: "connections".into(),
        };

        let mut metrics = MetricsResult {
            cpu: Some(cpu.clone()),
            ..Default::default()
        };
        assert!(!metrics.has_headroom(&thresholds));

        metrics.pool_pending = Some(pending.clone());
        assert!(metrics.has_headroom(&thresholds));

        metrics.pool_pending = Some(MetricSummary { max: 1.0, ..pending });
        assert!(!metrics.has_headroom(&thresholds));

        metrics.pool_pending = Some(MetricSummary {
            name: "HikariCP Pending".into(),
            min: 0.0,
            max: 0.0,
            average: 0.0,
            unit: "connections".into(),
        });
        metrics.cpu = Some(MetricSummary { average: 1.0, ..cpu });
        assert!(!metrics.has_headroom(&thresholds));
    }

    #[test]
    fn analyze_dir_reads_exact_and_globbed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("webapp-cpu.json"),
            response(vec![series("webapp", &["0.4", "0.6"])]),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("hikaricp_connections_pending_webapp.json"),
            response(vec![series("webapp", &["0", "0"])]),
        )
        .unwrap();
        std::fs::write(dir.path().join("jvm_threads_current.json"), "").unwrap();

        let metrics = analyze_dir(dir.path());
        assert_eq!(metrics.cpu.as_ref().unwrap().average, 0.5);
        assert_eq!(metrics.pool_pending.as_ref().unwrap().max, 0.0);
        assert!(metrics.memory.is_none());
        assert!(metrics.jvm_threads.is_none());
        assert!(metrics.has_headroom(&Thresholds::default()));
    }

    #[test]
    fn missing_directory_is_empty() {
        assert_eq!(analyze_dir(Path::new("/nonexistent/metrics")), MetricsResult::default());
    }
}
