use crate::error::{read_artifact, ArtifactError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

const WEBAPP_ARTIFACT: &str = "webapp log";
const DISPATCHER_ARTIFACT: &str = "dispatcher log";

pub const QUEUE_BLOCKING: &str = "EffectConsumer queue blocking";
pub const DIALECT_MISMATCH: &str = "Hibernate dialect mismatch";
pub const MISSING_DATASET_ATTRIBUTES: &str = "Missing dataset attribute mappings";

static DELAY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+\.\d+)s").expect("delay regex"));

static RUNNING_JOB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Running job (\d+)").expect("running job regex"));

/// Keyword rule for one warning category. Keywords are lowercase and matched
/// against the lowercased line.
struct WarningRule {
    category: &'static str,
    description: &'static str,
    all_of: &'static [&'static str],
    any_of: &'static [&'static str],
    track_worst_delay: bool,
}

impl WarningRule {
    fn matches(&self, lower: &str) -> bool {
        self.all_of.iter().all(|k| lower.contains(k))
            && (self.any_of.is_empty() || self.any_of.iter().any(|k| lower.contains(k)))
    }
}

const WARNING_RULES: &[WarningRule] = &[
    WarningRule {
        category: QUEUE_BLOCKING,
        description: "Messages that 'should have been an actuator' blocked the EffectConsumer queue",
        all_of: &["effectconsumer"],
        any_of: &[],
        track_worst_delay: true,
    },
    WarningRule {
        category: DIALECT_MISMATCH,
        description: "MariaDB dialect configured but database is MySQL 8.0",
        all_of: &["dialect"],
        any_of: &["mariadb", "hibernate", "mysql"],
        track_worst_delay: false,
    },
    WarningRule {
        category: MISSING_DATASET_ATTRIBUTES,
        description: "Dataset attribute mapping warnings",
        all_of: &["missing"],
        any_of: &["dataset", "attribute"],
        track_worst_delay: false,
    },
];

/// Aggregated warning category found in application logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogWarning {
    pub category: String,
    pub count: usize,
    pub description: String,
    /// Longest delay observed for categories that report one, e.g. `"12.5s"`.
    pub worst_case: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppLogsResult {
    pub warnings: Vec<LogWarning>,
    pub error_count: usize,
    pub validation_error_count: usize,
    pub total_log_entries: usize,
}

impl AppLogsResult {
    pub fn warning(&self, category: &str) -> Option<&LogWarning> {
        self.warnings.iter().find(|w| w.category == category)
    }
}

/// Compute timeline of one dispatcher batch job. Timestamps are nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatcherTimeline {
    pub job_id: Option<String>,
    pub pod_name: Option<String>,
    pub first_log_ns: Option<i64>,
    pub last_log_ns: Option<i64>,
    pub compute_start_ns: Option<i64>,
    pub compute_end_ns: Option<i64>,
}

impl DispatcherTimeline {
    pub fn total_duration_s(&self) -> f64 {
        span_s(self.first_log_ns, self.last_log_ns)
    }

    pub fn compute_duration_s(&self) -> f64 {
        span_s(self.compute_start_ns, self.compute_end_ns)
    }
}

fn span_s(start: Option<i64>, end: Option<i64>) -> f64 {
    match (start, end) {
        (Some(start), Some(end)) => (end - start) as f64 / 1e9,
        _ => 0.0,
    }
}

// Loki query_range envelope.

#[derive(Debug, Deserialize)]
struct LokiEnvelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: LokiData,
}

#[derive(Debug, Default, Deserialize)]
struct LokiData {
    #[serde(default)]
    result: Vec<LokiStream>,
}

#[derive(Debug, Deserialize)]
struct LokiStream {
    #[serde(default)]
    stream: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(String, String)>,
}

/// Decode the envelope; `None` for a well-formed but non-success response.
fn decode_envelope(artifact: &'static str, content: &str) -> Result<Option<Vec<LokiStream>>> {
    let envelope: LokiEnvelope =
        serde_json::from_str(content).map_err(|source| ArtifactError::Malformed { artifact, source })?;
    if envelope.status != "success" {
        warn!(artifact, status = %envelope.status, "log query did not succeed; treating as empty");
        return Ok(None);
    }
    Ok(Some(envelope.data.result))
}

fn parse_timestamp(artifact: &'static str, raw: &str) -> Result<i64> {
    raw.parse::<i64>().map_err(|_| ArtifactError::InvalidField {
        artifact,
        detail: format!("timestamp '{}' is not an integer nanosecond value", raw),
    })
}

pub fn analyze_webapp_file(path: &Path) -> Result<AppLogsResult> {
    let content = read_artifact(WEBAPP_ARTIFACT, path)?;
    parse_webapp(&content)
}

/// Count warning categories and errors in webapp logs.
pub fn parse_webapp(content: &str) -> Result<AppLogsResult> {
    let mut result = AppLogsResult::default();
    let Some(streams) = decode_envelope(WEBAPP_ARTIFACT, content)? else {
        return Ok(result);
    };

    let mut counts = [0usize; WARNING_RULES.len()];
    let mut worst: [Option<(f64, String)>; WARNING_RULES.len()] = Default::default();

    for stream in &streams {
        for (raw_ts, line) in &stream.values {
            parse_timestamp(WEBAPP_ARTIFACT, raw_ts)?;
            result.total_log_entries += 1;

            if line.contains("WARN") {
                let lower = line.to_lowercase();
                for (idx, rule) in WARNING_RULES.iter().enumerate() {
                    if !rule.matches(&lower) {
                        continue;
                    }
                    counts[idx] += 1;
                    if rule.track_worst_delay {
                        record_worst_delay(&mut worst[idx], line);
                    }
                }
            }

            if line.contains("ERROR") {
                result.error_count += 1;
                if line.to_lowercase().contains("valid") {
                    result.validation_error_count += 1;
                }
            }
        }
    }

    for (idx, rule) in WARNING_RULES.iter().enumerate() {
        if counts[idx] == 0 {
            continue;
        }
        result.warnings.push(LogWarning {
            category: rule.category.to_string(),
            count: counts[idx],
            description: rule.description.to_string(),
            worst_case: worst[idx].take().map(|(_, text)| text),
        });
    }

    debug!(
        entries = result.total_log_entries,
        warnings = result.warnings.len(),
        errors = result.error_count,
        "parsed webapp logs"
    );

    Ok(result)
}

fn record_worst_delay(worst: &mut Option<(f64, String)>, line: &str) {
    let Some(caps) = DELAY_RE.captures(line) else {
        return;
    };
    let Ok(secs) = caps[1].parse::<f64>() else {
        return;
    };
    if worst.as_ref().map_or(true, |(current, _)| secs > *current) {
        *worst = Some((secs, caps[0].to_string()));
    }
}

pub fn analyze_dispatcher_file(path: &Path) -> Result<DispatcherTimeline> {
    let content = read_artifact(DISPATCHER_ARTIFACT, path)?;
    parse_dispatcher(&content)
}

struct DispatcherEntry<'a> {
    ts: i64,
    line: &'a str,
    stream_type: &'a str,
}

/// Reconstruct the dispatcher job timeline from its stdout/stderr streams.
pub fn parse_dispatcher(content: &str) -> Result<DispatcherTimeline> {
    let mut timeline = DispatcherTimeline::default();
    let Some(streams) = decode_envelope(DISPATCHER_ARTIFACT, content)? else {
        return Ok(timeline);
    };

    let mut entries = Vec::new();
    for stream in &streams {
        let stream_type = stream.stream.get("stream").map(String::as_str).unwrap_or("unknown");
        if let Some(pod) = stream.stream.get("pod").filter(|p| !p.is_empty()) {
            timeline.pod_name = Some(pod.clone());
        }
        for (raw_ts, line) in &stream.values {
            entries.push(DispatcherEntry {
                ts: parse_timestamp(DISPATCHER_ARTIFACT, raw_ts)?,
                line,
                stream_type,
            });
        }
    }

    if entries.is_empty() {
        return Ok(timeline);
    }

    entries.sort_by_key(|e| e.ts);
    timeline.first_log_ns = entries.first().map(|e| e.ts);
    timeline.last_log_ns = entries.last().map(|e| e.ts);

    // Only the first "Running job" line is considered, even if its id fails to parse.
    if let Some(entry) = entries.iter().find(|e| e.line.contains("Running job")) {
        if let Some(caps) = RUNNING_JOB_RE.captures(entry.line) {
            timeline.job_id = Some(caps[1].to_string());
            timeline.compute_start_ns = Some(entry.ts);
        }
    }

    // Upload completion is not always logged; fall back to the last stdout line.
    let mut stdout = entries.iter().rev().filter(|e| e.stream_type == "stdout");
    timeline.compute_end_ns = stdout
        .clone()
        .find(|e| e.line.contains("Finished") && e.line.contains("S3"))
        .or_else(|| stdout.next())
        .map(|e| e.ts);

    debug!(
        job_id = timeline.job_id.as_deref().unwrap_or("-"),
        total_s = timeline.total_duration_s(),
        "parsed dispatcher logs"
    );

    Ok(timeline)
}
