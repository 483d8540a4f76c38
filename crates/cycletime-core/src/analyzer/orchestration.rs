use crate::error::{read_artifact, Result};
use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

const ARTIFACT: &str = "orchestration log";

/// `2026-02-24T18:21:04.907+0000 [INFO ] message`
static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}[+-]\d{4})\s+\[(\w+)\s*\]\s+(.*)")
        .expect("orchestration line regex")
});

static CHILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Started a process: <concord:instanceId>([^<]+)</concord:instanceId>")
        .expect("child process regex")
});

static EXPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"export took (\d+)ms").expect("export duration regex"));

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

const STORING_POLICY: &str = "Storing policy";
const EXPORTING_REPOSITORY: &str = "Exporting the repository data";
const ASSUMING_ROLE: &str = "Assuming role";
const CONNECTING_TO: &str = "Connecting to";
const HELM_INSTALL_UPGRADE: &str = "Helm install/upgrade";
const STATUS_SUSPENDED: &str = "Process status: SUSPENDED";
const STATUS_RUNNING: &str = "Process status: RUNNING";

/// Name of the trailing phase spent waiting on child processes.
pub const SUSPENDED_PHASE: &str = "Suspended";

/// A named contiguous interval of the orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl Phase {
    pub fn duration_s(&self) -> f64 {
        seconds_between(self.start, self.end)
    }
}

/// Overhead paid by one suspend/resume cycle of the parent process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeOverhead {
    pub resume_time: DateTime<FixedOffset>,
    pub repo_export_s: f64,
    pub dependency_resolution_s: f64,
}

impl ResumeOverhead {
    pub fn total_s(&self) -> f64 {
        self.repo_export_s + self.dependency_resolution_s
    }
}

/// Phase timeline and resume behaviour extracted from one orchestration log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub phases: Vec<Phase>,
    pub children: Vec<String>,
    pub suspend_times: Vec<DateTime<FixedOffset>>,
    pub resume_overheads: Vec<ResumeOverhead>,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
}

impl OrchestrationResult {
    pub fn total_duration_s(&self) -> f64 {
        match (self.start, self.end) {
            (Some(start), Some(end)) => seconds_between(start, end),
            _ => 0.0,
        }
    }

    pub fn active_duration_s(&self) -> f64 {
        self.phases
            .iter()
            .filter(|p| p.name != SUSPENDED_PHASE)
            .map(Phase::duration_s)
            .sum()
    }

    pub fn suspended_duration_s(&self) -> f64 {
        self.phases
            .iter()
            .filter(|p| p.name == SUSPENDED_PHASE)
            .map(Phase::duration_s)
            .sum()
    }

    /// Share of the run spent suspended, in percent.
    pub fn idle_pct(&self) -> f64 {
        let total = self.total_duration_s();
        if total == 0.0 {
            return 0.0;
        }
        self.suspended_duration_s() / total * 100.0
    }

    pub fn total_resume_overhead_s(&self) -> f64 {
        self.resume_overheads.iter().map(ResumeOverhead::total_s).sum()
    }

    pub fn resume_count(&self) -> usize {
        self.resume_overheads.len()
    }
}

struct LogEntry<'a> {
    timestamp: DateTime<FixedOffset>,
    message: &'a str,
}

/// Analyze an orchestration log file.
pub fn analyze_file(path: &Path) -> Result<OrchestrationResult> {
    let content = read_artifact(ARTIFACT, path)?;
    Ok(parse(&content))
}

/// Analyze orchestration log text. Lines without a leading timestamp are ignored.
pub fn parse(content: &str) -> OrchestrationResult {
    let mut entries = parse_entries(content);
    let mut result = OrchestrationResult::default();

    if entries.is_empty() {
        debug!("no timestamped lines in orchestration log");
        return result;
    }

    // Sources are not guaranteed to be monotonic; the sort is stable so
    // same-millisecond lines keep their log order.
    entries.sort_by_key(|e| e.timestamp);
    result.start = entries.first().map(|e| e.timestamp);
    result.end = entries.last().map(|e| e.timestamp);

    result.children = entries
        .iter()
        .filter_map(|e| CHILD_RE.captures(e.message))
        .map(|caps| caps[1].to_string())
        .collect();

    let (suspend_times, resume_overheads) = detect_resume_cycles(&entries);
    result.suspend_times = suspend_times;
    result.resume_overheads = resume_overheads;

    if let Some(end) = result.end {
        result.phases = build_phases(&entries, end);
    }

    debug!(
        phases = result.phases.len(),
        children = result.children.len(),
        resumes = result.resume_overheads.len(),
        "parsed orchestration log"
    );

    result
}

fn parse_entries(content: &str) -> Vec<LogEntry<'_>> {
    content
        .lines()
        .filter_map(|line| {
            let caps = LINE_RE.captures(line.trim())?;
            let raw_ts = caps.get(1)?.as_str();
            let timestamp = match DateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT) {
                Ok(ts) => ts,
                Err(err) => {
                    debug!(timestamp = raw_ts, error = %err, "skipping line with invalid timestamp");
                    return None;
                }
            };
            Some(LogEntry {
                timestamp,
                message: caps.get(3)?.as_str(),
            })
        })
        .collect()
}

/// Walk the sorted log and collect suspend times plus one overhead per resume.
///
/// The first RUNNING status is the initial start of the process, not a resume,
/// so windows only open once it has been seen.
fn detect_resume_cycles(
    entries: &[LogEntry<'_>],
) -> (Vec<DateTime<FixedOffset>>, Vec<ResumeOverhead>) {
    let mut suspend_times = Vec::new();
    let mut overheads = Vec::new();

    let mut seen_first_running = false;
    let mut window_start: Option<DateTime<FixedOffset>> = None;
    let mut export_s = 0.0;

    for entry in entries {
        let msg = entry.message;

        if !seen_first_running && msg.contains(STATUS_RUNNING) {
            seen_first_running = true;
            continue;
        }

        if msg.contains(STATUS_SUSPENDED) {
            suspend_times.push(entry.timestamp);
            window_start = None;
        } else if seen_first_running && window_start.is_none() && msg.contains(STORING_POLICY) {
            window_start = Some(entry.timestamp);
            export_s = 0.0;
        } else if let Some(start) = window_start {
            if let Some(caps) = EXPORT_RE.captures(msg) {
                export_s = caps[1].parse::<u64>().map(|ms| ms as f64 / 1000.0).unwrap_or(0.0);
            } else if msg.contains(STATUS_RUNNING) {
                let total = seconds_between(start, entry.timestamp);
                overheads.push(ResumeOverhead {
                    resume_time: start,
                    repo_export_s: export_s,
                    // Clock noise can make the export line outlast the window.
                    dependency_resolution_s: (total - export_s).max(0.0),
                });
                window_start = None;
                export_s = 0.0;
            }
        }
    }

    (suspend_times, overheads)
}

#[derive(Default)]
struct Boundaries {
    init_start: Option<DateTime<FixedOffset>>,
    bootstrap_start: Option<DateTime<FixedOffset>>,
    aws_start: Option<DateTime<FixedOffset>>,
    mica_start: Option<DateTime<FixedOffset>>,
    helm_start: Option<DateTime<FixedOffset>>,
    helm_end: Option<DateTime<FixedOffset>>,
    first_suspend: Option<DateTime<FixedOffset>>,
}

impl Boundaries {
    fn locate(entries: &[LogEntry<'_>]) -> Self {
        let mut b = Boundaries::default();

        for entry in entries {
            let msg = entry.message;
            let ts = Some(entry.timestamp);
            if b.init_start.is_none() && msg.contains(STORING_POLICY) {
                b.init_start = ts;
            }
            if b.bootstrap_start.is_none() && msg.contains(EXPORTING_REPOSITORY) {
                b.bootstrap_start = ts;
            }
            if b.aws_start.is_none() && msg.contains(ASSUMING_ROLE) {
                b.aws_start = ts;
            }
            if b.mica_start.is_none() && is_mica_connect(msg) {
                b.mica_start = ts;
            }
            if b.first_suspend.is_none() && msg.contains(STATUS_SUSPENDED) {
                b.first_suspend = ts;
            }
        }

        if let Some(mica) = b.mica_start {
            b.helm_start = entries
                .iter()
                .find(|e| e.timestamp > mica && e.message.to_lowercase().contains("helm"))
                .map(|e| e.timestamp);
        }

        // Helm output repeats on resumed cycles; the deploy phase ends at the
        // last completion marker before the process first suspends.
        b.helm_end = entries
            .iter()
            .filter(|e| is_helm_completion(e.message))
            .filter(|e| b.first_suspend.map_or(true, |s| e.timestamp <= s))
            .map(|e| e.timestamp)
            .last();

        b
    }
}

fn is_mica_connect(msg: &str) -> bool {
    msg.contains(CONNECTING_TO) && msg.to_lowercase().contains("mica")
}

fn is_helm_completion(msg: &str) -> bool {
    msg.contains(HELM_INSTALL_UPGRADE) || (msg.to_lowercase().contains("deployed") && msg.contains("STATUS"))
}

/// Phases accepted in order; a candidate that runs backwards or starts before
/// the previous phase ended is dropped so the timeline never overlaps.
#[derive(Default)]
struct PhaseTimeline {
    phases: Vec<Phase>,
}

impl PhaseTimeline {
    fn push(&mut self, name: &str, start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) {
        if end < start {
            debug!(phase = name, "skipping phase that ends before it starts");
            return;
        }
        if let Some(prev) = self.phases.last() {
            if start < prev.end {
                debug!(phase = name, previous = %prev.name, "skipping phase overlapping previous phase");
                return;
            }
        }
        self.phases.push(Phase {
            name: name.to_string(),
            start,
            end,
        });
    }
}

fn build_phases(entries: &[LogEntry<'_>], run_end: DateTime<FixedOffset>) -> Vec<Phase> {
    let b = Boundaries::locate(entries);
    let mut timeline = PhaseTimeline::default();

    if let (Some(init), Some(bootstrap)) = (b.init_start, b.bootstrap_start) {
        timeline.push("Init", init, bootstrap);
    }
    if let (Some(bootstrap), Some(aws)) = (b.bootstrap_start, b.aws_start) {
        timeline.push("Bootstrap", bootstrap, aws);
    }
    if let (Some(aws), Some(mica)) = (b.aws_start, b.mica_start) {
        timeline.push("AWS", aws, mica);
    }
    if let (Some(mica), Some(helm_start)) = (b.mica_start, b.helm_start) {
        timeline.push("Config/Mica", mica, helm_start);
    }
    if let (Some(helm_start), Some(helm_end), Some(_)) = (b.helm_start, b.helm_end, b.first_suspend) {
        timeline.push("Helm", helm_start, helm_end);
    }
    if let Some(first_suspend) = b.first_suspend {
        timeline.push(SUSPENDED_PHASE, first_suspend, run_end);
    }

    timeline.phases
}

fn seconds_between(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> f64 {
    end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_RESUME_LOG: &str = "\
2026-02-24T18:21:04.907+0000 [INFO ] Storing policy info...
2026-02-24T18:21:06.100+0000 [INFO ] Exporting the repository data: git@example.org:ci/deploy.git
2026-02-24T18:21:10.000+0000 [INFO ] Repository data export took 3900ms
2026-02-24T18:21:20.000+0000 [INFO ] Process status: RUNNING
2026-02-24T18:21:30.500+0000 [INFO ] Assuming role arn:aws:iam::123456789012:role/ci-deployer
2026-02-24T18:21:45.000+0000 [INFO ] Connecting to Mica config service at https://mica.internal
2026-02-24T18:21:50.000+0000 [INFO ] Running helm upgrade --install webapp ./chart
2026-02-24T18:23:10.000+0000 [INFO ] STATUS: deployed
2026-02-24T18:23:12.000+0000 [INFO ] Started a process: <concord:instanceId>806f92a1-2b7e-4c8d-9f10-aa11bb22cc33</concord:instanceId>
2026-02-24T18:23:13.000+0000 [INFO ] Started a process: <concord:instanceId>c6cbe79e-5d4c-4e3b-8a29-dd44ee55ff66</concord:instanceId>
2026-02-24T18:23:15.000+0000 [INFO ] Process status: SUSPENDED
2026-02-24T18:30:00.000+0000 [INFO ] Storing policy info...
2026-02-24T18:30:01.000+0000 [INFO ] Exporting the repository data: git@example.org:ci/deploy.git
2026-02-24T18:30:13.000+0000 [INFO ] Repository data export took 12000ms
2026-02-24T18:30:20.000+0000 [INFO ] Process status: RUNNING
2026-02-24T18:30:25.000+0000 [INFO ] Process status: SUSPENDED
2026-02-24T18:40:00.000+0000 [INFO ] Storing policy info...
2026-02-24T18:40:13.000+0000 [INFO ] Repository data export took 12000ms
2026-02-24T18:40:21.000+0000 [INFO ] Process status: RUNNING
2026-02-24T18:40:30.000+0000 [INFO ] Process finished with status FINISHED
";

    #[test]
    fn detects_two_resume_cycles() {
        let result = parse(TWO_RESUME_LOG);
        assert_eq!(result.resume_count(), 2);
        assert_eq!(result.resume_overheads[0].repo_export_s, 12.0);
        assert_eq!(result.resume_overheads[0].dependency_resolution_s, 8.0);
        assert_eq!(result.resume_overheads[1].dependency_resolution_s, 9.0);
        assert!(result.total_resume_overhead_s() > 15.0);
        assert_eq!(result.suspend_times.len(), 2);
    }

    #[test]
    fn extracts_children_in_order() {
        let result = parse(TWO_RESUME_LOG);
        assert_eq!(result.children.len(), 2);
        assert!(result.children[0].starts_with("806f92a1"));
        assert!(result.children[1].starts_with("c6cbe79e"));
    }

    #[test]
    fn builds_phase_timeline() {
        let result = parse(TWO_RESUME_LOG);
        let names: Vec<&str> = result.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Init", "Bootstrap", "AWS", "Config/Mica", "Helm", SUSPENDED_PHASE]
        );

        let helm = &result.phases[4];
        assert_eq!(helm.duration_s(), 80.0);

        for pair in result.phases.windows(2) {
            assert!(pair[0].end <= pair[1].start, "{} overlaps {}", pair[0].name, pair[1].name);
        }
        for phase in &result.phases {
            assert!(phase.end >= phase.start);
        }
    }

    #[test]
    fn derived_durations() {
        let result = parse(TWO_RESUME_LOG);
        assert!((result.total_duration_s() - 1165.093).abs() < 1e-6);
        assert_eq!(result.suspended_duration_s(), 1035.0);
        assert!((result.active_duration_s() - 125.093).abs() < 1e-6);
        assert!(result.idle_pct() > 85.0);
    }

    #[test]
    fn unsorted_input_is_sorted_before_analysis() {
        let mut lines: Vec<&str> = TWO_RESUME_LOG.lines().collect();
        lines.reverse();
        let reversed = lines.join("\n");
        let result = parse(&reversed);
        assert_eq!(result, parse(TWO_RESUME_LOG));
    }

    #[test]
    fn ignores_unmatched_lines() {
        let log = "\
banner line without timestamp
2026-02-24T18:21:04.907+0000 [INFO ] Storing policy info...
    continuation of a stack trace
2026-02-24T18:21:06.100+0000 [WARN ] Exporting the repository data
";
        let result = parse(log);
        assert_eq!(result.phases.len(), 1);
        assert_eq!(result.phases[0].name, "Init");
        assert!((result.total_duration_s() - 1.193).abs() < 1e-6);
    }

    #[test]
    fn empty_log_yields_zeroed_result() {
        let result = parse("no timestamps here\n");
        assert_eq!(result, OrchestrationResult::default());
        assert_eq!(result.total_duration_s(), 0.0);
        assert_eq!(result.idle_pct(), 0.0);
        assert_eq!(result.resume_count(), 0);
    }

    #[test]
    fn storing_policy_before_first_running_is_not_a_resume() {
        let log = "\
2026-02-24T10:00:00.000+0000 [INFO ] Storing policy info...
2026-02-24T10:00:05.000+0000 [INFO ] Repository data export took 4000ms
2026-02-24T10:00:10.000+0000 [INFO ] Process status: RUNNING
2026-02-24T10:00:20.000+0000 [INFO ] Process status: RUNNING
";
        let result = parse(log);
        assert!(result.resume_overheads.is_empty());
    }

    #[test]
    fn resolution_time_is_clamped_at_zero() {
        let log = "\
2026-02-24T10:00:00.000+0000 [INFO ] Process status: RUNNING
2026-02-24T10:01:00.000+0000 [INFO ] Process status: SUSPENDED
2026-02-24T10:05:00.000+0000 [INFO ] Storing policy info...
2026-02-24T10:05:02.000+0000 [INFO ] Repository data export took 9000ms
2026-02-24T10:05:05.000+0000 [INFO ] Process status: RUNNING
";
        let result = parse(log);
        assert_eq!(result.resume_count(), 1);
        let overhead = &result.resume_overheads[0];
        assert_eq!(overhead.repo_export_s, 9.0);
        assert_eq!(overhead.dependency_resolution_s, 0.0);
    }

    #[test]
    fn helm_markers_after_suspend_do_not_overlap_suspended_phase() {
        let log = "\
2026-02-24T10:00:00.000+0000 [INFO ] Connecting to mica
2026-02-24T10:00:10.000+0000 [INFO ] helm upgrade starting
2026-02-24T10:01:00.000+0000 [INFO ] STATUS: deployed
2026-02-24T10:02:00.000+0000 [INFO ] Process status: SUSPENDED
2026-02-24T10:09:00.000+0000 [INFO ] Helm install/upgrade skipped on resume
2026-02-24T10:10:00.000+0000 [INFO ] Process finished
";
        let result = parse(log);
        let helm = result.phases.iter().find(|p| p.name == "Helm").unwrap();
        assert_eq!(helm.end.to_rfc3339(), "2026-02-24T10:01:00+00:00");
        for pair in result.phases.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn analyze_file_reports_missing_artifact() {
        let err = analyze_file(Path::new("/nonexistent/concord-log.txt")).unwrap_err();
        assert_eq!(err.artifact(), ARTIFACT);
    }
}
