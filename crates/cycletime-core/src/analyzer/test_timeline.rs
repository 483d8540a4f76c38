use crate::error::{read_artifact, ArtifactError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

const ARTIFACT: &str = "test timeline";

/// Pool key for workers that do not belong to a fork-join pool.
pub const DEFAULT_POOL: &str = "default";

const FORK_JOIN_POOL_TOKEN: &str = "ForkJoinPool-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Unknown,
}

impl TestStatus {
    pub fn from_label(label: &str) -> Self {
        match label {
            "passed" => TestStatus::Passed,
            "failed" => TestStatus::Failed,
            "skipped" => TestStatus::Skipped,
            _ => TestStatus::Unknown,
        }
    }
}

/// One executed test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub name: String,
    pub uid: String,
    pub status: TestStatus,
    /// Epoch milliseconds.
    pub start: i64,
    /// Epoch milliseconds.
    pub stop: i64,
    /// Milliseconds; includes retries, so it can differ from `stop - start`.
    pub duration: i64,
    pub worker: String,
    pub pool: String,
    pub flaky: bool,
    pub retries: u32,
}

/// Idle-time breakdown for one worker inside a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub tests: usize,
    pub wall_ms: i64,
    pub aggregate_ms: i64,
    pub idle_ms: i64,
    pub idle_pct: f64,
}

/// Tests sharing one concurrent execution group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub name: String,
    pub tests: Vec<TestRecord>,
}

impl PoolStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.tests.len()
    }

    pub fn start_ms(&self) -> i64 {
        self.tests.iter().map(|t| t.start).min().unwrap_or(0)
    }

    pub fn stop_ms(&self) -> i64 {
        self.tests.iter().map(|t| t.stop).max().unwrap_or(0)
    }

    pub fn wall_clock_s(&self) -> f64 {
        wall_clock_s(&self.tests)
    }

    pub fn aggregate_s(&self) -> f64 {
        aggregate_ms(&self.tests) as f64 / 1000.0
    }

    /// Aggregate test time over wall-clock span; 0 when the span is empty.
    pub fn parallelism(&self) -> f64 {
        let wall = self.wall_clock_s();
        if wall == 0.0 {
            return 0.0;
        }
        self.aggregate_s() / wall
    }

    pub fn worker_stats(&self) -> BTreeMap<String, WorkerStats> {
        let mut by_worker: BTreeMap<&str, Vec<&TestRecord>> = BTreeMap::new();
        for test in &self.tests {
            by_worker.entry(test.worker.as_str()).or_default().push(test);
        }

        by_worker
            .into_iter()
            .map(|(worker, tests)| {
                let start = tests.iter().map(|t| t.start).min().unwrap_or(0);
                let stop = tests.iter().map(|t| t.stop).max().unwrap_or(0);
                let wall_ms = stop - start;
                let aggregate_ms: i64 = tests.iter().map(|t| t.duration).sum();
                let idle_ms = (wall_ms - aggregate_ms).max(0);
                let idle_pct = if wall_ms > 0 {
                    idle_ms as f64 / wall_ms as f64 * 100.0
                } else {
                    0.0
                };
                (
                    worker.to_string(),
                    WorkerStats {
                        tests: tests.len(),
                        wall_ms,
                        aggregate_ms,
                        idle_ms,
                        idle_pct,
                    },
                )
            })
            .collect()
    }
}

/// Split of a suite into its early setup window and the main run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupPhaseSplit {
    pub setup_tests: usize,
    pub main_tests: usize,
    pub setup_duration_s: f64,
    pub all_workers: usize,
    pub setup_workers: usize,
    pub idle_workers: usize,
    pub idle_worker_names: Vec<String>,
}

impl SetupPhaseSplit {
    pub fn is_empty(&self) -> bool {
        self.setup_tests + self.main_tests == 0
    }
}

/// Heuristic share of test time spent waiting on external compute.
///
/// Tests are classified by duration alone; nothing in the timeline records
/// whether a test was actually polling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollingEstimate {
    pub aggregate_min: f64,
    pub polling_test_count: usize,
    pub polling_pct: f64,
}

/// All tests of one suite plus their pool grouping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub name: String,
    pub tests: Vec<TestRecord>,
    pub pools: BTreeMap<String, PoolStats>,
}

impl TestSuiteResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn total_tests(&self) -> usize {
        self.tests.len()
    }

    pub fn wall_clock_s(&self) -> f64 {
        wall_clock_s(&self.tests)
    }

    pub fn aggregate_s(&self) -> f64 {
        aggregate_ms(&self.tests) as f64 / 1000.0
    }

    pub fn pass_count(&self) -> usize {
        self.count_status(TestStatus::Passed)
    }

    pub fn fail_count(&self) -> usize {
        self.count_status(TestStatus::Failed)
    }

    pub fn skip_count(&self) -> usize {
        self.count_status(TestStatus::Skipped)
    }

    fn count_status(&self, status: TestStatus) -> usize {
        self.tests.iter().filter(|t| t.status == status).count()
    }

    pub fn flaky_tests(&self) -> Vec<&TestRecord> {
        self.tests.iter().filter(|t| t.flaky).collect()
    }

    pub fn failed_tests(&self) -> Vec<&TestRecord> {
        self.tests.iter().filter(|t| t.status == TestStatus::Failed).collect()
    }

    /// Pools ordered by their first test start.
    pub fn pools_by_start(&self) -> Vec<&PoolStats> {
        let mut pools: Vec<&PoolStats> = self.pools.values().collect();
        pools.sort_by_key(|p| p.start_ms());
        pools
    }

    /// Wall-clock of every pool that only started after its predecessor finished,
    /// i.e. time that could have overlapped with the earlier pool.
    pub fn sequential_pool_waste_s(&self) -> f64 {
        self.pools_by_start()
            .windows(2)
            .filter(|pair| pair[1].start_ms() > pair[0].stop_ms())
            .map(|pair| pair[1].wall_clock_s())
            .sum()
    }

    /// Split tests at `threshold_s` after the first test start. Workers with no
    /// test in the early window count as idle during setup.
    pub fn setup_phase_analysis(&self, threshold_s: f64) -> SetupPhaseSplit {
        let Some(first_start) = self.tests.iter().map(|t| t.start).min() else {
            return SetupPhaseSplit::default();
        };
        let cutoff = first_start as f64 + threshold_s * 1000.0;

        let (setup, main): (Vec<&TestRecord>, Vec<&TestRecord>) =
            self.tests.iter().partition(|t| (t.start as f64) < cutoff);

        let all_workers: BTreeSet<&str> = self.tests.iter().map(|t| t.worker.as_str()).collect();
        let setup_workers: BTreeSet<&str> = setup.iter().map(|t| t.worker.as_str()).collect();
        let idle_worker_names: Vec<String> = all_workers
            .difference(&setup_workers)
            .map(|w| w.to_string())
            .collect();

        SetupPhaseSplit {
            setup_tests: setup.len(),
            main_tests: main.len(),
            setup_duration_s: threshold_s,
            all_workers: all_workers.len(),
            setup_workers: setup_workers.len(),
            idle_workers: idle_worker_names.len(),
            idle_worker_names,
        }
    }

    /// Estimate the share of aggregate time taken by tests longer than
    /// `threshold_ms`, which are assumed to be dominated by compute polling.
    pub fn polling_analysis(&self, threshold_ms: i64) -> PollingEstimate {
        if self.tests.is_empty() {
            return PollingEstimate::default();
        }
        let total_ms = aggregate_ms(&self.tests);
        let polling: Vec<&TestRecord> = self.tests.iter().filter(|t| t.duration > threshold_ms).collect();
        let polling_ms: i64 = polling.iter().map(|t| t.duration).sum();
        let polling_pct = if total_ms > 0 {
            polling_ms as f64 / total_ms as f64 * 100.0
        } else {
            0.0
        };

        PollingEstimate {
            aggregate_min: total_ms as f64 / 60_000.0,
            polling_test_count: polling.len(),
            polling_pct,
        }
    }
}

fn wall_clock_s(tests: &[TestRecord]) -> f64 {
    let start = tests.iter().map(|t| t.start).min();
    let stop = tests.iter().map(|t| t.stop).max();
    match (start, stop) {
        (Some(start), Some(stop)) => (stop - start) as f64 / 1000.0,
        _ => 0.0,
    }
}

fn aggregate_ms(tests: &[TestRecord]) -> i64 {
    tests.iter().map(|t| t.duration).sum()
}

/// Derive the pool key from a worker thread name.
///
/// `3423@host.ForkJoinPool-1-worker-7(35)` belongs to `Pool-1`; names without a
/// fork-join token (`pid-20-worker-8`) share the default pool.
pub fn extract_pool(worker_name: &str) -> String {
    match worker_name.split_once(FORK_JOIN_POOL_TOKEN) {
        Some((_, rest)) => {
            let index = rest.split('-').next().unwrap_or_default();
            format!("Pool-{}", index)
        }
        None => DEFAULT_POOL.to_string(),
    }
}

// Wire format: host -> worker -> test.

#[derive(Debug, Deserialize)]
struct TimelineReport {
    #[serde(default)]
    children: Vec<TimelineHost>,
}

#[derive(Debug, Deserialize)]
struct TimelineHost {
    #[serde(default)]
    children: Vec<TimelineWorker>,
}

#[derive(Debug, Deserialize)]
struct TimelineWorker {
    name: String,
    #[serde(default)]
    children: Vec<TimelineTest>,
}

#[derive(Debug, Deserialize)]
struct TimelineTest {
    name: String,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    flaky: bool,
    #[serde(default, rename = "retriesCount")]
    retries_count: u32,
    time: TimelineTime,
}

#[derive(Debug, Deserialize)]
struct TimelineTime {
    start: i64,
    stop: i64,
    duration: i64,
}

/// Analyze a timeline report file for the named suite.
pub fn analyze_file(path: &Path, suite_name: &str) -> Result<TestSuiteResult> {
    let content = read_artifact(ARTIFACT, path)?;
    parse(&content, suite_name)
}

/// Analyze timeline report JSON for the named suite.
pub fn parse(content: &str, suite_name: &str) -> Result<TestSuiteResult> {
    let report: TimelineReport = serde_json::from_str(content).map_err(|source| ArtifactError::Malformed {
        artifact: ARTIFACT,
        source,
    })?;

    let mut result = TestSuiteResult::new(suite_name);

    for host in report.children {
        for worker in host.children {
            let pool = extract_pool(&worker.name);
            for test in worker.children {
                let record = TestRecord {
                    name: test.name,
                    uid: test.uid.unwrap_or_default(),
                    status: test
                        .status
                        .as_deref()
                        .map(TestStatus::from_label)
                        .unwrap_or(TestStatus::Unknown),
                    start: test.time.start,
                    stop: test.time.stop,
                    duration: test.time.duration,
                    worker: worker.name.clone(),
                    pool: pool.clone(),
                    flaky: test.flaky,
                    retries: test.retries_count,
                };
                result
                    .pools
                    .entry(pool.clone())
                    .or_insert_with(|| PoolStats::new(pool.clone()))
                    .tests
                    .push(record.clone());
                result.tests.push(record);
            }
        }
    }

    debug!(
        suite = suite_name,
        tests = result.tests.len(),
        pools = result.pools.len(),
        "parsed test timeline"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(worker: &str, start: i64, stop: i64, duration: i64) -> TestRecord {
        TestRecord {
            name: format!("test-{}-{}", worker, start),
            uid: format!("{}-{}", worker, start),
            status: TestStatus::Passed,
            start,
            stop,
            duration,
            worker: worker.to_string(),
            pool: extract_pool(worker),
            flaky: false,
            retries: 0,
        }
    }

    fn suite(records: Vec<TestRecord>) -> TestSuiteResult {
        let mut result = TestSuiteResult::new("Suite");
        for r in records {
            result
                .pools
                .entry(r.pool.clone())
                .or_insert_with(|| PoolStats::new(r.pool.clone()))
                .tests
                .push(r.clone());
            result.tests.push(r);
        }
        result
    }

    #[test]
    fn extracts_fork_join_pool_index() {
        assert_eq!(extract_pool("3423@host.ForkJoinPool-1-worker-7(35)"), "Pool-1");
        assert_eq!(extract_pool("3423@host.ForkJoinPool-12-worker-3(9)"), "Pool-12");
        assert_eq!(extract_pool("pid-20-worker-8"), DEFAULT_POOL);
    }

    #[test]
    fn parses_nested_report() {
        let report = json!({
            "children": [{
                "name": "host-a",
                "children": [
                    {
                        "name": "1@h.ForkJoinPool-1-worker-1(1)",
                        "children": [
                            {"name": "a", "uid": "u1", "status": "passed", "flaky": false, "retriesCount": 0,
                             "time": {"start": 1000, "stop": 3000, "duration": 2000}},
                            {"name": "b", "uid": "u2", "status": "failed", "flaky": true, "retriesCount": 2,
                             "time": {"start": 3000, "stop": 9000, "duration": 7000}}
                        ]
                    },
                    {
                        "name": "pid-20-worker-8",
                        "children": [
                            {"name": "c", "time": {"start": 2000, "stop": 2500, "duration": 500}}
                        ]
                    }
                ]
            }]
        });

        let result = parse(&report.to_string(), "Mixed").unwrap();
        assert_eq!(result.name, "Mixed");
        assert_eq!(result.total_tests(), 3);
        assert_eq!(result.pass_count(), 1);
        assert_eq!(result.fail_count(), 1);
        assert_eq!(result.flaky_tests().len(), 1);
        assert_eq!(result.flaky_tests()[0].retries, 2);
        assert_eq!(result.tests[2].status, TestStatus::Unknown);
        assert_eq!(result.tests[2].uid, "");
        assert_eq!(result.pools.len(), 2);
        assert_eq!(result.pools["Pool-1"].count(), 2);
        assert_eq!(result.pools[DEFAULT_POOL].count(), 1);
        assert_eq!(result.wall_clock_s(), 8.0);
        assert_eq!(result.aggregate_s(), 9.5);
    }

    #[test]
    fn missing_required_time_is_malformed() {
        let report = json!({"children": [{"children": [{"name": "w", "children": [{"name": "t"}]}]}]});
        let err = parse(&report.to_string(), "Broken").unwrap_err();
        assert!(matches!(err, ArtifactError::Malformed { .. }));
    }

    #[test]
    fn empty_report_yields_zero_metrics() {
        let result = parse("{}", "Empty").unwrap();
        assert_eq!(result.total_tests(), 0);
        assert_eq!(result.wall_clock_s(), 0.0);
        assert_eq!(result.aggregate_s(), 0.0);
        assert_eq!(result.sequential_pool_waste_s(), 0.0);
        assert!(result.setup_phase_analysis(340.0).is_empty());
        assert_eq!(result.polling_analysis(16_000), PollingEstimate::default());
    }

    #[test]
    fn concurrent_pool_parallelism_is_at_least_one() {
        let pool = suite(vec![
            record("ForkJoinPool-1-worker-1", 0, 10_000, 10_000),
            record("ForkJoinPool-1-worker-2", 0, 10_000, 10_000),
            record("ForkJoinPool-1-worker-3", 2_000, 8_000, 6_000),
        ]);
        let stats = &pool.pools["Pool-1"];
        assert!(stats.parallelism() >= 1.0);
        assert!((stats.parallelism() - 2.6).abs() < 1e-9);
    }

    #[test]
    fn zero_width_pool_has_zero_parallelism() {
        let pool = suite(vec![record("ForkJoinPool-1-worker-1", 5_000, 5_000, 0)]);
        assert_eq!(pool.pools["Pool-1"].parallelism(), 0.0);

        let single = suite(vec![record("ForkJoinPool-1-worker-1", 0, 4_000, 4_000)]);
        assert_eq!(single.pools["Pool-1"].parallelism(), 1.0);
    }

    #[test]
    fn worker_idle_time_is_floored_at_zero() {
        let s = suite(vec![
            record("w1", 0, 1_000, 1_000),
            record("w1", 5_000, 6_000, 1_000),
            // Retries make duration exceed the observed span.
            record("w2", 0, 1_000, 3_000),
        ]);
        let stats = s.pools[DEFAULT_POOL].worker_stats();
        assert_eq!(stats["w1"].wall_ms, 6_000);
        assert_eq!(stats["w1"].idle_ms, 4_000);
        assert!((stats["w1"].idle_pct - 66.666).abs() < 0.01);
        assert_eq!(stats["w2"].idle_ms, 0);
    }

    #[test]
    fn sequential_pools_count_later_wall_clock_as_waste() {
        let s = suite(vec![
            record("ForkJoinPool-1-worker-1", 0, 222_000, 200_000),
            record("ForkJoinPool-2-worker-1", 225_000, 283_000, 58_000),
        ]);
        assert!(s.pools["Pool-2"].start_ms() > s.pools["Pool-1"].stop_ms());
        assert_eq!(s.sequential_pool_waste_s(), 58.0);
    }

    #[test]
    fn overlapping_pools_have_no_waste() {
        let s = suite(vec![
            record("ForkJoinPool-1-worker-1", 0, 100_000, 100_000),
            record("ForkJoinPool-2-worker-1", 50_000, 150_000, 100_000),
        ]);
        assert_eq!(s.sequential_pool_waste_s(), 0.0);
    }

    #[test]
    fn setup_split_covers_every_test() {
        let s = suite(vec![
            record("w1", 0, 60_000, 60_000),
            record("w1", 60_000, 200_000, 140_000),
            record("w2", 350_000, 400_000, 50_000),
            record("w3", 341_000, 360_000, 19_000),
            record("w3", 339_999, 341_000, 1_001),
        ]);
        for threshold in [0.0, 100.0, 340.0, 1_000.0] {
            let split = s.setup_phase_analysis(threshold);
            assert_eq!(split.setup_tests + split.main_tests, s.total_tests());
        }

        let split = s.setup_phase_analysis(340.0);
        assert_eq!(split.setup_tests, 3);
        assert_eq!(split.main_tests, 2);
        assert_eq!(split.all_workers, 3);
        assert_eq!(split.idle_workers, 1);
        assert_eq!(split.idle_worker_names, vec!["w2".to_string()]);
    }

    #[test]
    fn polling_estimate_uses_strict_threshold() {
        let s = suite(vec![
            record("w1", 0, 16_000, 16_000),
            record("w1", 16_000, 76_000, 60_000),
            record("w2", 0, 24_000, 24_000),
        ]);
        let polling = s.polling_analysis(16_000);
        assert_eq!(polling.polling_test_count, 2);
        assert!((polling.polling_pct - 84.0).abs() < 1e-9);
        assert!((polling.aggregate_min - 1.6667).abs() < 1e-3);
    }
}
