use crate::analyzer::app_logs::{DIALECT_MISMATCH, QUEUE_BLOCKING};
use crate::analyzer::report::{CorrelationResult, Difficulty, Finding, Priority};
use crate::analyzer::RunAnalysis;
use crate::config::Thresholds;
use tracing::debug;

/// Longest prefix of a test name quoted in a finding title.
const TITLE_NAME_CHARS: usize = 30;

/// Idle workers listed by name in the setup-chain evidence.
const LISTED_IDLE_WORKERS: usize = 3;

/// Cross-correlate all source results into findings.
///
/// Every finding type is gated independently and emitted in its fixed rank
/// position; the same inputs always produce the same findings and text.
pub fn correlate(run: &RunAnalysis, thresholds: &Thresholds) -> CorrelationResult {
    let mut findings = Vec::new();

    findings.extend(resume_overhead(run));
    findings.extend(sequential_child_checks(run));
    findings.extend(pod_startup_latency(run));
    findings.extend(sequential_pools(run));
    findings.extend(setup_chain(run, thresholds));
    findings.extend(polling_interval(run, thresholds));
    findings.extend(resource_headroom(run, thresholds));
    findings.extend(log_warnings(run));
    findings.extend(flaky_e2e_test(run));

    debug!(findings = findings.len(), "correlation complete");

    CorrelationResult {
        findings,
        window_start: run.orchestration.start,
        window_end: run.orchestration.end,
    }
}

fn resume_overhead(run: &RunAnalysis) -> Option<Finding> {
    let orch = &run.orchestration;
    if orch.resume_overheads.is_empty() {
        return None;
    }
    let cycles = orch.resume_count();
    let total = orch.total_resume_overhead_s();
    let per_resume = total / cycles as f64;

    Some(Finding {
        rank: 1,
        title: "Reduce Concord Resume Overhead".to_string(),
        description: format!(
            "Each time the Concord parent resumes to check a child process, it redundantly \
            re-exports the repository and re-resolves dependencies (~{:.0}s per resume). \
            With {} sequential child checks, this wastes ~{:.0}s.",
            per_resume, cycles, total,
        ),
        evidence: format!(
            "Concord logs show repo export + dependency resolution repeated on each of the \
            {} resume cycles.",
            cycles,
        ),
        estimated_savings: format!("{:.0}s", total),
        difficulty: Difficulty::Low,
        priority: Priority::P1,
    })
}

fn sequential_child_checks(run: &RunAnalysis) -> Option<Finding> {
    let orch = &run.orchestration;
    if orch.children.len() <= 1 || orch.resume_count() <= 1 {
        return None;
    }
    let per_cycle = orch.total_resume_overhead_s() / orch.resume_count() as f64;

    Some(Finding {
        rank: 2,
        title: "Parallelize Concord Child Checking".to_string(),
        description: format!(
            "The Concord parent checks children sequentially: it resumes for one child, \
            confirms completion, re-suspends, then later resumes for the next. If all \
            children are checked in a single resume, extra suspend/resume cycles (with \
            ~{:.0}s overhead each) are eliminated.",
            per_cycle,
        ),
        evidence: format!(
            "{} separate suspend/resume cycles in orchestration logs, {} children already \
            running in parallel.",
            orch.resume_count(),
            orch.children.len(),
        ),
        estimated_savings: "30-45s".to_string(),
        difficulty: Difficulty::Medium,
        priority: Priority::P1,
    })
}

fn pod_startup_latency(run: &RunAnalysis) -> Option<Finding> {
    let job_id = run.dispatcher.job_id.as_deref()?;
    let span = run.dispatcher.total_duration_s();
    let compute = run.dispatcher.compute_duration_s();

    Some(Finding {
        rank: 3,
        title: "Reduce K8s Pod Startup Latency".to_string(),
        description: format!(
            "Dispatcher job {} pod took significant time from scheduling to first log, but \
            its logs span only {:.0}s ({:.0}s of actual compute). This overhead suggests \
            opportunity in pod pre-warming or smaller container images.",
            job_id, span, compute,
        ),
        evidence: format!(
            "Job {} pod: {:.0}s log span, {:.0}s compute.",
            job_id, span, compute
        ),
        estimated_savings: "60-120s".to_string(),
        difficulty: Difficulty::Medium,
        priority: Priority::P1,
    })
}

fn sequential_pools(run: &RunAnalysis) -> Option<Finding> {
    let suite = &run.integration;
    let pools = suite.pools_by_start();
    let (first, later) = (pools.first()?, pools.last()?);
    if pools.len() < 2 || later.start_ms() <= first.stop_ms() {
        return None;
    }
    let waste = later.wall_clock_s();

    Some(Finding {
        rank: 4,
        title: format!("Run {} ForkJoinPools Concurrently", suite.name),
        description: format!(
            "{} ({} tests, {:.1}s) and {} ({} tests, {:.1}s) execute sequentially. \
            Running them concurrently would save ~{:.0}s.",
            first.name,
            first.count(),
            first.wall_clock_s(),
            later.name,
            later.count(),
            later.wall_clock_s(),
            waste,
        ),
        evidence: format!(
            "{} starts after {} ends. {} parallelism: {:.2}x.",
            later.name,
            first.name,
            later.name,
            later.parallelism(),
        ),
        estimated_savings: format!("~{:.0}s", waste),
        difficulty: Difficulty::Low,
        priority: Priority::P2,
    })
}

fn setup_chain(run: &RunAnalysis, thresholds: &Thresholds) -> Option<Finding> {
    let suite = &run.e2e;
    let setup = suite.setup_phase_analysis(thresholds.setup_cutoff_secs);
    if setup.is_empty() || setup.idle_workers == 0 {
        return None;
    }
    let listed: Vec<&str> = setup
        .idle_worker_names
        .iter()
        .take(LISTED_IDLE_WORKERS)
        .map(String::as_str)
        .collect();
    let more = if setup.idle_workers > LISTED_IDLE_WORKERS { "..." } else { "" };

    Some(Finding {
        rank: 5,
        title: format!("Parallelize {} Setup Chain", suite.name),
        description: format!(
            "The first {:.0}s of {} execution is a mostly-sequential setup chain. Only {} \
            tests run, while {} workers sit idle.",
            setup.setup_duration_s, suite.name, setup.setup_tests, setup.idle_workers,
        ),
        evidence: format!(
            "Only {} tests in first {:.0}s. Workers {}{} idle for the whole setup window.",
            setup.setup_tests,
            setup.setup_duration_s,
            listed.join(", "),
            more,
        ),
        estimated_savings: "100-170s".to_string(),
        difficulty: Difficulty::Medium,
        priority: Priority::P2,
    })
}

fn polling_interval(run: &RunAnalysis, thresholds: &Thresholds) -> Option<Finding> {
    let suite = &run.e2e;
    let polling = suite.polling_analysis(thresholds.polling_threshold_ms);
    if polling.polling_pct <= thresholds.polling_finding_pct {
        return None;
    }

    Some(Finding {
        rank: 6,
        title: format!("Reduce {} Polling Interval", suite.name),
        description: format!(
            "{} aggregate runtime is dominated by long-running compute waits; an inferred \
            {:.1}% of aggregate time is in long-running (likely polling) tests. Precise \
            polling-vs-non-polling attribution is not observable from test timelines alone. \
            Reducing poll interval from 20s to 5s would cut average overshoot.",
            suite.name, polling.polling_pct,
        ),
        evidence: format!(
            "{:.1}% of {:.1} min aggregate time in long-running tests (inferred heuristic: \
            tests >{:.0}s classified as polling-dominated).",
            polling.polling_pct,
            polling.aggregate_min,
            thresholds.polling_threshold_ms as f64 / 1000.0,
        ),
        estimated_savings: "30-60s".to_string(),
        difficulty: Difficulty::Low,
        priority: Priority::P2,
    })
}

fn resource_headroom(run: &RunAnalysis, thresholds: &Thresholds) -> Option<Finding> {
    let metrics = &run.metrics;
    if !metrics.has_headroom(thresholds) {
        return None;
    }
    let cpu = metrics.cpu.as_ref()?;
    let active_max = metrics.pool_active.as_ref().map_or(0, |a| a.max as i64);
    let memory = metrics
        .memory
        .as_ref()
        .map(|m| format!("memory stable at ~{:.1}GB, ", m.average / 1e9))
        .unwrap_or_default();

    Some(Finding {
        rank: 7,
        title: "Application Has Massive Resource Headroom".to_string(),
        description: format!(
            "CPU peaked at {:.2} cores during warmup, averaged {:.1} during tests. HikariCP \
            max {} active connections, zero pending. The application is NOT the bottleneck.",
            cpu.max, cpu.average, active_max,
        ),
        evidence: format!(
            "CPU avg {:.2} cores, {}zero HikariCP pending connections.",
            cpu.average, memory,
        ),
        estimated_savings: "N/A".to_string(),
        difficulty: Difficulty::NotApplicable,
        priority: Priority::Informational,
    })
}

fn log_warnings(run: &RunAnalysis) -> Vec<Finding> {
    let mut findings = Vec::new();

    for warning in &run.app_logs.warnings {
        match warning.category.as_str() {
            QUEUE_BLOCKING => {
                let worst = warning
                    .worst_case
                    .as_deref()
                    .map(|w| format!(", worst case {}", w))
                    .unwrap_or_default();
                findings.push(Finding {
                    rank: 8,
                    title: "Fix EffectConsumer Queue Blocking".to_string(),
                    description: format!(
                        "{} warnings where messages blocked the EffectConsumer queue{}.",
                        warning.count, worst,
                    ),
                    evidence: format!("{} queue-blocking warnings in application logs.", warning.count),
                    estimated_savings: "<2s".to_string(),
                    difficulty: Difficulty::Low,
                    priority: Priority::P3,
                });
            }
            DIALECT_MISMATCH => findings.push(Finding {
                rank: 9,
                title: "Fix Hibernate Dialect Mismatch".to_string(),
                description: "MariaDB dialect is configured but the database is MySQL 8.0.".to_string(),
                evidence: "Hibernate dialect mismatch warning in application logs.".to_string(),
                estimated_savings: "None directly".to_string(),
                difficulty: Difficulty::Low,
                priority: Priority::P3,
            }),
            _ => {}
        }
    }

    findings
}

fn flaky_e2e_test(run: &RunAnalysis) -> Option<Finding> {
    let suite = &run.e2e;
    let failed = suite.failed_tests();
    let test = failed.first()?;
    let short_name: String = test.name.chars().take(TITLE_NAME_CHARS).collect();

    Some(Finding {
        rank: 10,
        title: format!("Investigate Flaky {} \"{}...\" Test", suite.name, short_name),
        description: format!(
            "One test fails on its first attempt, wasting {:.1}s.",
            test.duration as f64 / 1000.0,
        ),
        evidence: format!(
            "{} failure{} out of {} tests.",
            failed.len(),
            if failed.len() == 1 { "" } else { "s" },
            suite.total_tests(),
        ),
        estimated_savings: format!("~{}s when it flakes", test.duration / 1000),
        difficulty: Difficulty::Medium,
        priority: Priority::P3,
    })
}
