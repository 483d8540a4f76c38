use super::thousands;
use crate::analyzer::orchestration::SUSPENDED_PHASE;
use crate::analyzer::report::{format_duration, CorrelationResult, Finding, Priority};
use crate::analyzer::test_timeline::TestSuiteResult;
use crate::analyzer::RunAnalysis;
use crate::config::Thresholds;
use chrono::NaiveDate;

/// Findings summarised at the top of the report.
const TOP_FINDINGS: usize = 5;

/// Render the full markdown analysis report.
///
/// The date is supplied by the caller so the same inputs always render the
/// same document.
pub fn render_markdown(
    run: &RunAnalysis,
    correlation: &CorrelationResult,
    thresholds: &Thresholds,
    generated_on: NaiveDate,
) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("# CI Pipeline Comprehensive Analysis Report".to_string());
    lines.push(String::new());
    lines.push(format!("**Date:** {}", generated_on.format("%Y-%m-%d")));
    lines.push(
        "**Scope:** Full pipeline from orchestration through deployment to test completion".to_string(),
    );
    lines.push(format!(
        "**Data Sources:** Concord orchestration logs, {} integration tests, {} E2E tests, \
        application logs and metrics",
        run.integration.name, run.e2e.name,
    ));
    push_rule(&mut lines);

    executive_summary(&mut lines, run, correlation);
    push_rule(&mut lines);

    lines.push("## 2. End-to-End Timeline".to_string());
    lines.push(String::new());
    timeline(&mut lines, run, thresholds);
    push_rule(&mut lines);

    lines.push("## 3. Ranked Optimization Opportunities".to_string());
    lines.push(String::new());
    for f in &correlation.findings {
        lines.push(format!("### Rank {}: {}", f.rank, f.title));
        lines.push(format!("- **Description:** {}", f.description));
        lines.push(format!("- **Evidence:** {}", f.evidence));
        lines.push(format!("- **Estimated savings:** {}", f.estimated_savings));
        lines.push(format!("- **Difficulty:** {}", f.difficulty.label()));
        lines.push(format!("- **Priority:** {}", f.priority.symbol()));
        lines.push(String::new());
    }
    push_rule(&mut lines);

    lines.push("## 4. Detailed Findings".to_string());
    lines.push(String::new());
    orchestration_details(&mut lines, run);
    integration_details(&mut lines, &run.integration);
    e2e_details(&mut lines, &run.e2e, thresholds);
    application_details(&mut lines, run, correlation);
    push_rule(&mut lines);

    recommendations(&mut lines, correlation);
    push_rule(&mut lines);

    lines.push(format!(
        "*Report generated from CI pipeline execution. Data sources: Concord orchestration logs, \
        {} test results ({} tests), {} test results ({} tests), application metrics and logs.*",
        run.integration.name,
        thousands(run.integration.total_tests()),
        run.e2e.name,
        thousands(run.e2e.total_tests()),
    ));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn push_rule(lines: &mut Vec<String>) {
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());
}

fn executive_summary(lines: &mut Vec<String>, run: &RunAnalysis, correlation: &CorrelationResult) {
    let (int, e2e) = (&run.integration, &run.e2e);
    let orchestration_s = run.orchestration.total_duration_s();
    let end_to_end = orchestration_s + int.wall_clock_s().max(e2e.wall_clock_s());

    lines.push("## 1. Executive Summary".to_string());
    lines.push(String::new());
    lines.push(format!(
        "The full CI pipeline completed in approximately **{} end-to-end**: {} for \
        orchestration/deployment (Concord) followed by overlapping test execution \
        ({}: {}, {}: {}).",
        format_duration(end_to_end),
        format_duration(orchestration_s),
        int.name,
        format_duration(int.wall_clock_s()),
        e2e.name,
        format_duration(e2e.wall_clock_s()),
    ));
    lines.push(String::new());

    let total = int.total_tests() + e2e.total_tests();
    let failed = int.fail_count() + e2e.fail_count();
    let skipped = int.skip_count() + e2e.skip_count();
    let outcome = if failed == 0 && skipped == 0 {
        format!("**All {} tests passed**", thousands(total))
    } else {
        format!(
            "Across {} total tests ({} {} + {} {}): **{} passed, {} failed, and {} skipped**",
            thousands(total),
            thousands(int.total_tests()),
            int.name,
            thousands(e2e.total_tests()),
            e2e.name,
            thousands(int.pass_count() + e2e.pass_count()),
            failed,
            skipped,
        )
    };
    lines.push(format!("{}.", outcome));
    lines.push(String::new());

    lines.push("### Top Findings".to_string());
    lines.push(String::new());
    for f in correlation.findings.iter().take(TOP_FINDINGS) {
        lines.push(format!("{}. **{}.** {}", f.rank, f.title, f.description));
        lines.push(String::new());
    }
}

fn timeline(lines: &mut Vec<String>, run: &RunAnalysis, thresholds: &Thresholds) {
    let orch = &run.orchestration;

    lines.push("```".to_string());
    if let Some(start) = orch.start {
        lines.push(format!(
            "Time (UTC)  {}    +5m      +10m     +15m     +20m     +25m     +30m     +35m",
            start.format("%H:%M")
        ));
    }
    lines.push("            |--------|--------|--------|--------|--------|--------|--------|".to_string());
    lines.push(String::new());

    let active: Vec<String> = orch
        .phases
        .iter()
        .filter(|p| p.name != SUSPENDED_PHASE)
        .map(|p| format_duration(p.duration_s()))
        .collect();
    lines.push("CONCORD     [Init|Bootstrap|AWS|Config|Helm]".to_string());
    lines.push(format!("  ({})  |{}|", format_duration(orch.total_duration_s()), active.join("|")));
    lines.push(format!("{:45}[SUSPENDED ~~~~~~~~~~~~~~~~]", ""));
    if !orch.children.is_empty() {
        let waits: Vec<String> = orch
            .children
            .iter()
            .take(2)
            .map(|c| format!("wait {}", c.chars().take(8).collect::<String>()))
            .collect();
        lines.push(format!("{:46}{}", "", waits.join("   ")));
    }
    lines.push(String::new());

    if let Some(job_id) = &run.dispatcher.job_id {
        lines.push(format!(
            "K8S DEPLOY{:31}[--- pod startup ---][{:.0}s]",
            "",
            run.dispatcher.total_duration_s()
        ));
        lines.push(format!("  Job {:<30}scheduled              running", job_id));
        lines.push(String::new());
    }

    let int = &run.integration;
    lines.push(format!(
        "{:<51}[=== {} =========]",
        format!("{} TESTS", int.name.to_uppercase()),
        format_duration(int.wall_clock_s())
    ));
    for pool in int.pools_by_start() {
        lines.push(format!(
            "  {:<49}[{} {:.0}s ========]",
            pool.name,
            pool.name,
            pool.wall_clock_s()
        ));
    }
    lines.push(String::new());

    let e2e = &run.e2e;
    lines.push(format!(
        "{:<51}[====== {} =======>",
        e2e.name.to_uppercase(),
        format_duration(e2e.wall_clock_s())
    ));
    let setup = e2e.setup_phase_analysis(thresholds.setup_cutoff_secs);
    if !setup.is_empty() {
        lines.push(format!("  {:<49}[--- {:.0}s setup --]", "Setup", setup.setup_duration_s));
        lines.push(format!(
            "  {:<61}[~{:.0}s ===>",
            "Main tests",
            (e2e.wall_clock_s() - setup.setup_duration_s).max(0.0)
        ));
    }
    lines.push(String::new());

    if let Some(cpu) = &run.metrics.cpu {
        let memory_gb = run.metrics.memory.as_ref().map_or(0.0, |m| m.average / 1e9);
        let active_max = run.metrics.pool_active.as_ref().map_or(0, |a| a.max as i64);
        let pending_max = run.metrics.pool_pending.as_ref().map_or(0, |p| p.max as i64);
        lines.push(format!(
            "WEBAPP      [startup ~warmup~][--- stable {:.1}-{:.1} CPU, {:.1}GB mem -------->",
            cpu.average,
            cpu.average + 0.2,
            memory_gb
        ));
        lines.push(format!(
            "            CPU peak {:.2}c    HikariCP max {} conn, {} pending",
            cpu.max, active_max, pending_max
        ));
    }

    lines.push("```".to_string());
    lines.push(String::new());
    lines.push(
        "**Legend:** `[===]` active work, `[~~~]` idle/suspended, `[-->` continues, `|` phase boundary"
            .to_string(),
    );
}

fn orchestration_details(lines: &mut Vec<String>, run: &RunAnalysis) {
    let orch = &run.orchestration;
    let total = orch.total_duration_s();
    let pct = |secs: f64| if total > 0.0 { secs / total * 100.0 } else { 0.0 };

    lines.push("### 4.1 Concord Orchestration".to_string());
    lines.push(String::new());
    lines.push("| Phase | Duration | % of Total |".to_string());
    lines.push("|---|---|---|".to_string());
    for phase in &orch.phases {
        lines.push(format!(
            "| {} | {} | {:.1}% |",
            phase.name,
            format_duration(phase.duration_s()),
            pct(phase.duration_s())
        ));
    }
    if !orch.resume_overheads.is_empty() {
        let overhead = orch.total_resume_overhead_s();
        lines.push(format!("| Active overhead on resume | ~{:.0}s | {:.1}% |", overhead, pct(overhead)));
    }
    lines.push(String::new());

    let active = total - orch.suspended_duration_s();
    lines.push(format!(
        "**Active work is only {} ({:.1}%).** The vast majority of the orchestration phase is \
        spent waiting for child processes.",
        format_duration(active),
        pct(active)
    ));
    lines.push(String::new());
}

fn pass_rate(suite: &TestSuiteResult) -> String {
    match suite.total_tests() {
        0 => "n/a".to_string(),
        _ if suite.fail_count() == 0 => "100%".to_string(),
        total => format!("{:.1}%", suite.pass_count() as f64 / total as f64 * 100.0),
    }
}

fn integration_details(lines: &mut Vec<String>, suite: &TestSuiteResult) {
    lines.push(format!("### 4.2 {} Integration Tests", suite.name));
    lines.push(String::new());
    lines.push("| Metric | Value |".to_string());
    lines.push("|---|---|".to_string());
    lines.push(format!("| Total tests | {} |", thousands(suite.total_tests())));
    lines.push(format!("| Pass rate | {} |", pass_rate(suite)));
    lines.push(format!("| Retries/flaky | {} |", suite.flaky_tests().len()));
    lines.push(format!(
        "| Wall-clock | {:.1}s ({}) |",
        suite.wall_clock_s(),
        format_duration(suite.wall_clock_s())
    ));
    lines.push(format!("| Aggregate CPU time | {} |", format_duration(suite.aggregate_s())));
    lines.push(String::new());

    for pool in suite.pools.values() {
        lines.push(format!(
            "**{} ({} tests, {:.1}s):** Parallelism ratio {:.2}x.",
            pool.name,
            thousands(pool.count()),
            pool.wall_clock_s(),
            pool.parallelism()
        ));
        lines.push(String::new());
    }
}

fn e2e_details(lines: &mut Vec<String>, suite: &TestSuiteResult, thresholds: &Thresholds) {
    let wall = suite.wall_clock_s();

    lines.push(format!("### 4.3 {} E2E Tests", suite.name));
    lines.push(String::new());
    lines.push("| Metric | Value |".to_string());
    lines.push("|---|---|".to_string());
    lines.push(format!("| Total tests | {} |", thousands(suite.total_tests())));
    lines.push(format!(
        "| Pass rate | {} ({} failed, {} skipped) |",
        pass_rate(suite),
        suite.fail_count(),
        suite.skip_count()
    ));
    lines.push(format!("| Wall-clock | {:.1}s ({}) |", wall, format_duration(wall)));
    lines.push(format!("| Aggregate time | {:.1} min |", suite.aggregate_s() / 60.0));
    if suite.total_tests() > 0 {
        let polling = suite.polling_analysis(thresholds.polling_threshold_ms);
        lines.push(format!(
            "| Compute wait % | {:.1}% (inferred from aggregate durations) |",
            polling.polling_pct
        ));
    }
    lines.push(String::new());

    let setup = suite.setup_phase_analysis(thresholds.setup_cutoff_secs);
    if !setup.is_empty() && wall > 0.0 {
        lines.push(format!(
            "**Two-phase structure.** The first {:.0}s ({:.0}% of wall-clock) runs only {} tests \
            with low parallelism. The remaining {:.0}s runs {} tests across {} workers.",
            setup.setup_duration_s,
            setup.setup_duration_s / wall * 100.0,
            setup.setup_tests,
            (wall - setup.setup_duration_s).max(0.0),
            setup.main_tests,
            setup.all_workers
        ));
        lines.push(String::new());
    }
}

fn application_details(lines: &mut Vec<String>, run: &RunAnalysis, correlation: &CorrelationResult) {
    let metrics = &run.metrics;

    lines.push("### 4.4 Application Logs and Metrics".to_string());
    lines.push(String::new());
    if correlation.count_priority(Priority::Informational) > 0 {
        lines.push("**The application is not the bottleneck.**".to_string());
        lines.push(String::new());
    }

    lines.push("| Resource | Status |".to_string());
    lines.push("|---|---|".to_string());
    if let Some(cpu) = &metrics.cpu {
        lines.push(format!(
            "| CPU | Peaked at {:.2} cores, averaged {:.2} |",
            cpu.max, cpu.average
        ));
    }
    if let Some(memory) = &metrics.memory {
        lines.push(format!("| Memory | Stable at ~{:.1}GB |", memory.average / 1e9));
    }
    if let Some(active) = &metrics.pool_active {
        let pending = metrics.pool_pending.as_ref().map_or(0, |p| p.max as i64);
        lines.push(format!(
            "| HikariCP | Max {} active connections, max {} pending |",
            active.max as i64, pending
        ));
    }
    if let Some(threads) = &metrics.jetty_threads {
        lines.push(format!("| Jetty threads | Max {:.0} busy |", threads.max));
    }
    if let Some(gc) = &metrics.gc {
        lines.push(format!("| GC | Peak {:.3}s/s |", gc.max));
    }
    if run.dispatcher.compute_start_ns.is_some() {
        lines.push(format!(
            "| Dispatcher compute | {} |",
            format_duration(run.dispatcher.compute_duration_s())
        ));
    }
    lines.push(format!(
        "| Log errors | {} ({} validation) |",
        run.app_logs.error_count, run.app_logs.validation_error_count
    ));
    lines.push(String::new());

    for w in &run.app_logs.warnings {
        lines.push(format!("**{}:** {} warnings. {}", w.category, w.count, w.description));
        lines.push(String::new());
    }
}

fn recommendations(lines: &mut Vec<String>, correlation: &CorrelationResult) {
    lines.push("## 5. Recommendations".to_string());
    lines.push(String::new());
    lines.push("Ordered by impact-to-effort ratio (highest first).".to_string());
    lines.push(String::new());

    let groups: [(&str, Vec<&Finding>); 3] = [
        ("Quick Wins (implement this sprint)", correlation.quick_wins()),
        ("Medium-Term (next 1-2 sprints)", correlation.medium_term()),
        ("Longer-Term (backlog)", correlation.backlog()),
    ];

    let mut number = 1;
    for (heading, findings) in groups {
        lines.push(format!("### {}", heading));
        lines.push(String::new());
        for f in findings {
            lines.push(format!("{}. **{}.** {}", number, f.title, f.description));
            lines.push(String::new());
            number += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::metrics::MetricSummary;
    use crate::analyzer::report::Difficulty;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 24).unwrap()
    }

    fn finding(rank: u8, difficulty: Difficulty, priority: Priority) -> Finding {
        Finding {
            rank,
            title: format!("Finding {}", rank),
            description: format!("Description {}.", rank),
            evidence: "Evidence.".to_string(),
            estimated_savings: "30-45s".to_string(),
            difficulty,
            priority,
        }
    }

    #[test]
    fn empty_run_renders_every_section() {
        let report = render_markdown(&RunAnalysis::default(), &CorrelationResult::default(), &Thresholds::default(), date());
        assert!(report.starts_with("# CI Pipeline Comprehensive Analysis Report\n"));
        assert!(report.contains("**Date:** 2026-02-24"));
        for section in [
            "## 1. Executive Summary",
            "## 2. End-to-End Timeline",
            "## 3. Ranked Optimization Opportunities",
            "## 4. Detailed Findings",
            "## 5. Recommendations",
        ] {
            assert!(report.contains(section), "missing {}", section);
        }
        assert!(report.contains("**All 0 tests passed**"));
        assert!(report.ends_with(".*\n"));
    }

    #[test]
    fn timeline_reports_pending_connections() {
        let summary = |name: &str, max: f64| MetricSummary {
            name: name.to_string(),
            min: 0.0,
            max,
            average: max / 2.0,
            unit: String::new(),
        };
        let mut run = RunAnalysis::default();
        run.metrics.cpu = Some(summary("CPU", 2.0));
        run.metrics.pool_active = Some(summary("HikariCP Active", 10.0));
        run.metrics.pool_pending = Some(summary("HikariCP Pending", 7.0));

        let report = render_markdown(&run, &CorrelationResult::default(), &Thresholds::default(), date());
        assert!(report.contains("HikariCP max 10 conn, 7 pending"));
        assert!(report.contains("max 7 pending"));
        assert!(!report.contains("zero pending"));

        run.metrics.pool_pending = None;
        let report = render_markdown(&run, &CorrelationResult::default(), &Thresholds::default(), date());
        assert!(report.contains("HikariCP max 10 conn, 0 pending"));
    }

    #[test]
    fn recommendations_number_across_groups() {
        let correlation = CorrelationResult {
            findings: vec![
                finding(1, Difficulty::Low, Priority::P1),
                finding(3, Difficulty::Medium, Priority::P1),
                finding(7, Difficulty::NotApplicable, Priority::Informational),
                finding(8, Difficulty::Low, Priority::P3),
            ],
            ..Default::default()
        };
        let report = render_markdown(&RunAnalysis::default(), &correlation, &Thresholds::default(), date());
        let recs = report.split("## 5. Recommendations").nth(1).unwrap();
        assert!(recs.contains("1. **Finding 1.** Description 1."));
        assert!(recs.contains("2. **Finding 3.** Description 3."));
        assert!(recs.contains("3. **Finding 8.** Description 8."));
        assert!(!recs.contains("Finding 7"));
        assert!(report.contains("**The application is not the bottleneck.**"));
    }

    #[test]
    fn ranked_section_lists_every_field() {
        let correlation = CorrelationResult {
            findings: vec![finding(2, Difficulty::Medium, Priority::P1)],
            ..Default::default()
        };
        let report = render_markdown(&RunAnalysis::default(), &correlation, &Thresholds::default(), date());
        assert!(report.contains("### Rank 2: Finding 2"));
        assert!(report.contains("- **Estimated savings:** 30-45s"));
        assert!(report.contains("- **Difficulty:** Medium"));
        assert!(report.contains("- **Priority:** P1"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let run = RunAnalysis::default();
        let correlation = CorrelationResult::default();
        assert_eq!(
            render_markdown(&run, &correlation, &Thresholds::default(), date()),
            render_markdown(&run, &correlation, &Thresholds::default(), date())
        );
    }
}
