use colored::*;
use cycletime_core::analyzer::report::{format_duration, CorrelationResult, Finding, Priority};
use cycletime_core::RunAnalysis;

/// Print a run overview followed by the ranked findings.
pub fn print_run_summary(run: &RunAnalysis, correlation: &CorrelationResult) {
    println!();
    println!(
        "{}",
        format!(" cycletime v{}: run analysis", env!("CARGO_PKG_VERSION")).bold()
    );
    println!();

    let orch = &run.orchestration;
    println!(" {}", "Orchestration".bold().underline());
    println!(
        " {} Total: {} ({} active, {:.1}% suspended)",
        "|-".dimmed(),
        format_duration(orch.total_duration_s()),
        format_duration(orch.active_duration_s()),
        orch.idle_pct()
    );
    println!(
        " {} {} children, {} resume cycles (~{:.0}s overhead)",
        "|-".dimmed(),
        orch.children.len(),
        orch.resume_count(),
        orch.total_resume_overhead_s()
    );
    println!();

    println!(" {}", "Test Suites".bold().underline());
    for suite in [&run.integration, &run.e2e] {
        println!(
            " {} {}: {} tests in {} ({} passed, {} failed, {} skipped)",
            "|-".dimmed(),
            suite.name.cyan(),
            suite.total_tests(),
            format_duration(suite.wall_clock_s()),
            suite.pass_count(),
            suite.fail_count(),
            suite.skip_count()
        );
    }
    for pool in run.integration.pools_by_start() {
        println!(
            " {}   {}: {} tests, {:.2}x parallelism",
            "|".dimmed(),
            pool.name,
            pool.count(),
            pool.parallelism()
        );
    }
    println!();

    println!(" {}", "Application".bold().underline());
    match &run.metrics.cpu {
        Some(cpu) => println!(
            " {} CPU peak {:.2} cores, avg {:.2}",
            "|-".dimmed(),
            cpu.max,
            cpu.average
        ),
        None => println!(" {} CPU metrics unavailable", "|-".dimmed()),
    }
    println!(
        " {} {} log entries, {} errors, {} warning categories",
        "|-".dimmed(),
        run.app_logs.total_log_entries,
        run.app_logs.error_count,
        run.app_logs.warnings.len()
    );
    if let Some(job_id) = &run.dispatcher.job_id {
        println!(
            " {} Dispatcher job {}: {} compute",
            "|-".dimmed(),
            job_id,
            format_duration(run.dispatcher.compute_duration_s())
        );
    }
    println!();

    print_findings(correlation);
}

/// Print the ranked findings with a priority summary.
pub fn print_findings(correlation: &CorrelationResult) {
    println!(" {}", "=".repeat(60).dimmed());
    println!();

    if correlation.findings.is_empty() {
        println!(
            " {} No cycle-time findings for this run.",
            "OK".green().bold()
        );
    } else {
        for finding in &correlation.findings {
            print_finding(finding);
            println!();
        }
    }

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    let p1 = correlation.count_priority(Priority::P1);
    let p2 = correlation.count_priority(Priority::P2);
    println!(
        " {} Findings: {} P1, {} P2, {} P3, {} informational",
        "|-".dimmed(),
        if p1 > 0 {
            p1.to_string().red().bold().to_string()
        } else {
            "0".to_string()
        },
        if p2 > 0 {
            p2.to_string().yellow().bold().to_string()
        } else {
            "0".to_string()
        },
        correlation.count_priority(Priority::P3),
        correlation.count_priority(Priority::Informational),
    );
    println!(
        " {} Quick wins: {}",
        "|-".dimmed(),
        correlation.quick_wins().len().to_string().green()
    );
    println!();
}

fn print_finding(finding: &Finding) {
    let tag = format!(" {} ", finding.priority.symbol());
    let priority_tag = match finding.priority {
        Priority::P1 => tag.on_red().white().bold().to_string(),
        Priority::P2 => tag.on_yellow().black().bold().to_string(),
        Priority::P3 => tag.on_blue().white().bold().to_string(),
        Priority::Informational => tag.dimmed().to_string(),
    };

    println!(" {} #{} {}", priority_tag, finding.rank, finding.title.bold());
    println!("   {} {}", "|".dimmed(), finding.description);
    println!("   {} {}", "|".dimmed(), finding.evidence.dimmed());
    println!(
        "   {} Estimated savings: {} | Difficulty: {}",
        "|".dimmed(),
        finding.estimated_savings.green(),
        finding.difficulty.label()
    );
}
