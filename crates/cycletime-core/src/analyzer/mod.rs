pub mod app_logs;
pub mod correlator;
pub mod metrics;
pub mod orchestration;
pub mod report;
pub mod test_timeline;

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::layout::RunLayout;
use app_logs::{AppLogsResult, DispatcherTimeline};
use metrics::MetricsResult;
use orchestration::OrchestrationResult;
use serde::Serialize;
use test_timeline::TestSuiteResult;
use tracing::{debug, info};

/// Every source result for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunAnalysis {
    pub orchestration: OrchestrationResult,
    /// Fork-join pooled integration suite.
    pub integration: TestSuiteResult,
    /// End-to-end suite with the setup chain and compute polling.
    pub e2e: TestSuiteResult,
    pub app_logs: AppLogsResult,
    pub dispatcher: DispatcherTimeline,
    pub metrics: MetricsResult,
}

/// One independent input of a run. Each source is analyzed without looking
/// at the others, so any caller may run them on separate threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Orchestration,
    Integration,
    E2e,
    WebappLogs,
    DispatcherLogs,
    Metrics,
}

/// The result of analyzing one [`Source`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutput {
    Orchestration(OrchestrationResult),
    Integration(TestSuiteResult),
    E2e(TestSuiteResult),
    WebappLogs(AppLogsResult),
    DispatcherLogs(DispatcherTimeline),
    Metrics(MetricsResult),
}

impl Source {
    pub const ALL: [Source; 6] = [
        Source::Orchestration,
        Source::Integration,
        Source::E2e,
        Source::WebappLogs,
        Source::DispatcherLogs,
        Source::Metrics,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Source::Orchestration => "orchestration log",
            Source::Integration => "integration test timeline",
            Source::E2e => "e2e test timeline",
            Source::WebappLogs => "webapp logs",
            Source::DispatcherLogs => "dispatcher logs",
            Source::Metrics => "metrics",
        }
    }

    /// Read and analyze this source's artifact inside the run directory.
    pub fn analyze(self, layout: &RunLayout, config: &AnalysisConfig) -> Result<SourceOutput> {
        debug!(source = self.label(), "analyzing source");
        Ok(match self {
            Source::Orchestration => SourceOutput::Orchestration(orchestration::analyze_file(&layout.orchestration_log())?),
            Source::Integration => SourceOutput::Integration(test_timeline::analyze_file(
                &layout.integration_timeline(),
                &config.suites.integration,
            )?),
            Source::E2e => SourceOutput::E2e(test_timeline::analyze_file(&layout.e2e_timeline(), &config.suites.e2e)?),
            Source::WebappLogs => SourceOutput::WebappLogs(app_logs::analyze_webapp_file(&layout.webapp_logs())?),
            Source::DispatcherLogs => {
                SourceOutput::DispatcherLogs(app_logs::analyze_dispatcher_file(&layout.dispatcher_logs())?)
            }
            Source::Metrics => SourceOutput::Metrics(metrics::analyze_dir(&layout.metrics_dir())),
        })
    }
}

impl RunAnalysis {
    /// Store one source's result in its slot. Order does not matter.
    pub fn absorb(&mut self, output: SourceOutput) {
        match output {
            SourceOutput::Orchestration(result) => self.orchestration = result,
            SourceOutput::Integration(result) => self.integration = result,
            SourceOutput::E2e(result) => self.e2e = result,
            SourceOutput::WebappLogs(result) => self.app_logs = result,
            SourceOutput::DispatcherLogs(result) => self.dispatcher = result,
            SourceOutput::Metrics(result) => self.metrics = result,
        }
    }

    pub fn from_outputs(outputs: impl IntoIterator<Item = SourceOutput>) -> Self {
        let mut analysis = RunAnalysis::default();
        for output in outputs {
            analysis.absorb(output);
        }
        analysis
    }
}

/// Run every source analyzer over a run directory, one after another.
pub fn analyze_run(layout: &RunLayout, config: &AnalysisConfig) -> Result<RunAnalysis> {
    info!(run = %layout.base_dir.display(), "analyzing run");

    let mut analysis = RunAnalysis::default();
    for source in Source::ALL {
        analysis.absorb(source.analyze(layout, config)?);
    }

    info!(
        integration_tests = analysis.integration.total_tests(),
        e2e_tests = analysis.e2e.total_tests(),
        "run analyzed"
    );
    Ok(analysis)
}
