pub mod analyzer;
pub mod config;
pub mod error;
pub mod layout;
pub mod render;

pub use analyzer::correlator::correlate;
pub use analyzer::report::{CorrelationResult, Difficulty, Finding, Priority};
pub use analyzer::{analyze_run, RunAnalysis, Source, SourceOutput};
pub use config::{AnalysisConfig, Thresholds};
pub use error::ArtifactError;
pub use layout::RunLayout;
