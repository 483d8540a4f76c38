use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Priority tier for a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
    Informational,
}

impl Priority {
    pub fn symbol(&self) -> &str {
        match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::Informational => "Informational",
        }
    }

    /// P1 and P2 findings are worth scheduling now.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Priority::P1 | Priority::P2)
    }
}

/// Implementation effort for acting on a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Low,
    Medium,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl Difficulty {
    pub fn label(&self) -> &str {
        match self {
            Difficulty::Low => "Low",
            Difficulty::Medium => "Medium",
            Difficulty::NotApplicable => "N/A",
        }
    }
}

/// A single cross-source performance finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Curated position of this finding type; findings are never re-sorted.
    pub rank: u8,
    pub title: String,
    pub description: String,
    pub evidence: String,
    /// Free text, may be a range ("30-45s") or "N/A".
    pub estimated_savings: String,
    pub difficulty: Difficulty,
    pub priority: Priority,
}

/// Ordered findings plus the orchestration window they were derived from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub findings: Vec<Finding>,
    pub window_start: Option<DateTime<FixedOffset>>,
    pub window_end: Option<DateTime<FixedOffset>>,
}

impl CorrelationResult {
    pub fn count_priority(&self, priority: Priority) -> usize {
        self.findings.iter().filter(|f| f.priority == priority).count()
    }

    /// Actionable findings that are cheap to implement.
    pub fn quick_wins(&self) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.priority.is_actionable() && f.difficulty == Difficulty::Low)
            .collect()
    }

    /// Actionable findings that need more than a configuration change.
    pub fn medium_term(&self) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.priority.is_actionable() && f.difficulty == Difficulty::Medium)
            .collect()
    }

    pub fn backlog(&self) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.priority == Priority::P3).collect()
    }
}

/// Format seconds as `12.3s` below a minute and `4m43s` above.
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        return format!("{:.1}s", secs);
    }
    let total = secs.round() as u64;
    format!("{}m{:02}s", total / 60, total % 60)
}
