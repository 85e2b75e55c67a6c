//! Core domain model, scoring rules, and pipeline contracts for threadmine.

mod budget;
mod model;
mod severity;
mod traits;

pub use budget::OpBudget;
pub use model::{
    Checkpoint, ClusterDraft, ForumComment, ForumPost, GeneratedIdea, IdeaDraft, PostPage,
    ProblemCluster, RunDetail, RunStats, ScrapeRun, SourceType, StoredComment, TrackedSubreddit,
};
pub use severity::{normalize_severity, Severity};
pub use traits::{ForumSource, RunStore, Synthesizer};

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "threadmine-core";

/// Trailing time span bounding which posts are eligible for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum WindowDays {
    One,
    Seven,
    Thirty,
}

impl WindowDays {
    pub fn days(self) -> i64 {
        match self {
            WindowDays::One => 1,
            WindowDays::Seven => 7,
            WindowDays::Thirty => 30,
        }
    }

    /// Whether a previous run's cursor may be reused for this window.
    ///
    /// The one-day window is re-scraped from the top every time: the listing
    /// is newest-first, so a stale cursor would skip content posted since the
    /// last run.
    pub fn reuses_checkpoint(self) -> bool {
        const POLICY: [(WindowDays, bool); 3] = [
            (WindowDays::One, false),
            (WindowDays::Seven, true),
            (WindowDays::Thirty, true),
        ];
        POLICY
            .iter()
            .find(|(w, _)| *w == self)
            .map(|(_, reuse)| *reuse)
            .unwrap_or(false)
    }
}

impl TryFrom<u32> for WindowDays {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(WindowDays::One),
            7 => Ok(WindowDays::Seven),
            30 => Ok(WindowDays::Thirty),
            other => Err(format!("windowDays must be 1, 7, or 30 (got {other})")),
        }
    }
}

impl From<WindowDays> for u32 {
    fn from(value: WindowDays) -> Self {
        value.days() as u32
    }
}

/// Terminal and in-flight lifecycle states of a scrape run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}
