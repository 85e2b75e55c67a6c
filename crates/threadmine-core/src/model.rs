use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RunStatus, Severity};

/// A community whose listing is scraped on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedSubreddit {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One post as returned by the forum listing, pre-persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumPost {
    pub external_id: String,
    pub title: String,
    pub selftext: String,
    pub author: String,
    pub created_utc: i64,
    pub permalink: String,
    pub url: String,
    pub score: i64,
    pub num_comments: i64,
}

impl ForumPost {
    /// Text blob handed to problem extraction.
    pub fn analysis_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.selftext)
            .trim()
            .to_string()
    }
}

/// One page of a listing walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPage {
    pub posts: Vec<ForumPost>,
    /// `None` signals the caller to stop paginating: either the provider has
    /// no further page, or the window cutoff was reached mid-page.
    pub next_cursor: Option<String>,
}

/// One comment from a post's reply tree, pre-persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumComment {
    pub external_id: String,
    pub external_post_id: String,
    pub parent_external_id: String,
    pub author: String,
    pub body: String,
    pub created_utc: i64,
    pub score: i64,
}

/// Persisted comment fields needed for extraction sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredComment {
    pub id: Uuid,
    pub body: String,
}

/// Where a problem statement was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Post,
    Comment,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Post => "post",
            SourceType::Comment => "comment",
        }
    }
}

/// Pagination state persisted per (subreddit, window).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_after_cursor: Option<String>,
    pub last_post_created_utc: DateTime<Utc>,
}

/// Counter bag attached to a run's terminal record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub posts_scraped: u32,
    pub posts_with_comments: u32,
    pub comments_scraped: u32,
    pub problems_extracted: u32,
    pub clusters_created: u32,
    pub ideas_generated: u32,
}

/// A scrape run as exposed to the read API, with the denormalized
/// subreddit identity it keeps even if the subreddit is later deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRun {
    pub id: Uuid,
    pub subreddit_id: Uuid,
    pub subreddit_name: String,
    pub window_days: u32,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub stats: RunStats,
}

/// Cluster shape returned by the synthesis client, severity already
/// normalized. `member_indices` index into the statement list that was
/// clustered, not into any persisted table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDraft {
    pub title: String,
    pub summary: String,
    pub frequency: i64,
    pub severity: Severity,
    pub member_indices: Vec<usize>,
}

/// Persisted cluster row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemCluster {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub frequency: i64,
    pub severity: Severity,
    pub evidence: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Structured business idea produced for one cluster.
///
/// Every field defaults so a model response missing a section still parses;
/// a response that is not an object at all is treated as no idea.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub one_liner: String,
    #[serde(default)]
    pub target_user: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub mvp: Vec<String>,
    #[serde(default)]
    pub pricing: String,
    #[serde(default)]
    pub differentiators: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub acquisition_channel: String,
}

/// Persisted idea row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedIdea {
    pub id: Uuid,
    pub cluster_id: Uuid,
    pub title: String,
    pub idea: IdeaDraft,
    pub score: i64,
    pub created_at: DateTime<Utc>,
}

/// Run joined with its clusters and ideas, for the detail read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: ScrapeRun,
    pub clusters: Vec<ProblemCluster>,
    pub ideas: Vec<GeneratedIdea>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_text_joins_title_and_body() {
        let post = ForumPost {
            external_id: "abc".into(),
            title: "Sync keeps failing".into(),
            selftext: "Every night the job dies.".into(),
            author: "u1".into(),
            created_utc: 0,
            permalink: "/r/x/abc".into(),
            url: "https://example.com".into(),
            score: 1,
            num_comments: 0,
        };
        assert_eq!(
            post.analysis_text(),
            "Sync keeps failing\n\nEvery night the job dies."
        );
    }

    #[test]
    fn idea_draft_parses_with_missing_fields() {
        let idea: IdeaDraft = serde_json::from_str(r#"{"title":"FixIt"}"#).unwrap();
        assert_eq!(idea.title, "FixIt");
        assert!(idea.mvp.is_empty());
        assert!(idea.pricing.is_empty());
    }

    #[test]
    fn run_stats_serialize_camel_case() {
        let stats = RunStats {
            posts_scraped: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["postsScraped"], 2);
        assert_eq!(json["ideasGenerated"], 0);
    }
}
