use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    Checkpoint, ClusterDraft, ForumComment, ForumPost, IdeaDraft, PostPage, RunStats, RunStatus,
    SourceType, StoredComment, TrackedSubreddit, WindowDays,
};

/// Read side of the forum provider.
///
/// A call that retries internally (rate limiting, transient failures) still
/// counts as a single operation to the caller's budget accounting.
#[async_trait]
pub trait ForumSource: Send + Sync {
    /// Fetch one page of the newest-first listing, dropping posts older than
    /// `cutoff_epoch`. `next_cursor` is `None` once the cutoff was reached
    /// mid-page or the provider has no further page.
    async fn fetch_posts(
        &self,
        community: &str,
        cutoff_epoch: i64,
        after: Option<&str>,
        page_limit: u32,
    ) -> Result<PostPage>;

    /// Walk a post's nested reply tree up to `max_depth`, collecting at most
    /// `max_count` comments and skipping deletion placeholders.
    async fn fetch_comments(
        &self,
        community: &str,
        post_external_id: &str,
        max_depth: u32,
        max_count: usize,
    ) -> Result<Vec<ForumComment>>;
}

/// The three prompted synthesis operations.
///
/// Implementations degrade rather than fail: malformed model output yields
/// `Ok` with an empty list or `None`. An `Err` means the provider itself was
/// unreachable and the caller should log and skip the item.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn extract_problems(&self, text: &str, source_label: &str) -> Result<Vec<String>>;

    async fn cluster_problems(&self, statements: &[String]) -> Result<Vec<ClusterDraft>>;

    async fn generate_idea(&self, cluster: &ClusterDraft) -> Result<Option<IdeaDraft>>;
}

/// Persistence operations the pipeline drives. Each method is one outbound
/// operation for budget purposes.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get_subreddit(&self, id: Uuid) -> Result<Option<TrackedSubreddit>>;

    async fn create_run(
        &self,
        subreddit: &TrackedSubreddit,
        window: WindowDays,
    ) -> Result<Uuid>;

    /// The one-way terminal write. Called exactly once per created run.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
        stats: &RunStats,
    ) -> Result<()>;

    async fn read_checkpoint(
        &self,
        subreddit_id: Uuid,
        window: WindowDays,
    ) -> Result<Option<Checkpoint>>;

    async fn write_checkpoint(
        &self,
        subreddit_id: Uuid,
        window: WindowDays,
        cursor: Option<&str>,
        last_post_created_utc: DateTime<Utc>,
    ) -> Result<()>;

    async fn clear_checkpoint(&self, subreddit_id: Uuid, window: WindowDays) -> Result<()>;

    /// Upsert on the post's external id; a conflicting row is reassigned to
    /// `run_id`. Returns the row id either way.
    async fn upsert_post(
        &self,
        run_id: Uuid,
        subreddit_id: Uuid,
        post: &ForumPost,
    ) -> Result<Uuid>;

    /// Insert with conflict-ignore on the comment's external id: the first
    /// writer's content wins.
    async fn insert_comment(
        &self,
        run_id: Uuid,
        subreddit_id: Uuid,
        post_ref: Uuid,
        comment: &ForumComment,
    ) -> Result<()>;

    /// Highest-scoring comments inserted by this run, for extraction sampling.
    async fn top_comments_for_run(&self, run_id: Uuid, limit: usize) -> Result<Vec<StoredComment>>;

    async fn insert_problem(
        &self,
        run_id: Uuid,
        subreddit_id: Uuid,
        source_type: SourceType,
        source_ref: Uuid,
        statement: &str,
    ) -> Result<()>;

    async fn insert_cluster(
        &self,
        run_id: Uuid,
        subreddit_id: Uuid,
        cluster: &ClusterDraft,
        evidence: &[String],
    ) -> Result<Uuid>;

    async fn insert_idea(
        &self,
        run_id: Uuid,
        subreddit_id: Uuid,
        cluster_id: Uuid,
        idea: &IdeaDraft,
        score: i64,
    ) -> Result<()>;
}
