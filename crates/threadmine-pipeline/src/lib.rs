//! Run orchestration: drives one scrape run end to end under an
//! outbound-operation budget.

pub const CRATE_NAME: &str = "threadmine-pipeline";

mod sessions;

pub use sessions::EnvSessions;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use threadmine_core::{
    ForumPost, ForumSource, OpBudget, RunStats, RunStatus, RunStore, SourceType, Synthesizer,
    TrackedSubreddit, WindowDays,
};

/// Per-run sampling and persistence limits.
///
/// These cap work done per run independently of the operation budget; the
/// budget is the hard outer bound, the quotas shape what the budget is
/// spent on.
#[derive(Debug, Clone)]
pub struct Quotas {
    /// Posts persisted per run.
    pub max_posts: usize,
    /// Posts whose comment trees are fetched (arrival order).
    pub max_posts_with_comments: usize,
    /// Comments persisted per post.
    pub max_comments_per_post: usize,
    /// Reply-tree depth requested from the provider.
    pub comment_fetch_depth: u32,
    /// Comments requested from the provider per post.
    pub comment_fetch_count: usize,
    /// Posts fed to problem extraction (arrival order).
    pub max_posts_analyzed: usize,
    /// Stored comments fed to problem extraction (by score).
    pub max_comments_analyzed: usize,
    /// Statements kept per extraction call.
    pub max_problems_per_source: usize,
    /// Statements persisted per run.
    pub max_problems_stored: usize,
    /// Minimum text length for a source to be worth extracting from.
    pub min_text_len: usize,
    /// Statements copied into a cluster's evidence array.
    pub evidence_limit: usize,
    /// Listing page size requested from the provider.
    pub page_limit: u32,
    /// Pause between comment-tree fetches.
    pub comment_fetch_delay: Duration,
}

impl Default for Quotas {
    fn default() -> Self {
        Self {
            max_posts: 20,
            max_posts_with_comments: 5,
            max_comments_per_post: 4,
            comment_fetch_depth: 1,
            comment_fetch_count: 10,
            max_posts_analyzed: 5,
            max_comments_analyzed: 5,
            max_problems_per_source: 2,
            max_problems_stored: 15,
            min_text_len: 50,
            evidence_limit: 5,
            page_limit: 25,
            comment_fetch_delay: Duration::from_millis(200),
        }
    }
}

/// Default ceiling on outbound operations per run. Generous enough for a
/// full run at default quotas, tight enough to bound a pathological one.
pub const DEFAULT_OP_CEILING: u32 = 60;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub op_ceiling: u32,
    pub quotas: Quotas,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            op_ceiling: DEFAULT_OP_CEILING,
            quotas: Quotas::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("THREADMINE_OP_BUDGET") {
            match raw.trim().parse::<u32>() {
                Ok(ceiling) => config.op_ceiling = ceiling,
                Err(_) => warn!(value = %raw, "ignoring unparsable THREADMINE_OP_BUDGET"),
            }
        }
        config
    }
}

/// Builds the outbound clients used by a single run.
///
/// Clients are constructed per run so no session state (auth tokens, model
/// selection) leaks across runs, and so a configuration problem surfaces as
/// that run failing rather than at process start.
pub trait SessionFactory: Send + Sync {
    fn forum(&self) -> Result<Arc<dyn ForumSource>>;
    fn synthesizer(&self) -> Result<Arc<dyn Synthesizer>>;
}

/// Why a run could not be started at all. Once a run row exists, errors are
/// recorded on the run instead of being returned.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("subreddit not found")]
    SubredditNotFound,
    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}

/// What the caller gets back from a finished run, mirroring the terminal
/// record that was written.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub stats: RunStats,
    pub error_message: Option<String>,
}

pub struct ScrapePipeline {
    sessions: Arc<dyn SessionFactory>,
    store: Arc<dyn RunStore>,
    config: PipelineConfig,
}

impl ScrapePipeline {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        store: Arc<dyn RunStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            sessions,
            store,
            config,
        }
    }

    /// Run the full pipeline for one subreddit and window, synchronously.
    ///
    /// Exactly one terminal write happens for every run row created: the
    /// stage block's error is recorded on the run, never propagated, and the
    /// terminal write itself is not charged against the budget.
    pub async fn execute(
        &self,
        subreddit_id: Uuid,
        window: WindowDays,
    ) -> Result<RunOutcome, TriggerError> {
        let mut budget = OpBudget::new(self.config.op_ceiling);

        if !budget.admit() {
            return Err(TriggerError::Setup(anyhow::anyhow!(
                "operation budget of {} is too small to start a run",
                self.config.op_ceiling
            )));
        }
        let subreddit = self
            .store
            .get_subreddit(subreddit_id)
            .await
            .context("loading subreddit")?
            .ok_or(TriggerError::SubredditNotFound)?;

        if !budget.admit() {
            return Err(TriggerError::Setup(anyhow::anyhow!(
                "operation budget of {} is too small to start a run",
                self.config.op_ceiling
            )));
        }
        let run_id = self
            .store
            .create_run(&subreddit, window)
            .await
            .context("creating run record")?;

        info!(
            %run_id,
            subreddit = %subreddit.name,
            window_days = window.days(),
            budget = budget.remaining(),
            "scrape run started"
        );

        let mut stats = RunStats::default();
        let span = tracing::info_span!("scrape_run", %run_id, subreddit = %subreddit.name);
        let result = self
            .run_stages(run_id, &subreddit, window, &mut budget, &mut stats)
            .instrument(span)
            .await;

        let (status, error_message) = match result {
            Ok(()) => (RunStatus::Completed, None),
            Err(err) => {
                warn!(%run_id, error = %format!("{err:#}"), "scrape run failed");
                (RunStatus::Failed, Some(format!("{err:#}")))
            }
        };

        if let Err(err) = self
            .store
            .finish_run(run_id, status, error_message.as_deref(), &stats)
            .await
        {
            error!(%run_id, error = %err, "failed to record run outcome");
        }

        info!(
            %run_id,
            status = status.as_str(),
            ops_consumed = budget.consumed(),
            posts = stats.posts_scraped,
            problems = stats.problems_extracted,
            ideas = stats.ideas_generated,
            "scrape run finished"
        );

        Ok(RunOutcome {
            run_id,
            status,
            stats,
            error_message,
        })
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        subreddit: &TrackedSubreddit,
        window: WindowDays,
        budget: &mut OpBudget,
        stats: &mut RunStats,
    ) -> Result<()> {
        let quotas = &self.config.quotas;
        let forum = self
            .sessions
            .forum()
            .context("constructing forum client")?;
        let synthesizer = self
            .sessions
            .synthesizer()
            .context("constructing synthesis client")?;

        let cutoff_epoch = Utc::now().timestamp() - window.days() * 86_400;

        // Stage: checkpoint. Short windows restart from scratch, longer ones
        // resume from the stored cursor.
        let mut cursor: Option<String> = None;
        if window.reuses_checkpoint() {
            if budget.admit() {
                if let Some(checkpoint) = self
                    .store
                    .read_checkpoint(subreddit.id, window)
                    .await
                    .context("reading checkpoint")?
                {
                    cursor = checkpoint.last_after_cursor;
                }
            }
        } else if budget.admit() {
            self.store
                .clear_checkpoint(subreddit.id, window)
                .await
                .context("clearing checkpoint")?;
        }

        // Stage: post collection. A listing fetch failure ends collection but
        // not the run; whatever was stored so far still flows downstream.
        let mut collected: Vec<(ForumPost, Uuid)> = Vec::new();
        while collected.len() < quotas.max_posts {
            if !budget.admit() {
                break;
            }
            let page = match forum
                .fetch_posts(&subreddit.name, cutoff_epoch, cursor.as_deref(), quotas.page_limit)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(%run_id, error = %format!("{err:#}"), "listing fetch failed, stopping collection");
                    break;
                }
            };
            let page_empty = page.posts.is_empty();
            let page_last_created = page.posts.last().map(|post| post.created_utc);

            for post in page.posts {
                if collected.len() >= quotas.max_posts || !budget.admit() {
                    break;
                }
                match self.store.upsert_post(run_id, subreddit.id, &post).await {
                    Ok(row_id) => {
                        stats.posts_scraped += 1;
                        collected.push((post, row_id));
                    }
                    Err(err) => {
                        warn!(%run_id, post_id = %post.external_id, error = %err, "failed to persist post")
                    }
                }
            }

            cursor = page.next_cursor;
            if budget.admit() {
                let last_seen = epoch_to_datetime(page_last_created.unwrap_or(cutoff_epoch));
                self.store
                    .write_checkpoint(subreddit.id, window, cursor.as_deref(), last_seen)
                    .await
                    .context("writing checkpoint")?;
            }
            if cursor.is_none() || page_empty {
                break;
            }
        }

        // Stage: comment collection for the first few posts.
        for (index, (post, post_ref)) in collected
            .iter()
            .take(quotas.max_posts_with_comments)
            .enumerate()
        {
            if index > 0 {
                tokio::time::sleep(quotas.comment_fetch_delay).await;
            }
            if !budget.admit() {
                break;
            }
            let comments = match forum
                .fetch_comments(
                    &subreddit.name,
                    &post.external_id,
                    quotas.comment_fetch_depth,
                    quotas.comment_fetch_count,
                )
                .await
            {
                Ok(comments) => comments,
                Err(err) => {
                    warn!(%run_id, post_id = %post.external_id, error = %format!("{err:#}"), "comment fetch failed");
                    continue;
                }
            };
            if !comments.is_empty() {
                stats.posts_with_comments += 1;
            }
            for comment in comments.into_iter().take(quotas.max_comments_per_post) {
                if !budget.admit() {
                    break;
                }
                match self
                    .store
                    .insert_comment(run_id, subreddit.id, *post_ref, &comment)
                    .await
                {
                    Ok(()) => stats.comments_scraped += 1,
                    Err(err) => {
                        warn!(%run_id, comment_id = %comment.external_id, error = %err, "failed to persist comment")
                    }
                }
            }
        }

        // Stage: problem extraction from posts, then from the run's
        // highest-scoring comments. A failed extraction skips that source.
        let mut problems: Vec<(String, SourceType, Uuid)> = Vec::new();
        for (post, post_ref) in collected.iter().take(quotas.max_posts_analyzed) {
            let text = post.analysis_text();
            if text.chars().count() <= quotas.min_text_len {
                continue;
            }
            if !budget.admit() {
                break;
            }
            let label = format!("post in r/{}", subreddit.name);
            match synthesizer.extract_problems(&text, &label).await {
                Ok(statements) => {
                    for statement in statements.into_iter().take(quotas.max_problems_per_source) {
                        problems.push((statement, SourceType::Post, *post_ref));
                    }
                }
                Err(err) => {
                    warn!(%run_id, post_id = %post.external_id, error = %format!("{err:#}"), "problem extraction failed for post")
                }
            }
        }

        if budget.admit() {
            let top_comments = self
                .store
                .top_comments_for_run(run_id, quotas.max_comments_analyzed)
                .await
                .context("sampling comments for extraction")?;
            for comment in top_comments {
                if comment.body.chars().count() <= quotas.min_text_len {
                    continue;
                }
                if !budget.admit() {
                    break;
                }
                let label = format!("comment in r/{}", subreddit.name);
                match synthesizer.extract_problems(&comment.body, &label).await {
                    Ok(statements) => {
                        for statement in
                            statements.into_iter().take(quotas.max_problems_per_source)
                        {
                            problems.push((statement, SourceType::Comment, comment.id));
                        }
                    }
                    Err(err) => {
                        warn!(%run_id, comment_ref = %comment.id, error = %format!("{err:#}"), "problem extraction failed for comment")
                    }
                }
            }
        }

        for (statement, source_type, source_ref) in problems.iter().take(quotas.max_problems_stored)
        {
            if !budget.admit() {
                break;
            }
            match self
                .store
                .insert_problem(run_id, subreddit.id, *source_type, *source_ref, statement)
                .await
            {
                Ok(()) => stats.problems_extracted += 1,
                Err(err) => warn!(%run_id, error = %err, "failed to persist problem statement"),
            }
        }

        // Stage: clustering and idea generation. All extracted statements are
        // clustered, including any beyond the storage cap.
        if !problems.is_empty() && budget.admit() {
            let statements: Vec<String> = problems
                .iter()
                .map(|(statement, _, _)| statement.clone())
                .collect();
            match synthesizer.cluster_problems(&statements).await {
                Err(err) => {
                    warn!(%run_id, error = %format!("{err:#}"), "clustering failed")
                }
                Ok(clusters) => {
                    for cluster in clusters {
                        let evidence: Vec<String> = cluster
                            .member_indices
                            .iter()
                            .take(quotas.evidence_limit)
                            .filter_map(|&index| statements.get(index).cloned())
                            .collect();
                        if !budget.admit() {
                            break;
                        }
                        let cluster_id = match self
                            .store
                            .insert_cluster(run_id, subreddit.id, &cluster, &evidence)
                            .await
                        {
                            Ok(id) => {
                                stats.clusters_created += 1;
                                id
                            }
                            Err(err) => {
                                warn!(%run_id, cluster = %cluster.title, error = %err, "failed to persist cluster");
                                continue;
                            }
                        };

                        if !budget.admit() {
                            break;
                        }
                        match synthesizer.generate_idea(&cluster).await {
                            Ok(Some(idea)) => {
                                let score = cluster.severity.score(cluster.frequency);
                                if !budget.admit() {
                                    break;
                                }
                                match self
                                    .store
                                    .insert_idea(run_id, subreddit.id, cluster_id, &idea, score)
                                    .await
                                {
                                    Ok(()) => stats.ideas_generated += 1,
                                    Err(err) => {
                                        warn!(%run_id, cluster = %cluster.title, error = %err, "failed to persist idea")
                                    }
                                }
                            }
                            Ok(None) => {
                                info!(%run_id, cluster = %cluster.title, "no usable idea for cluster")
                            }
                            Err(err) => {
                                warn!(%run_id, cluster = %cluster.title, error = %format!("{err:#}"), "idea generation failed")
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn epoch_to_datetime(epoch: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(epoch, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quotas_match_sampling_policy() {
        let quotas = Quotas::default();
        assert_eq!(quotas.max_posts, 20);
        assert_eq!(quotas.max_posts_with_comments, 5);
        assert_eq!(quotas.max_comments_per_post, 4);
        assert_eq!(quotas.max_problems_per_source, 2);
        assert_eq!(quotas.max_problems_stored, 15);
        assert_eq!(quotas.evidence_limit, 5);
    }

    #[test]
    fn config_env_override_requires_a_number() {
        std::env::set_var("THREADMINE_OP_BUDGET", "12");
        assert_eq!(PipelineConfig::from_env().op_ceiling, 12);
        std::env::set_var("THREADMINE_OP_BUDGET", "lots");
        assert_eq!(PipelineConfig::from_env().op_ceiling, DEFAULT_OP_CEILING);
        std::env::remove_var("THREADMINE_OP_BUDGET");
    }
}
