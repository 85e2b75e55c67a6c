//! Postgres persistence for runs, scraped content, and synthesis results.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use threadmine_core::{
    Checkpoint, ClusterDraft, ForumComment, ForumPost, GeneratedIdea, IdeaDraft, ProblemCluster,
    RunDetail, RunStats, RunStatus, RunStore, ScrapeRun, SourceType, StoredComment,
    TrackedSubreddit, WindowDays,
};

pub const CRATE_NAME: &str = "threadmine-storage";

/// Lowercase, trim, and strip a leading `r/` so "r/SelfHosted" and
/// "selfhosted" land on the same unique row.
pub fn normalize_subreddit_name(name: &str) -> String {
    let trimmed = name.trim();
    let stripped = trimmed
        .strip_prefix("r/")
        .or_else(|| trimmed.strip_prefix("R/"))
        .unwrap_or(trimmed);
    stripped.trim().to_ascii_lowercase()
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running migrations")?;
        info!("migrations applied");
        Ok(())
    }

    /// Connectivity probe for the health endpoint.
    pub async fn health_now(&self) -> Result<DateTime<Utc>> {
        let row = sqlx::query("SELECT NOW() AS now")
            .fetch_one(&self.pool)
            .await
            .context("health probe")?;
        Ok(row.try_get("now")?)
    }

    pub async fn list_subreddits(&self) -> Result<Vec<TrackedSubreddit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, is_active, created_at, updated_at
              FROM tracked_subreddits
             ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_subreddit).collect()
    }

    /// Upsert by normalized name; re-adding an existing name only refreshes
    /// `is_active` and `updated_at`.
    pub async fn upsert_subreddit(&self, name: &str, is_active: bool) -> Result<TrackedSubreddit> {
        let name = normalize_subreddit_name(name);
        anyhow::ensure!(!name.is_empty(), "subreddit name is required");
        let row = sqlx::query(
            r#"
            INSERT INTO tracked_subreddits (name, is_active)
            VALUES ($1, $2)
            ON CONFLICT (name)
            DO UPDATE SET is_active = EXCLUDED.is_active, updated_at = NOW()
            RETURNING id, name, is_active, created_at, updated_at
            "#,
        )
        .bind(&name)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;
        row_to_subreddit(&row)
    }

    /// Returns whether a row was actually removed.
    pub async fn delete_subreddit(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tracked_subreddits WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_runs(&self, limit: i64) -> Result<Vec<ScrapeRun>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subreddit_id, subreddit_name, window_days, status,
                   started_at, finished_at, error_message, stats
              FROM scrape_runs
             ORDER BY started_at DESC
             LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_run).collect()
    }

    pub async fn run_detail(&self, id: Uuid) -> Result<Option<RunDetail>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT id, subreddit_id, subreddit_name, window_days, status,
                   started_at, finished_at, error_message, stats
              FROM scrape_runs
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let run = row_to_run(&row)?;

        let cluster_rows = sqlx::query(
            r#"
            SELECT id, title, summary, frequency, severity, evidence, created_at
              FROM problem_clusters
             WHERE run_id = $1
             ORDER BY frequency DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let clusters = cluster_rows
            .iter()
            .map(row_to_cluster)
            .collect::<Result<Vec<_>>>()?;

        let idea_rows = sqlx::query(
            r#"
            SELECT id, cluster_id, title, idea, score, created_at
              FROM generated_ideas
             WHERE run_id = $1
             ORDER BY score DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let ideas = idea_rows
            .iter()
            .map(row_to_idea)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(RunDetail {
            run,
            clusters,
            ideas,
        }))
    }
}

#[async_trait]
impl RunStore for PgStore {
    async fn get_subreddit(&self, id: Uuid) -> Result<Option<TrackedSubreddit>> {
        let row = sqlx::query(
            "SELECT id, name, is_active, created_at, updated_at FROM tracked_subreddits WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_subreddit).transpose()
    }

    async fn create_run(&self, subreddit: &TrackedSubreddit, window: WindowDays) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO scrape_runs (subreddit_id, subreddit_name, window_days, status)
            VALUES ($1, $2, $3, 'running')
            RETURNING id
            "#,
        )
        .bind(subreddit.id)
        .bind(&subreddit.name)
        .bind(window.days())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
        stats: &RunStats,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scrape_runs
               SET status = $2, finished_at = NOW(), error_message = $3, stats = $4
             WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(serde_json::to_value(stats)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_checkpoint(
        &self,
        subreddit_id: Uuid,
        window: WindowDays,
    ) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT last_after_cursor, last_post_created_utc
              FROM scrape_checkpoints
             WHERE subreddit_id = $1 AND window_days = $2
            "#,
        )
        .bind(subreddit_id)
        .bind(window.days())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| -> Result<Checkpoint> {
            Ok(Checkpoint {
                last_after_cursor: row.try_get("last_after_cursor")?,
                last_post_created_utc: row.try_get("last_post_created_utc")?,
            })
        })
        .transpose()
    }

    async fn write_checkpoint(
        &self,
        subreddit_id: Uuid,
        window: WindowDays,
        cursor: Option<&str>,
        last_post_created_utc: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scrape_checkpoints (subreddit_id, window_days, last_after_cursor, last_post_created_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subreddit_id, window_days)
            DO UPDATE SET last_after_cursor = EXCLUDED.last_after_cursor,
                          last_post_created_utc = EXCLUDED.last_post_created_utc,
                          updated_at = NOW()
            "#,
        )
        .bind(subreddit_id)
        .bind(window.days())
        .bind(cursor)
        .bind(last_post_created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_checkpoint(&self, subreddit_id: Uuid, window: WindowDays) -> Result<()> {
        sqlx::query("DELETE FROM scrape_checkpoints WHERE subreddit_id = $1 AND window_days = $2")
            .bind(subreddit_id)
            .bind(window.days())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_post(&self, run_id: Uuid, subreddit_id: Uuid, post: &ForumPost) -> Result<Uuid> {
        let created = DateTime::<Utc>::from_timestamp(post.created_utc, 0)
            .unwrap_or_else(Utc::now);
        let row = sqlx::query(
            r#"
            INSERT INTO reddit_posts (
                run_id, subreddit_id, reddit_post_id, created_utc,
                title, selftext, author, permalink, url, score, num_comments, raw
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (reddit_post_id)
            DO UPDATE SET run_id = EXCLUDED.run_id
            RETURNING id
            "#,
        )
        .bind(run_id)
        .bind(subreddit_id)
        .bind(&post.external_id)
        .bind(created)
        .bind(&post.title)
        .bind(&post.selftext)
        .bind(&post.author)
        .bind(&post.permalink)
        .bind(&post.url)
        .bind(post.score)
        .bind(post.num_comments)
        .bind(serde_json::to_value(post)?)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn insert_comment(
        &self,
        run_id: Uuid,
        subreddit_id: Uuid,
        post_ref: Uuid,
        comment: &ForumComment,
    ) -> Result<()> {
        let created = DateTime::<Utc>::from_timestamp(comment.created_utc, 0)
            .unwrap_or_else(Utc::now);
        sqlx::query(
            r#"
            INSERT INTO reddit_comments (
                run_id, subreddit_id, post_ref, reddit_comment_id, reddit_post_id,
                parent_reddit_comment_id, created_utc, author, body, score, raw
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (reddit_comment_id) DO NOTHING
            "#,
        )
        .bind(run_id)
        .bind(subreddit_id)
        .bind(post_ref)
        .bind(&comment.external_id)
        .bind(&comment.external_post_id)
        .bind(&comment.parent_external_id)
        .bind(created)
        .bind(&comment.author)
        .bind(&comment.body)
        .bind(comment.score)
        .bind(serde_json::to_value(comment)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn top_comments_for_run(&self, run_id: Uuid, limit: usize) -> Result<Vec<StoredComment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, body
              FROM reddit_comments
             WHERE run_id = $1
             ORDER BY score DESC
             LIMIT $2
            "#,
        )
        .bind(run_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(StoredComment {
                    id: row.try_get("id")?,
                    body: row.try_get("body")?,
                })
            })
            .collect()
    }

    async fn insert_problem(
        &self,
        run_id: Uuid,
        subreddit_id: Uuid,
        source_type: SourceType,
        source_ref: Uuid,
        statement: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO problem_statements (run_id, subreddit_id, source_type, source_ref, statement)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run_id)
        .bind(subreddit_id)
        .bind(source_type.as_str())
        .bind(source_ref)
        .bind(statement)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_cluster(
        &self,
        run_id: Uuid,
        subreddit_id: Uuid,
        cluster: &ClusterDraft,
        evidence: &[String],
    ) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO problem_clusters (run_id, subreddit_id, title, summary, frequency, severity, evidence)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(run_id)
        .bind(subreddit_id)
        .bind(&cluster.title)
        .bind(&cluster.summary)
        .bind(cluster.frequency)
        .bind(cluster.severity.as_str())
        .bind(serde_json::to_value(evidence)?)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn insert_idea(
        &self,
        run_id: Uuid,
        subreddit_id: Uuid,
        cluster_id: Uuid,
        idea: &IdeaDraft,
        score: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO generated_ideas (run_id, subreddit_id, cluster_id, title, idea, score)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(run_id)
        .bind(subreddit_id)
        .bind(cluster_id)
        .bind(&idea.title)
        .bind(serde_json::to_value(idea)?)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_subreddit(row: &sqlx::postgres::PgRow) -> Result<TrackedSubreddit> {
    Ok(TrackedSubreddit {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_run(row: &sqlx::postgres::PgRow) -> Result<ScrapeRun> {
    let status: String = row.try_get("status")?;
    let status = RunStatus::parse(&status)
        .with_context(|| format!("unknown run status {status:?}"))?;
    let stats = match row.try_get::<Option<serde_json::Value>, _>("stats")? {
        Some(value) => serde_json::from_value(value).unwrap_or_default(),
        None => RunStats::default(),
    };
    let window_days: i64 = row.try_get("window_days")?;
    Ok(ScrapeRun {
        id: row.try_get("id")?,
        subreddit_id: row.try_get("subreddit_id")?,
        subreddit_name: row.try_get("subreddit_name")?,
        window_days: window_days as u32,
        status,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error_message: row.try_get("error_message")?,
        stats,
    })
}

fn row_to_cluster(row: &sqlx::postgres::PgRow) -> Result<ProblemCluster> {
    let severity: String = row.try_get("severity")?;
    let evidence: serde_json::Value = row.try_get("evidence")?;
    Ok(ProblemCluster {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        frequency: row.try_get("frequency")?,
        severity: threadmine_core::normalize_severity(Some(&severity)),
        evidence: serde_json::from_value(evidence).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_idea(row: &sqlx::postgres::PgRow) -> Result<GeneratedIdea> {
    let idea: serde_json::Value = row.try_get("idea")?;
    Ok(GeneratedIdea {
        id: row.try_get("id")?,
        cluster_id: row.try_get("cluster_id")?,
        title: row.try_get("title")?,
        idea: serde_json::from_value(idea).unwrap_or_default(),
        score: row.try_get("score")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subreddit_names_are_normalized() {
        assert_eq!(normalize_subreddit_name("r/SelfHosted"), "selfhosted");
        assert_eq!(normalize_subreddit_name("R/rust "), "rust");
        assert_eq!(normalize_subreddit_name("  webdev"), "webdev");
        assert_eq!(normalize_subreddit_name("r/"), "");
    }
}
