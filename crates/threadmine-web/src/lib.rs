//! Axum JSON API: manage tracked subreddits, trigger scrape runs, and read
//! run results.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

use threadmine_core::{RunDetail, RunStatus, ScrapeRun, TrackedSubreddit, WindowDays};
use threadmine_pipeline::{
    EnvSessions, PipelineConfig, RunOutcome, ScrapePipeline, TriggerError,
};
use threadmine_storage::{normalize_subreddit_name, PgStore};

pub const CRATE_NAME: &str = "threadmine-web";

const DEFAULT_RUNS_LIMIT: i64 = 50;
const MAX_RUNS_LIMIT: i64 = 100;

/// Read-side queries the API serves directly from storage.
#[async_trait]
pub trait ApiStore: Send + Sync {
    async fn health_now(&self) -> Result<DateTime<Utc>>;
    async fn list_subreddits(&self) -> Result<Vec<TrackedSubreddit>>;
    async fn upsert_subreddit(&self, name: &str, is_active: bool) -> Result<TrackedSubreddit>;
    async fn delete_subreddit(&self, id: Uuid) -> Result<bool>;
    async fn list_runs(&self, limit: i64) -> Result<Vec<ScrapeRun>>;
    async fn run_detail(&self, id: Uuid) -> Result<Option<RunDetail>>;
}

#[async_trait]
impl ApiStore for PgStore {
    async fn health_now(&self) -> Result<DateTime<Utc>> {
        PgStore::health_now(self).await
    }

    async fn list_subreddits(&self) -> Result<Vec<TrackedSubreddit>> {
        PgStore::list_subreddits(self).await
    }

    async fn upsert_subreddit(&self, name: &str, is_active: bool) -> Result<TrackedSubreddit> {
        PgStore::upsert_subreddit(self, name, is_active).await
    }

    async fn delete_subreddit(&self, id: Uuid) -> Result<bool> {
        PgStore::delete_subreddit(self, id).await
    }

    async fn list_runs(&self, limit: i64) -> Result<Vec<ScrapeRun>> {
        PgStore::list_runs(self, limit).await
    }

    async fn run_detail(&self, id: Uuid) -> Result<Option<RunDetail>> {
        PgStore::run_detail(self, id).await
    }
}

/// Seam between the API and the pipeline so handlers can be exercised
/// without outbound clients.
#[async_trait]
pub trait ScrapeTrigger: Send + Sync {
    async fn trigger(
        &self,
        subreddit_id: Uuid,
        window: WindowDays,
    ) -> Result<RunOutcome, TriggerError>;
}

#[async_trait]
impl ScrapeTrigger for ScrapePipeline {
    async fn trigger(
        &self,
        subreddit_id: Uuid,
        window: WindowDays,
    ) -> Result<RunOutcome, TriggerError> {
        self.execute(subreddit_id, window).await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ApiStore>,
    pub trigger: Arc<dyn ScrapeTrigger>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route(
            "/api/subreddits",
            get(list_subreddits_handler).post(create_subreddit_handler),
        )
        .route("/api/subreddits/{id}", delete(delete_subreddit_handler))
        .route("/api/runs", get(list_runs_handler))
        .route("/api/runs/{id}", get(run_detail_handler))
        .route("/api/scrape/run", post(trigger_run_handler))
        .with_state(state)
}

pub async fn serve_from_env() -> Result<()> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let store = Arc::new(PgStore::connect(&database_url).await?);
    store.migrate().await?;

    let pipeline = ScrapePipeline::new(
        Arc::new(EnvSessions),
        store.clone(),
        PipelineConfig::from_env(),
    );
    let state = AppState {
        store: store.clone(),
        trigger: Arc::new(pipeline),
    };

    let port: u16 = std::env::var("THREADMINE_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.store.health_now().await {
        Ok(now) => Json(json!({
            "status": "ok",
            "database": "reachable",
            "time": now,
        }))
        .into_response(),
        Err(err) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            &format!("database unreachable: {err:#}"),
        ),
    }
}

async fn list_subreddits_handler(State(state): State<AppState>) -> Response {
    match state.store.list_subreddits().await {
        Ok(subreddits) => Json(subreddits).into_response(),
        Err(err) => server_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct CreateSubredditPayload {
    name: String,
}

async fn create_subreddit_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateSubredditPayload>,
) -> Response {
    let name = normalize_subreddit_name(&payload.name);
    if name.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "subreddit name is required");
    }
    match state.store.upsert_subreddit(&name, true).await {
        Ok(subreddit) => (StatusCode::CREATED, Json(subreddit)).into_response(),
        Err(err) => server_error(err),
    }
}

async fn delete_subreddit_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    match state.store.delete_subreddit(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "subreddit not found"),
        Err(err) => server_error(err),
    }
}

#[derive(Debug, Deserialize, Default)]
struct RunsQuery {
    limit: Option<i64>,
}

async fn list_runs_handler(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RUNS_LIMIT)
        .clamp(1, MAX_RUNS_LIMIT);
    match state.store.list_runs(limit).await {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => server_error(err),
    }
}

async fn run_detail_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    match state.store.run_detail(id).await {
        Ok(Some(detail)) => Json(detail).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "run not found"),
        Err(err) => server_error(err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerPayload {
    subreddit_id: Uuid,
    window_days: u32,
}

async fn trigger_run_handler(
    State(state): State<AppState>,
    Json(payload): Json<TriggerPayload>,
) -> Response {
    let window = match WindowDays::try_from(payload.window_days) {
        Ok(window) => window,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, &message),
    };
    match state.trigger.trigger(payload.subreddit_id, window).await {
        Ok(outcome) => {
            // A failed run still has a terminal record; the status code
            // reflects the outcome, the body carries the run either way.
            let code = if outcome.status == RunStatus::Failed {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            (
                code,
                Json(json!({
                    "id": outcome.run_id,
                    "status": outcome.status,
                    "stats": outcome.stats,
                    "error": outcome.error_message,
                })),
            )
                .into_response()
        }
        Err(TriggerError::SubredditNotFound) => {
            json_error(StatusCode::NOT_FOUND, "subreddit not found")
        }
        Err(TriggerError::Setup(err)) => server_error(err),
    }
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        &format!("internal error: {err:#}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use threadmine_core::{RunStats, Severity};
    use tower::ServiceExt;

    #[derive(Default)]
    struct StubStore {
        subreddits: Vec<TrackedSubreddit>,
        runs: Vec<ScrapeRun>,
        detail: Option<RunDetail>,
        delete_hits: bool,
    }

    #[async_trait]
    impl ApiStore for StubStore {
        async fn health_now(&self) -> Result<DateTime<Utc>> {
            Ok(Utc::now())
        }

        async fn list_subreddits(&self) -> Result<Vec<TrackedSubreddit>> {
            Ok(self.subreddits.clone())
        }

        async fn upsert_subreddit(
            &self,
            name: &str,
            is_active: bool,
        ) -> Result<TrackedSubreddit> {
            Ok(TrackedSubreddit {
                id: Uuid::new_v4(),
                name: name.to_string(),
                is_active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
        }

        async fn delete_subreddit(&self, _id: Uuid) -> Result<bool> {
            Ok(self.delete_hits)
        }

        async fn list_runs(&self, limit: i64) -> Result<Vec<ScrapeRun>> {
            Ok(self.runs.iter().take(limit as usize).cloned().collect())
        }

        async fn run_detail(&self, id: Uuid) -> Result<Option<RunDetail>> {
            Ok(self.detail.clone().filter(|detail| detail.run.id == id))
        }
    }

    enum TriggerBehavior {
        NotFound,
        Outcome(RunOutcome),
    }

    struct StubTrigger(TriggerBehavior);

    #[async_trait]
    impl ScrapeTrigger for StubTrigger {
        async fn trigger(
            &self,
            _subreddit_id: Uuid,
            _window: WindowDays,
        ) -> Result<RunOutcome, TriggerError> {
            match &self.0 {
                TriggerBehavior::NotFound => Err(TriggerError::SubredditNotFound),
                TriggerBehavior::Outcome(outcome) => Ok(outcome.clone()),
            }
        }
    }

    fn state_with(store: StubStore, trigger: StubTrigger) -> AppState {
        AppState {
            store: Arc::new(store),
            trigger: Arc::new(trigger),
        }
    }

    fn completed_outcome() -> RunOutcome {
        RunOutcome {
            run_id: Uuid::new_v4(),
            status: RunStatus::Completed,
            stats: RunStats {
                posts_scraped: 2,
                ..Default::default()
            },
            error_message: None,
        }
    }

    fn sample_run() -> ScrapeRun {
        ScrapeRun {
            id: Uuid::new_v4(),
            subreddit_id: Uuid::new_v4(),
            subreddit_name: "selfhosted".into(),
            window_days: 7,
            status: RunStatus::Completed,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            error_message: None,
            stats: RunStats::default(),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = app(state_with(
            StubStore::default(),
            StubTrigger(TriggerBehavior::NotFound),
        ));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn create_subreddit_normalizes_and_validates_name() {
        let app = app(state_with(
            StubStore::default(),
            StubTrigger(TriggerBehavior::NotFound),
        ));

        let created = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/subreddits")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": "  r/SelfHosted "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let body = body_json(created).await;
        assert_eq!(body["name"], "selfhosted");

        let rejected = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/subreddits")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": " r/ "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_subreddit_maps_row_count_to_status() {
        let hit = app(state_with(
            StubStore {
                delete_hits: true,
                ..Default::default()
            },
            StubTrigger(TriggerBehavior::NotFound),
        ));
        let response = hit
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/subreddits/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let miss = app(state_with(
            StubStore::default(),
            StubTrigger(TriggerBehavior::NotFound),
        ));
        let response = miss
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/subreddits/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn runs_list_serializes_camel_case() {
        let app = app(state_with(
            StubStore {
                runs: vec![sample_run()],
                ..Default::default()
            },
            StubTrigger(TriggerBehavior::NotFound),
        ));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/runs?limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["subredditName"], "selfhosted");
        assert_eq!(body[0]["windowDays"], 7);
        assert!(body[0]["stats"]["postsScraped"].is_number());
    }

    #[tokio::test]
    async fn run_detail_includes_clusters_and_ideas_or_404s() {
        let run = sample_run();
        let run_id = run.id;
        let detail = RunDetail {
            run,
            clusters: vec![threadmine_core::ProblemCluster {
                id: Uuid::new_v4(),
                title: "unreliable sync".into(),
                summary: "jobs silently stop".into(),
                frequency: 2,
                severity: Severity::Medium,
                evidence: vec!["statement".into()],
                created_at: Utc::now(),
            }],
            ideas: vec![],
        };
        let app = app(state_with(
            StubStore {
                detail: Some(detail),
                ..Default::default()
            },
            StubTrigger(TriggerBehavior::NotFound),
        ));

        let found = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/runs/{run_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(found.status(), StatusCode::OK);
        let body = body_json(found).await;
        assert_eq!(body["clusters"][0]["severity"], "medium");
        assert_eq!(body["subredditName"], "selfhosted");

        let missing = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/runs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trigger_validates_window_and_maps_outcomes() {
        let trigger_request = |window: u32| {
            Request::builder()
                .method("POST")
                .uri("/api/scrape/run")
                .header("content-type", "application/json")
                .body(Body::from(format!(
                    r#"{{"subredditId": "{}", "windowDays": {window}}}"#,
                    Uuid::new_v4()
                )))
                .unwrap()
        };

        let bad_window = app(state_with(
            StubStore::default(),
            StubTrigger(TriggerBehavior::Outcome(completed_outcome())),
        ));
        let response = bad_window.oneshot(trigger_request(14)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let unknown = app(state_with(
            StubStore::default(),
            StubTrigger(TriggerBehavior::NotFound),
        ));
        let response = unknown.oneshot(trigger_request(7)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let completed = app(state_with(
            StubStore::default(),
            StubTrigger(TriggerBehavior::Outcome(completed_outcome())),
        ));
        let response = completed.oneshot(trigger_request(1)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["stats"]["postsScraped"], 2);

        let failed_outcome = RunOutcome {
            status: RunStatus::Failed,
            error_message: Some("reading checkpoint: timeout".into()),
            ..completed_outcome()
        };
        let failed = app(state_with(
            StubStore::default(),
            StubTrigger(TriggerBehavior::Outcome(failed_outcome)),
        ));
        let response = failed.oneshot(trigger_request(30)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["status"], "failed");
        assert!(body["error"].as_str().unwrap().contains("checkpoint"));
    }
}
