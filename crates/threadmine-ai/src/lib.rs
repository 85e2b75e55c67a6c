//! OpenRouter-backed synthesis client: problem extraction, clustering, and
//! idea generation, with model auto-selection and degrade-to-empty parsing.

mod models;
mod output;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use threadmine_core::{ClusterDraft, IdeaDraft, Synthesizer};

pub use models::{choose_model, ModelInfo, DEFAULT_MODEL, PREFERRED_MODELS};
pub use output::{clusters_from_text, idea_from_text, problems_from_text, strip_code_fences};

pub const CRATE_NAME: &str = "threadmine-ai";

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";
/// Character window handed to extraction prompts.
const EXTRACT_INPUT_LIMIT: usize = 3000;
/// Extraction yields at most this many statements per source text.
const MAX_PROBLEMS_PER_CALL: usize = 5;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("OPENROUTER_API_KEY is not set")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider error ({status}): {body}")]
    Provider { status: u16, body: String },
    #[error("provider returned no completion")]
    EmptyCompletion,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: String,
    /// Explicit model id; absence triggers catalog auto-selection.
    pub model_override: Option<String>,
    pub referer: String,
    pub app_title: String,
    pub timeout: std::time::Duration,
}

impl AiConfig {
    pub fn from_env() -> Result<Self, AiError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(AiError::MissingApiKey)?;
        Ok(Self {
            api_key,
            model_override: std::env::var("OPENROUTER_MODEL").ok().filter(|v| !v.is_empty()),
            referer: "https://threadmine.dev".to_string(),
            app_title: "Threadmine".to_string(),
            timeout: std::time::Duration::from_secs(45),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelCatalog {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

/// Session-scoped OpenRouter client. Model selection resolves once per
/// client lifetime and is cached; construct one client per run.
pub struct OpenRouterClient {
    config: AiConfig,
    http: reqwest::Client,
    selected_model: OnceCell<String>,
}

impl OpenRouterClient {
    pub fn new(config: AiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            http,
            selected_model: OnceCell::new(),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&self.config.referer) {
            headers.insert("HTTP-Referer", value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.config.app_title) {
            headers.insert("X-Title", value);
        }
        headers
    }

    /// Resolve the model id exactly once: explicit override, else preferred
    /// models present in the provider catalog, else the cheapest catalog
    /// entry meeting the context floor, else the fixed default when the
    /// catalog itself cannot be fetched.
    async fn model(&self) -> &str {
        self.selected_model
            .get_or_init(|| async {
                if let Some(model) = &self.config.model_override {
                    return model.clone();
                }
                match self.fetch_catalog().await {
                    Ok(catalog) => choose_model(&catalog).unwrap_or_else(|| {
                        warn!("no catalog model qualified, using default");
                        DEFAULT_MODEL.to_string()
                    }),
                    Err(err) => {
                        warn!(error = %err, "model catalog unavailable, using default");
                        DEFAULT_MODEL.to_string()
                    }
                }
            })
            .await
    }

    async fn fetch_catalog(&self) -> Result<Vec<ModelInfo>, AiError> {
        let url = format!("{OPENROUTER_API_URL}/models");
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(AiError::Provider {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let catalog: ModelCatalog = response.json().await?;
        Ok(catalog.data)
    }

    async fn chat(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String, AiError> {
        let model = self.model().await;
        debug!(model, max_tokens, "chat completion request");

        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
            max_tokens,
        };

        let url = format!("{OPENROUTER_API_URL}/chat/completions");
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Provider { status, body });
        }

        let completion: ChatResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(AiError::EmptyCompletion)
    }
}

#[async_trait]
impl Synthesizer for OpenRouterClient {
    async fn extract_problems(&self, text: &str, source_label: &str) -> Result<Vec<String>> {
        let prompt = extraction_prompt(text, source_label);
        let response = self.chat(&prompt, 0.5, 1000).await?;
        let mut problems = problems_from_text(&response);
        problems.truncate(MAX_PROBLEMS_PER_CALL);
        Ok(problems)
    }

    async fn cluster_problems(&self, statements: &[String]) -> Result<Vec<ClusterDraft>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = clustering_prompt(statements);
        let response = self.chat(&prompt, 0.4, 2000).await?;
        Ok(clusters_from_text(&response))
    }

    async fn generate_idea(&self, cluster: &ClusterDraft) -> Result<Option<IdeaDraft>> {
        let prompt = idea_prompt(cluster);
        let response = self.chat(&prompt, 0.7, 1500).await?;
        Ok(idea_from_text(&response))
    }
}

fn extraction_prompt(text: &str, source_label: &str) -> String {
    let window = output::truncate_chars(text, EXTRACT_INPUT_LIMIT);
    format!(
        r#"You are analyzing {source_label} to extract pain points and problems users are experiencing.

Text to analyze:
"""
{window}
"""

Extract 0-5 distinct problems or pain points mentioned in this text. Focus on:
- Specific problems or frustrations
- Unmet needs or desires
- Challenges or obstacles
- Feature requests that indicate problems

Return ONLY a JSON array of problem strings. Each should be a clear, concise statement (10-30 words).
If no clear problems are found, return an empty array [].

Example output format:
["Problem statement 1", "Problem statement 2"]"#
    )
}

fn clustering_prompt(statements: &[String]) -> String {
    let numbered = statements
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{i}. {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"You are clustering similar problems together to identify recurring themes.

Problems to cluster ({count} total):
{numbered}

Create 3-8 clusters of similar problems. For each cluster:
1. Give it a clear title (3-7 words)
2. Write a summary that captures the core issue
3. Estimate frequency (how many problems relate to this)
4. Assess severity: "low", "medium", or "high"
5. List the indices of problems that belong to this cluster

Return ONLY a JSON array of cluster objects.

Example format:
[
  {{
    "title": "Integration Complexity",
    "summary": "Users struggle with complex API integration and lack of clear documentation",
    "frequency": 5,
    "severity": "high",
    "memberIndices": [0, 3, 7]
  }}
]"#,
        count = statements.len()
    )
}

fn idea_prompt(cluster: &ClusterDraft) -> String {
    format!(
        r#"You are a micro-SaaS idea generator. Based on this recurring problem cluster, generate a concrete business idea.

Problem Cluster:
- Title: {title}
- Summary: {summary}
- Frequency: {frequency} mentions
- Severity: {severity}

Generate a focused micro-SaaS idea to solve this problem. Return ONLY a JSON object with:
- title: Product name (2-4 words)
- oneLiner: Value proposition (10-15 words)
- targetUser: Who this is for (1-2 sentences)
- solution: What it does (2-3 sentences)
- mvp: Array of 3-5 core features for MVP
- pricing: Suggested pricing model (1 sentence)
- differentiators: Array of 2-3 key differentiators
- risks: Array of 2-3 main risks
- acquisitionChannel: Best channel to reach users (1 sentence)"#,
        title = cluster.title,
        summary = cluster.summary,
        frequency = cluster.frequency,
        severity = cluster.severity.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_truncates_input() {
        let text = "x".repeat(10_000);
        let prompt = extraction_prompt(&text, "post in r/test");
        assert!(prompt.len() < 4000);
        assert!(prompt.contains("post in r/test"));
    }

    #[test]
    fn clustering_prompt_numbers_statements() {
        let statements = vec!["first problem".to_string(), "second problem".to_string()];
        let prompt = clustering_prompt(&statements);
        assert!(prompt.contains("0. first problem"));
        assert!(prompt.contains("1. second problem"));
        assert!(prompt.contains("(2 total)"));
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        // from_env reads the process env; only assert the error display here.
        let err = AiError::MissingApiKey;
        assert_eq!(err.to_string(), "OPENROUTER_API_KEY is not set");
    }
}
