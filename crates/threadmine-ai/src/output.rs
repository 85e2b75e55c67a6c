//! Normalization of model output. Parsing never propagates an error:
//! malformed output degrades to an empty result for that call.

use serde::Deserialize;
use tracing::warn;

use threadmine_core::{normalize_severity, ClusterDraft, IdeaDraft};

/// Remove markdown code fences models like to wrap JSON in.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// Truncate to at most `limit` characters without splitting a code point.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Parse an extraction response into statements; anything that is not a
/// JSON string array yields nothing.
pub fn problems_from_text(response: &str) -> Vec<String> {
    let cleaned = strip_code_fences(response);
    match serde_json::from_str::<Vec<String>>(&cleaned) {
        Ok(problems) => problems
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        Err(err) => {
            warn!(error = %err, "extraction output was not a JSON string array");
            Vec::new()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    frequency: i64,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default, rename = "memberIndices")]
    member_indices: Vec<usize>,
}

/// Parse a clustering response. Severity text is normalized onto the
/// canonical scale here so nothing downstream ever sees the raw value.
pub fn clusters_from_text(response: &str) -> Vec<ClusterDraft> {
    let cleaned = strip_code_fences(response);
    match serde_json::from_str::<Vec<RawCluster>>(&cleaned) {
        Ok(raw) => raw
            .into_iter()
            .map(|cluster| ClusterDraft {
                title: cluster.title,
                summary: cluster.summary,
                frequency: cluster.frequency.max(0),
                severity: normalize_severity(cluster.severity.as_deref()),
                member_indices: cluster.member_indices,
            })
            .collect(),
        Err(err) => {
            warn!(error = %err, "clustering output was not a JSON cluster array");
            Vec::new()
        }
    }
}

/// Parse an idea response; `None` on any shape mismatch.
pub fn idea_from_text(response: &str) -> Option<IdeaDraft> {
    let cleaned = strip_code_fences(response);
    match serde_json::from_str::<IdeaDraft>(&cleaned) {
        Ok(idea) => Some(idea),
        Err(err) => {
            warn!(error = %err, "idea output was not a JSON object");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadmine_core::Severity;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n[\"a\"]\n```"), "[\"a\"]");
        assert_eq!(strip_code_fences("  [\"a\"]  "), "[\"a\"]");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        let emoji = "🦀🦀🦀";
        assert_eq!(truncate_chars(emoji, 2), "🦀🦀");
    }

    #[test]
    fn problems_parse_and_drop_blanks() {
        let out = problems_from_text("```json\n[\"one\", \"  \", \"two\"]\n```");
        assert_eq!(out, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn malformed_problems_degrade_to_empty() {
        assert!(problems_from_text("Sorry, I cannot help with that.").is_empty());
        assert!(problems_from_text("{\"not\": \"an array\"}").is_empty());
    }

    #[test]
    fn clusters_parse_with_severity_normalization() {
        let response = r#"[
            {"title": "Slow sync", "summary": "s", "frequency": 4, "severity": "medium-high", "memberIndices": [0, 2]},
            {"title": "No docs", "summary": "s", "frequency": -1, "severity": "whatever", "memberIndices": []}
        ]"#;
        let clusters = clusters_from_text(response);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].severity, Severity::High);
        assert_eq!(clusters[0].member_indices, vec![0, 2]);
        assert_eq!(clusters[1].severity, Severity::Medium);
        assert_eq!(clusters[1].frequency, 0);
    }

    #[test]
    fn malformed_clusters_degrade_to_empty() {
        assert!(clusters_from_text("no json here").is_empty());
    }

    #[test]
    fn idea_parses_or_degrades_to_none() {
        let idea = idea_from_text(r#"```json
{"title": "SyncGuard", "oneLiner": "keep your sync alive", "mvp": ["alerts"]}
```"#);
        let idea = idea.unwrap();
        assert_eq!(idea.title, "SyncGuard");
        assert_eq!(idea.mvp, vec!["alerts".to_string()]);

        assert!(idea_from_text("I'd suggest a tool that...").is_none());
    }
}
