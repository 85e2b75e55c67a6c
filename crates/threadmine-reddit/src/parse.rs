//! Pure decoding of Reddit listing and comment-tree payloads.

use serde::Deserialize;
use serde_json::Value;

use threadmine_core::{ForumComment, ForumPost, PostPage};

#[derive(Debug, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub children: Vec<ListingChild>,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListingChild {
    #[serde(default)]
    pub kind: String,
    pub data: RawPost,
}

#[derive(Debug, Deserialize)]
pub struct RawPost {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
}

/// Collect the in-window prefix of a newest-first listing page.
///
/// The listing is descending by creation time, so the first post older than
/// the cutoff ends collection for the whole walk: `next_cursor` is `None`
/// whenever the cutoff was hit mid-page, even if the provider returned a
/// cursor of its own.
pub fn page_from_listing(listing: Listing, cutoff_epoch: i64) -> PostPage {
    let mut posts = Vec::new();
    let mut cutoff_hit = false;

    for child in listing.data.children {
        if child.kind != "t3" {
            continue;
        }
        let raw = child.data;
        if (raw.created_utc as i64) < cutoff_epoch {
            cutoff_hit = true;
            break;
        }
        posts.push(ForumPost {
            external_id: raw.id,
            title: raw.title,
            selftext: raw.selftext,
            author: raw.author.unwrap_or_else(|| "[deleted]".to_string()),
            created_utc: raw.created_utc as i64,
            permalink: raw.permalink,
            url: raw.url,
            score: raw.score,
            num_comments: raw.num_comments,
        });
    }

    let next_cursor = if cutoff_hit { None } else { listing.data.after };
    PostPage { posts, next_cursor }
}

/// Walk the comment payload (`[post listing, comment listing]`) and collect
/// up to `max_count` comments down to `max_depth`, skipping deletion
/// placeholders. The reply field is `""` when empty, so this walks the raw
/// JSON rather than a typed tree.
pub fn comments_from_tree(
    body: &Value,
    post_external_id: &str,
    max_depth: u32,
    max_count: usize,
) -> Vec<ForumComment> {
    let mut comments = Vec::new();
    let Some(children) = body
        .get(1)
        .and_then(|v| v.get("data"))
        .and_then(|v| v.get("children"))
        .and_then(|v| v.as_array())
    else {
        return comments;
    };
    walk_comment_children(children, post_external_id, 0, max_depth, max_count, &mut comments);
    comments
}

fn walk_comment_children(
    children: &[Value],
    post_external_id: &str,
    depth: u32,
    max_depth: u32,
    max_count: usize,
    out: &mut Vec<ForumComment>,
) {
    if depth > max_depth {
        return;
    }
    for child in children {
        if out.len() >= max_count {
            return;
        }
        if child.get("kind").and_then(Value::as_str) != Some("t1") {
            continue;
        }
        let Some(data) = child.get("data") else {
            continue;
        };

        let body = data.get("body").and_then(Value::as_str).unwrap_or("");
        if !body.is_empty() && body != "[deleted]" && body != "[removed]" {
            out.push(ForumComment {
                external_id: data
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                external_post_id: post_external_id.to_string(),
                parent_external_id: strip_kind_prefix(
                    data.get("parent_id").and_then(Value::as_str).unwrap_or(""),
                )
                .to_string(),
                author: data
                    .get("author")
                    .and_then(Value::as_str)
                    .unwrap_or("[deleted]")
                    .to_string(),
                body: body.to_string(),
                created_utc: data
                    .get("created_utc")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0) as i64,
                score: data.get("score").and_then(Value::as_i64).unwrap_or(0),
            });
        }

        if let Some(replies) = data
            .get("replies")
            .and_then(|v| v.get("data"))
            .and_then(|v| v.get("children"))
            .and_then(|v| v.as_array())
        {
            walk_comment_children(replies, post_external_id, depth + 1, max_depth, max_count, out);
        }
    }
}

/// `t1_abc` / `t3_abc` -> `abc`.
fn strip_kind_prefix(value: &str) -> &str {
    match value.split_once('_') {
        Some((kind, rest)) if kind.len() == 2 && kind.starts_with('t') => rest,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing_with(posts: Vec<(&str, i64)>, after: Option<&str>) -> Listing {
        let children = posts
            .into_iter()
            .map(|(id, created)| {
                json!({
                    "kind": "t3",
                    "data": {
                        "id": id,
                        "title": format!("post {id}"),
                        "selftext": "body",
                        "author": "someone",
                        "created_utc": created as f64,
                        "permalink": format!("/r/test/{id}"),
                        "url": format!("https://reddit.com/r/test/{id}"),
                        "score": 10,
                        "num_comments": 2
                    }
                })
            })
            .collect::<Vec<_>>();
        serde_json::from_value(json!({
            "data": { "children": children, "after": after }
        }))
        .unwrap()
    }

    #[test]
    fn cutoff_mid_page_truncates_and_clears_cursor() {
        let listing = listing_with(vec![("a", 300), ("b", 200), ("c", 50)], Some("t3_c"));
        let page = page_from_listing(listing, 100);
        assert_eq!(page.posts.len(), 2);
        assert_eq!(page.posts[0].external_id, "a");
        assert_eq!(page.posts[1].external_id, "b");
        // Provider offered a cursor, but the cutoff overrides it.
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn full_in_window_page_keeps_provider_cursor() {
        let listing = listing_with(vec![("a", 300), ("b", 200)], Some("t3_b"));
        let page = page_from_listing(listing, 100);
        assert_eq!(page.posts.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("t3_b"));
    }

    #[test]
    fn exhausted_listing_has_no_cursor() {
        let listing = listing_with(vec![("a", 300)], None);
        let page = page_from_listing(listing, 100);
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn non_post_children_are_ignored() {
        let listing: Listing = serde_json::from_value(json!({
            "data": {
                "children": [
                    { "kind": "more", "data": { "id": "x", "created_utc": 500.0 } },
                    { "kind": "t3", "data": { "id": "a", "created_utc": 400.0 } }
                ],
                "after": null
            }
        }))
        .unwrap();
        let page = page_from_listing(listing, 100);
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].external_id, "a");
    }

    fn comment(id: &str, body: &str, score: i64, replies: Value) -> Value {
        json!({
            "kind": "t1",
            "data": {
                "id": id,
                "body": body,
                "author": "u",
                "created_utc": 100.0,
                "score": score,
                "parent_id": "t3_post1",
                "replies": replies
            }
        })
    }

    fn tree(children: Vec<Value>) -> Value {
        json!([
            { "data": { "children": [] } },
            { "data": { "children": children } }
        ])
    }

    #[test]
    fn walker_collects_nested_replies_and_skips_placeholders() {
        let nested = json!({ "data": { "children": [comment("c3", "nested reply", 1, json!(""))] } });
        let body = tree(vec![
            comment("c1", "top level", 5, nested),
            comment("c2", "[deleted]", 9, json!("")),
            comment("c4", "[removed]", 9, json!("")),
            comment("c5", "kept", 2, json!("")),
        ]);
        let comments = comments_from_tree(&body, "post1", 2, 100);
        let ids: Vec<_> = comments.iter().map(|c| c.external_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3", "c5"]);
        assert!(comments.iter().all(|c| c.external_post_id == "post1"));
        assert_eq!(comments[0].parent_external_id, "post1");
    }

    #[test]
    fn walker_honors_depth_limit() {
        let deep = json!({ "data": { "children": [comment("c2", "too deep", 1, json!(""))] } });
        let body = tree(vec![comment("c1", "top", 1, deep)]);
        let comments = comments_from_tree(&body, "post1", 0, 100);
        let ids: Vec<_> = comments.iter().map(|c| c.external_id.as_str()).collect();
        assert_eq!(ids, vec!["c1"]);
    }

    #[test]
    fn walker_honors_max_count() {
        let body = tree(vec![
            comment("c1", "one", 1, json!("")),
            comment("c2", "two", 1, json!("")),
            comment("c3", "three", 1, json!("")),
        ]);
        let comments = comments_from_tree(&body, "post1", 1, 2);
        assert_eq!(comments.len(), 2);
    }
}
