//! HTML-ish digest rendering and rune-bounded splitting (design §4.7).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use digest_core::model::{Channel, ChannelId, Item};

use crate::clustering::ClusterBuild;

/// Tags the external poster accepts; anything else is stripped but its
/// text content is preserved.
const ALLOWED_TAGS: &[&str] = &["b", "i", "u", "s", "code", "pre", "blockquote", "spoiler"];

/// Strips any tag not in [`ALLOWED_TAGS`] (and any `a` with a non-http(s)
/// scheme), keeping the inner text. A best-effort scanner, not a full HTML
/// parser — the renderer only ever emits the bounded tag set itself, so
/// this only guards against attacker- or model-supplied text smuggling
/// other tags through a summary.
#[must_use]
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    let mut anchor_open = 0u32;
    while let Some((i, c)) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }
        let Some(end) = input[i..].find('>') else {
            out.push(c);
            continue;
        };
        let tag_src = &input[i + 1..i + end];
        let is_close = tag_src.starts_with('/');
        let name_part = tag_src.trim_start_matches('/');
        let tag_name = name_part.split_whitespace().next().unwrap_or("").to_lowercase();

        if tag_name == "a" {
            if is_close {
                if anchor_open > 0 {
                    anchor_open -= 1;
                    out.push_str("</a>");
                } // else: matches a dropped opening tag, drop this one too.
            } else if let Some(href) = extract_href(name_part) {
                if href.starts_with("http://") || href.starts_with("https://") {
                    out.push_str(&format!("<a href=\"{href}\">"));
                    anchor_open += 1;
                } // else: becomes a bare anchor, i.e. the tag is dropped.
            }
        } else if ALLOWED_TAGS.contains(&tag_name.as_str()) {
            out.push('<');
            out.push_str(tag_src);
            out.push('>');
        }
        // Advance past the consumed tag.
        for _ in 0..(end) {
            chars.next();
        }
    }
    out
}

fn extract_href(attrs: &str) -> Option<String> {
    let marker = "href=\"";
    let start = attrs.find(marker)? + marker.len();
    let end = attrs[start..].find('"')? + start;
    Some(attrs[start..end].to_string())
}

/// One item selected for rendering, with enough context to attribute it.
#[derive(Debug, Clone)]
pub struct RenderItem {
    pub item: Item,
    pub channel: Channel,
}

/// Builds the full digest body for a window (design §4.7 sections).
#[must_use]
pub fn render_body(
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    items: &[RenderItem],
    clusters: &[ClusterBuild],
    editor_overview: Option<&str>,
) -> String {
    let mut body = String::new();
    body.push_str(&format!(
        "Digest for {} - {}\n",
        window_start.format("%H:%M"),
        window_end.format("%H:%M")
    ));

    let channel_count = items
        .iter()
        .map(|r| r.channel.id)
        .collect::<HashSet<ChannelId>>()
        .len();
    let topic_count = items
        .iter()
        .map(|r| r.item.topic.clone())
        .collect::<HashSet<_>>()
        .len();
    body.push_str(&format!(
        "{} items from {} channels | {} topics\n\n",
        items.len(),
        channel_count,
        topic_count
    ));

    if let Some(overview) = editor_overview {
        body.push_str("<blockquote>");
        body.push_str(&sanitize(overview));
        body.push_str("</blockquote>\n\n");
    }

    let mut rendered_summaries: HashSet<String> = HashSet::new();
    let clustered_ids: HashSet<_> = clusters.iter().flat_map(|c| c.member_item_ids.iter().copied()).collect();

    let tiers: [(&str, f64, f64); 3] = [
        ("Breaking", 0.8, f64::INFINITY),
        ("Notable", 0.5, 0.8),
        ("Also", f64::NEG_INFINITY, 0.5),
    ];

    for (label, lo, hi) in tiers {
        let tier_items: Vec<&RenderItem> = items
            .iter()
            .filter(|r| r.item.importance_score >= lo && r.item.importance_score < hi)
            .collect();
        if tier_items.is_empty() {
            continue;
        }
        body.push_str(&format!("=== {label} ===\n"));

        let tier_clusters: Vec<&ClusterBuild> = clusters
            .iter()
            .filter(|c| {
                c.member_item_ids
                    .iter()
                    .any(|id| tier_items.iter().any(|r| r.item.id == *id))
            })
            .collect();

        for cluster in &tier_clusters {
            let members: Vec<&RenderItem> = tier_items
                .iter()
                .filter(|r| cluster.member_item_ids.contains(&r.item.id))
                .copied()
                .collect();
            let Some(representative) = members.iter().find(|r| r.item.id == cluster.representative) else {
                continue;
            };
            if !rendered_summaries.insert(representative.item.summary.clone()) {
                continue;
            }
            body.push_str(&format!("-- {} --\n", cluster.topic));
            body.push_str(&sanitize(&representative.item.summary));
            body.push('\n');
            let sources: Vec<String> = members.iter().map(|r| r.channel.display_name.clone()).collect();
            body.push_str(&format!("sources: {}\n\n", sources.join(", ")));
        }

        for entry in &tier_items {
            if clustered_ids.contains(&entry.item.id) {
                continue;
            }
            if !rendered_summaries.insert(entry.item.summary.clone()) {
                continue;
            }
            body.push_str(&sanitize(&entry.item.summary));
            body.push('\n');
            body.push_str(&format!("source: {}\n\n", entry.channel.display_name));
        }
    }

    body
}

/// Split priorities, highest first (design §4.7 "Splitting").
const SPLIT_MARKERS: &[&str] = &["</blockquote>", "\n\n===", "\n\n", "\n-- ", "\nsource", "\n", " "];

/// Splits `body` into chunks of at most `rune_limit` runes (chars, not
/// bytes), preferring the highest-priority marker that fits. Open
/// formatting tags are closed at the end of a chunk and reopened at the
/// start of the next, except `blockquote`, which is only closed.
#[must_use]
pub fn split_body(body: &str, rune_limit: usize) -> Vec<String> {
    if body.chars().count() <= rune_limit {
        return vec![body.to_string()];
    }

    let mut chunks = Vec::new();
    let mut open_tags: Vec<String> = Vec::new();
    let mut remaining = body;

    loop {
        let rune_count = remaining.chars().count();
        if rune_count <= rune_limit {
            chunks.push(reopen_tags(&open_tags, remaining));
            break;
        }

        let limit_byte = byte_offset_for_rune_count(remaining, rune_limit);
        let split_at = best_split_point(remaining, limit_byte).unwrap_or(limit_byte);

        let (chunk, rest) = remaining.split_at(split_at);
        let tags_at_chunk_end = open_tags.clone();
        let mut closing = String::new();
        for tag in tags_at_chunk_end.iter().rev() {
            closing.push_str(&format!("</{tag}>"));
        }
        chunks.push(format!("{}{}", reopen_tags(&open_tags, chunk), closing));

        update_open_tags(&mut open_tags, chunk);
        // blockquote is closed but never reopened.
        open_tags.retain(|t| t != "blockquote");

        remaining = rest;
    }

    chunks
}

fn reopen_tags(open_tags: &[String], chunk: &str) -> String {
    let mut out = String::new();
    for tag in open_tags {
        out.push_str(&format!("<{tag}>"));
    }
    out.push_str(chunk);
    out
}

fn update_open_tags(open_tags: &mut Vec<String>, chunk: &str) {
    for tag in ALLOWED_TAGS {
        let opens = chunk.matches(&format!("<{tag}>")).count();
        let closes = chunk.matches(&format!("</{tag}>")).count();
        for _ in 0..opens.saturating_sub(closes) {
            open_tags.push((*tag).to_string());
        }
        for _ in 0..closes.saturating_sub(opens) {
            if let Some(pos) = open_tags.iter().rposition(|t| t == tag) {
                open_tags.remove(pos);
            }
        }
    }
}

fn byte_offset_for_rune_count(text: &str, rune_count: usize) -> usize {
    text.char_indices()
        .nth(rune_count)
        .map_or(text.len(), |(idx, _)| idx)
}

fn best_split_point(text: &str, max_byte: usize) -> Option<usize> {
    let window = &text[..max_byte.min(text.len())];
    for marker in SPLIT_MARKERS {
        if let Some(pos) = window.rfind(marker) {
            return Some(pos + marker.len());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_unsupported_tags_but_keeps_text() {
        assert_eq!(sanitize("<script>alert()</script>ok"), "alert()ok");
        assert_eq!(sanitize("<b>bold</b> text"), "<b>bold</b> text");
    }

    #[test]
    fn sanitize_accepts_only_http_https_anchors() {
        assert_eq!(
            sanitize("<a href=\"https://example.com\">link</a>"),
            "<a href=\"https://example.com\">link</a>"
        );
        assert_eq!(sanitize("<a href=\"javascript:alert(1)\">link</a>"), "link");
    }

    #[test]
    fn split_body_keeps_short_bodies_as_one_chunk() {
        let chunks = split_body("short body", 1000);
        assert_eq!(chunks, vec!["short body".to_string()]);
    }

    #[test]
    fn split_body_splits_long_bodies_by_rune_count() {
        let body = "word ".repeat(50);
        let chunks = split_body(&body, 20);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40);
        }
    }
}
