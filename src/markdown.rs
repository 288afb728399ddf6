//! Minimal HTML to Markdown conversion for document bodies.
//!
//! Handles the handful of elements documents actually use (headings,
//! paragraphs, line breaks, lists, emphasis, links) and strips everything
//! else. The output is deterministic so repeated runs write identical files.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h([1-6])(?:\s[^>]*)?>(.*?)</h[1-6]\s*>").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#).unwrap()
});
static STRONG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(?:b|strong)(?:\s[^>]*)?>(.*?)</(?:b|strong)\s*>").unwrap());
static EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(?:i|em)(?:\s[^>]*)?>(.*?)</(?:i|em)\s*>").unwrap());
static LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<li(?:\s[^>]*)?>").unwrap());
static BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static BLOCK_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(?:p|div|ul|ol|blockquote|pre|table|tr)(?:\s[^>]*)?>").unwrap());
static BLOCK_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(?:p|div|ul|ol|blockquote|pre|table|tr)\s*>").unwrap());
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static EXTRA_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());
static TRAILING_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)[ \t]+$").unwrap());

/// Convert an HTML fragment to Markdown text.
pub fn html_to_markdown(html: &str) -> String {
    let md = HEADING.replace_all(html, |caps: &Captures| {
        let level: usize = caps[1].parse().unwrap_or(1);
        format!("\n\n{} {}\n\n", "#".repeat(level), caps[2].trim())
    });
    let md = LINK.replace_all(&md, |caps: &Captures| format!("[{}]({})", caps[2].trim(), &caps[1]));
    let md = STRONG.replace_all(&md, "**$1**");
    let md = EMPHASIS.replace_all(&md, "_${1}_");
    let md = LIST_ITEM.replace_all(&md, "\n- ");
    let md = BREAK.replace_all(&md, "\n");
    let md = BLOCK_OPEN.replace_all(&md, "\n\n");
    let md = BLOCK_CLOSE.replace_all(&md, "\n");
    let md = ANY_TAG.replace_all(&md, "");
    let md = decode_entities(&md);
    let md = TRAILING_SPACE.replace_all(&md, "");
    let md = EXTRA_NEWLINES.replace_all(&md, "\n\n");

    let trimmed = md.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{trimmed}\n")
}

fn decode_entities(text: &str) -> String {
    // `&amp;` last so that `&amp;lt;` stays `&lt;`.
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
