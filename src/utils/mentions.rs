//! Rewrite Slack's inline markup (`<@U123>`, `<#C123|general>`, `<!here>`, links)
//! into display text.
//!
//! Scanning is pure: [`parse`] splits a message into segments, the identities the
//! segments reference are resolved in one batch, and [`render_segments`] stitches
//! the text back together.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::cache::identity::IdentityCache;
use crate::core::models::IdentityKey;
use crate::errors::SlackError;

static SCHEME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").ok());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    User { id: String, label: Option<String> },
    Channel { id: String, fallback: Option<String> },
    Broadcast(String),
    Subteam { id: String, label: Option<String> },
    Link { url: String, label: Option<String> },
    /// Markup we do not understand, kept byte for byte.
    Verbatim(String),
}

/// Undo Slack's three control-character escapes.
#[must_use]
pub fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn split_label(body: &str) -> (&str, Option<String>) {
    match body.split_once('|') {
        Some((head, label)) if !label.is_empty() => (head, Some(decode_entities(label))),
        Some((head, _)) => (head, None),
        None => (body, None),
    }
}

fn is_id(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn classify(content: &str) -> Option<Segment> {
    if let Some(body) = content.strip_prefix('@') {
        let (id, label) = split_label(body);
        return is_id(id).then(|| Segment::User {
            id: id.to_string(),
            label,
        });
    }
    if let Some(body) = content.strip_prefix('#') {
        let (id, fallback) = split_label(body);
        return is_id(id).then(|| Segment::Channel {
            id: id.to_string(),
            fallback,
        });
    }
    if let Some(body) = content.strip_prefix('!') {
        let (command, label) = split_label(body);
        return match command {
            "here" | "channel" | "everyone" => Some(Segment::Broadcast(command.to_string())),
            _ => command
                .strip_prefix("subteam^")
                .filter(|id| is_id(id))
                .map(|id| Segment::Subteam {
                    id: id.to_string(),
                    label,
                }),
        };
    }
    let is_link = SCHEME_RE
        .as_ref()
        .is_some_and(|re| re.is_match(content));
    if is_link {
        let (url, label) = split_label(content);
        return Some(Segment::Link {
            url: decode_entities(url),
            label,
        });
    }
    None
}

/// Split raw message text into literal text and markup segments, left to right.
#[must_use]
pub fn parse(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = raw;

    while let Some(open) = rest.find('<') {
        if open > 0 {
            segments.push(Segment::Text(decode_entities(&rest[..open])));
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            // Unclosed bracket: everything left is literal.
            segments.push(Segment::Verbatim(rest[open..].to_string()));
            return segments;
        };
        let content = &after[..close];
        if let Some(inner) = content.rfind('<') {
            // A stray `<` before the real macro is literal text.
            segments.push(Segment::Text(decode_entities(&rest[open..=open + inner])));
            rest = &after[inner..];
            continue;
        }
        segments.push(
            classify(content).unwrap_or_else(|| Segment::Verbatim(format!("<{content}>"))),
        );
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(decode_entities(rest)));
    }
    segments
}

/// Identities the segments need, deduplicated in first-seen order.
#[must_use]
pub fn identity_keys(segments: &[Segment]) -> Vec<IdentityKey> {
    let mut keys: Vec<IdentityKey> = Vec::new();
    for segment in segments {
        let key = match segment {
            Segment::User { id, .. } => IdentityKey::user(id.as_str()),
            Segment::Channel { id, .. } => IdentityKey::channel(id.as_str()),
            _ => continue,
        };
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn resolved<'a>(labels: &'a HashMap<IdentityKey, String>, key: &IdentityKey) -> Option<&'a str> {
    labels
        .get(key)
        .map(String::as_str)
        .filter(|label| *label != key.id)
}

/// Stitch segments back into display text using already-resolved labels.
/// A label equal to the raw id counts as unresolved.
#[must_use]
pub fn render_segments(segments: &[Segment], labels: &HashMap<IdentityKey, String>) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) | Segment::Verbatim(text) => out.push_str(text),
            Segment::User { id, label } => {
                let key = IdentityKey::user(id.as_str());
                let name = resolved(labels, &key)
                    .or(label.as_deref())
                    .unwrap_or(id);
                out.push('@');
                out.push_str(name.trim_start_matches('@'));
            }
            Segment::Channel { id, fallback } => {
                let key = IdentityKey::channel(id.as_str());
                let name = resolved(labels, &key)
                    .or(fallback.as_deref())
                    .unwrap_or(id);
                out.push('#');
                out.push_str(name.trim_start_matches('#'));
            }
            Segment::Broadcast(word) => {
                out.push('@');
                out.push_str(word);
            }
            Segment::Subteam { id, label } => match label {
                Some(label) if label.starts_with('@') => out.push_str(label),
                Some(label) => {
                    out.push('@');
                    out.push_str(label);
                }
                None => {
                    out.push_str("@subteam-");
                    out.push_str(id);
                }
            },
            Segment::Link { url, label } => out.push_str(label.as_deref().unwrap_or(url)),
        }
    }
    out
}

/// Render one message's text, resolving referenced identities through the cache.
///
/// # Errors
///
/// Only cancellation propagates; failed lookups degrade to the raw id.
pub async fn render(raw: &str, identities: &IdentityCache) -> Result<String, SlackError> {
    let mut rendered = render_all(&[raw], identities).await?;
    Ok(rendered.pop().unwrap_or_default())
}

/// Render many texts with a single batched, deduplicated identity resolution.
///
/// # Errors
///
/// Only cancellation propagates; failed lookups degrade to the raw id.
pub async fn render_all(texts: &[&str], identities: &IdentityCache) -> Result<Vec<String>, SlackError> {
    let parsed: Vec<Vec<Segment>> = texts.iter().map(|t| parse(t)).collect();
    let mut keys: Vec<IdentityKey> = Vec::new();
    for segments in &parsed {
        for key in identity_keys(segments) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    let labels = identities.resolve_many(keys).await?;
    Ok(parsed
        .iter()
        .map(|segments| render_segments(segments, &labels))
        .collect())
}

#[cfg(test)]
mod mentions_tests {
    use super::*;

    fn labels(pairs: &[(IdentityKey, &str)]) -> HashMap<IdentityKey, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.clone(), (*v).to_string()))
            .collect()
    }

    fn render_with(raw: &str, pairs: &[(IdentityKey, &str)]) -> String {
        render_segments(&parse(raw), &labels(pairs))
    }

    #[test]
    fn test_user_channel_and_broadcast() {
        let out = render_with(
            "<@U1> check <#C1|general> <!channel>",
            &[(IdentityKey::user("U1"), "alice")],
        );
        assert_eq!(out, "@alice check #general @channel");
    }

    #[test]
    fn test_cache_label_beats_embedded_channel_name() {
        let out = render_with("<#C1|old-name>", &[(IdentityKey::channel("C1"), "new-name")]);
        assert_eq!(out, "#new-name");
    }

    #[test]
    fn test_unresolved_identities_fall_back() {
        assert_eq!(render_with("<@U9|bob>", &[(IdentityKey::user("U9"), "U9")]), "@bob");
        assert_eq!(render_with("<@U9>", &[]), "@U9");
        assert_eq!(render_with("<#C9>", &[]), "#C9");
    }

    #[test]
    fn test_broadcast_with_label() {
        assert_eq!(render_with("<!here|here> <!everyone>", &[]), "@here @everyone");
    }

    #[test]
    fn test_subteam() {
        assert_eq!(render_with("<!subteam^S123|@oncall> ping", &[]), "@oncall ping");
        assert_eq!(render_with("<!subteam^S123>", &[]), "@subteam-S123");
    }

    #[test]
    fn test_links() {
        assert_eq!(
            render_with("see <https://example.com/a?b=1&amp;c=2|the doc>", &[]),
            "see the doc"
        );
        assert_eq!(
            render_with("<https://example.com/a?b=1&amp;c=2>", &[]),
            "https://example.com/a?b=1&c=2"
        );
        assert_eq!(render_with("<mailto:a@b.co|mail me>", &[]), "mail me");
    }

    #[test]
    fn test_unknown_and_unclosed_pass_through() {
        assert_eq!(render_with("<!date^123|fallback>", &[]), "<!date^123|fallback>");
        assert_eq!(render_with("<nonsense here>", &[]), "<nonsense here>");
        assert_eq!(render_with("a <@U1 never closes", &[]), "a <@U1 never closes");
    }

    #[test]
    fn test_stray_angle_bracket_before_macro() {
        let pairs = [(IdentityKey::user("U1"), "alice")];
        assert_eq!(render_with("a <b <@U1>", &pairs), "a <b @alice");
        assert_eq!(render_with("<< <@U1> >", &pairs), "<< @alice >");
    }

    #[test]
    fn test_entities_decoded_in_text_only() {
        assert_eq!(
            render_with("1 &lt; 2 &amp;&amp; 3 &gt; 2", &[]),
            "1 < 2 && 3 > 2"
        );
    }

    #[test]
    fn test_identity_keys_are_deduplicated() {
        let keys = identity_keys(&parse("<@U1> <@U2> <@U1> <#C1>"));
        assert_eq!(
            keys,
            vec![
                IdentityKey::user("U1"),
                IdentityKey::user("U2"),
                IdentityKey::channel("C1"),
            ]
        );
    }
}
