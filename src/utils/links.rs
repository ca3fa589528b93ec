use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::core::models::{ThreadRole, Ts};
use crate::errors::SlackError;

/// Encode a message timestamp the way permalinks do: `p` plus the digits with the dot removed.
#[must_use]
pub fn url_token(ts: &Ts) -> String {
    format!("p{}{:06}", ts.secs(), ts.micros())
}

/// Inverse of [`url_token`]. The last six digits are the microseconds.
///
/// # Errors
///
/// Returns `MalformedToken` unless the token is `p` followed by at least seven digits.
pub fn token_to_ts(token: &str) -> Result<Ts, SlackError> {
    let malformed = || SlackError::MalformedToken(token.to_string());
    let digits = token.strip_prefix('p').ok_or_else(malformed)?;
    if digits.len() < 7 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let (secs, micros) = digits.split_at(digits.len() - 6);
    let secs = secs.parse::<u64>().map_err(|_| malformed())?;
    let micros = micros.parse::<u32>().map_err(|_| malformed())?;
    Ok(Ts::new(secs, micros))
}

/// A parsed message permalink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permalink {
    /// First label of the host, e.g. `acme` in `acme.slack.com`.
    pub workspace: String,
    pub channel_id: String,
    pub message_ts: Ts,
    pub thread_ts: Option<Ts>,
}

impl Permalink {
    #[must_use]
    pub fn is_thread_reply(&self) -> bool {
        self.thread_ts.is_some_and(|t| t != self.message_ts)
    }

    #[must_use]
    pub fn role(&self) -> ThreadRole {
        match self.thread_ts {
            Some(t) if t == self.message_ts => ThreadRole::Parent,
            Some(_) => ThreadRole::Reply,
            None => ThreadRole::Standalone,
        }
    }
}

static ARCHIVES_PATH_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^/archives/([A-Z0-9]+)/(p\d+)/?$").ok());

/// Parse `https://<workspace>.slack.com/archives/<channel>/p<digits>[?thread_ts=...]`.
///
/// # Errors
///
/// Returns `UnrecognizedUrl` for anything that is not a Slack message permalink and
/// `MalformedToken` when the message token itself is bad.
pub fn parse_permalink(raw: &str) -> Result<Permalink, SlackError> {
    let unrecognized = || SlackError::UnrecognizedUrl(raw.to_string());
    let url = Url::parse(raw.trim()).map_err(|_| unrecognized())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(unrecognized());
    }

    let host = url.host_str().ok_or_else(unrecognized)?.to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if !host.ends_with(".slack.com") || labels.len() < 3 {
        return Err(unrecognized());
    }
    let workspace = labels[0].to_string();

    let re = ARCHIVES_PATH_RE.as_ref().ok_or_else(unrecognized)?;
    let caps = re.captures(url.path()).ok_or_else(unrecognized)?;
    let channel_id = caps[1].to_string();
    let message_ts = token_to_ts(&caps[2])?;

    let thread_ts = url
        .query_pairs()
        .find(|(k, _)| k == "thread_ts")
        .map(|(_, v)| {
            v.parse::<Ts>()
                .map_err(|_| SlackError::MalformedToken(v.to_string()))
        })
        .transpose()?;

    Ok(Permalink {
        workspace,
        channel_id,
        message_ts,
        thread_ts,
    })
}
