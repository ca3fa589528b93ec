use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::errors::SlackError;

/// A Slack message timestamp (`seconds.microseconds`).
///
/// This is both the primary key and the sort key of a message inside one
/// conversation, so it is compared numerically rather than as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ts {
    secs: u64,
    micros: u32,
}

impl Ts {
    #[must_use]
    pub fn new(secs: u64, micros: u32) -> Self {
        Self {
            secs: secs + u64::from(micros / 1_000_000),
            micros: micros % 1_000_000,
        }
    }

    #[must_use]
    pub fn secs(&self) -> u64 {
        self.secs
    }

    #[must_use]
    pub fn micros(&self) -> u32 {
        self.micros
    }

    /// The instant one microsecond earlier, saturating at zero.
    #[must_use]
    pub fn pred(&self) -> Self {
        match (self.secs, self.micros) {
            (0, 0) => *self,
            (s, 0) => Self::new(s - 1, 999_999),
            (s, m) => Self::new(s, m - 1),
        }
    }

    /// Convert an instant into a timestamp. Instants before the epoch clamp to zero.
    #[must_use]
    pub fn from_datetime<Tz: TimeZone>(instant: &DateTime<Tz>) -> Self {
        let secs = instant.timestamp();
        if secs < 0 {
            return Self::new(0, 0);
        }
        Self::new(secs.unsigned_abs(), instant.timestamp_subsec_micros())
    }

    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.secs).ok()?;
        DateTime::from_timestamp(secs, self.micros * 1_000)
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

impl FromStr for Ts {
    type Err = SlackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SlackError::ParseError(format!("invalid message timestamp '{s}'"));
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty()
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || frac.len() > 6
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let secs = whole.parse::<u64>().map_err(|_| invalid())?;
        let micros = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<6}").parse::<u32>().map_err(|_| invalid())?
        };
        Ok(Self::new(secs, micros))
    }
}

impl Serialize for Ts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a message sits relative to threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadRole {
    Parent,
    Reply,
    Standalone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub name: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub url_private_download: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
}

/// A Block Kit text object (`plain_text` or `mrkdwn`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextObject {
    #[serde(default)]
    pub text: String,
}

/// Inline element of a rich text section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RichTextElement {
    Text {
        #[serde(default)]
        text: String,
    },
    User {
        #[serde(default)]
        user_id: String,
    },
    Channel {
        #[serde(default)]
        channel_id: String,
    },
    Link {
        #[serde(default)]
        url: String,
        #[serde(default)]
        text: Option<String>,
    },
    Emoji {
        #[serde(default)]
        name: String,
    },
    Broadcast {
        #[serde(default)]
        range: String,
    },
    Usergroup {
        #[serde(default)]
        usergroup_id: String,
    },
    #[serde(other)]
    Unsupported,
}

/// Top-level element of a `rich_text` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RichTextBlockElement {
    RichTextSection {
        #[serde(default)]
        elements: Vec<RichTextElement>,
    },
    RichTextList {
        #[serde(default)]
        style: Option<String>,
        #[serde(default)]
        indent: u32,
        #[serde(default)]
        elements: Vec<RichTextBlockElement>,
    },
    RichTextQuote {
        #[serde(default)]
        elements: Vec<RichTextElement>,
    },
    RichTextPreformatted {
        #[serde(default)]
        elements: Vec<RichTextElement>,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextElement {
    PlainText {
        #[serde(default)]
        text: String,
    },
    Mrkdwn {
        #[serde(default)]
        text: String,
    },
    Image {
        #[serde(default)]
        alt_text: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

/// The Block Kit blocks that carry readable text. Interactive blocks are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    RichText {
        #[serde(default)]
        elements: Vec<RichTextBlockElement>,
    },
    Section {
        #[serde(default)]
        text: Option<TextObject>,
        #[serde(default)]
        fields: Vec<TextObject>,
    },
    Header {
        #[serde(default)]
        text: Option<TextObject>,
    },
    Context {
        #[serde(default)]
        elements: Vec<ContextElement>,
    },
    Image {
        #[serde(default)]
        alt_text: Option<String>,
        #[serde(default)]
        title: Option<TextObject>,
    },
    Divider,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentField {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub value: String,
}

/// A legacy message attachment, as posted by bots and link unfurls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttachment {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_link: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub pretext: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub fields: Vec<AttachmentField>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub from_url: Option<String>,
}

/// Deserialize a list, skipping entries whose shape we do not recognise, so one odd
/// block never fails a whole history page.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

/// A message as returned by `conversations.history` / `conversations.replies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub ts: Ts,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub thread_ts: Option<Ts>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub blocks: Vec<Block>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub attachments: Vec<MessageAttachment>,
}

impl Message {
    #[must_use]
    pub fn thread_role(&self) -> ThreadRole {
        match self.thread_ts {
            Some(parent) if parent == self.ts => ThreadRole::Parent,
            Some(_) => ThreadRole::Reply,
            None => ThreadRole::Standalone,
        }
    }

    /// Identifier of whoever posted the message: the user, else the bot.
    #[must_use]
    pub fn author_id(&self) -> Option<&str> {
        self.user.as_deref().or(self.bot_id.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    PublicChannel,
    PrivateChannel,
    Im,
    Mpim,
}

impl ConversationKind {
    #[must_use]
    pub fn is_direct(self) -> bool {
        matches!(self, Self::Im | Self::Mpim)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Absent for direct conversations; their label comes from the counterpart identity.
    pub name: Option<String>,
    pub kind: ConversationKind,
    pub is_member: bool,
    pub is_archived: bool,
    /// Counterpart of a 1:1 direct conversation.
    #[serde(default)]
    pub user: Option<String>,
    /// Members of a group direct conversation.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub num_members: Option<u32>,
    #[serde(default)]
    pub created: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A workspace member, as returned by `users.info` and `users.list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub profile: UserProfile,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub tz: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

impl UserInfo {
    /// Handle used in mentions: username, then display name, then real name, then id.
    #[must_use]
    pub fn label(&self) -> &str {
        non_empty(self.name.as_ref())
            .or_else(|| non_empty(self.profile.display_name.as_ref()))
            .or_else(|| non_empty(self.real_name.as_ref()))
            .unwrap_or(&self.id)
    }

    /// Name a human would recognise: display name, then real name, then username.
    #[must_use]
    pub fn display_name(&self) -> &str {
        non_empty(self.profile.display_name.as_ref())
            .or_else(|| non_empty(self.real_name.as_ref()))
            .or_else(|| non_empty(self.profile.real_name.as_ref()))
            .unwrap_or_else(|| self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    User,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub kind: IdentityKind,
    pub id: String,
}

impl IdentityKey {
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::User,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::Channel,
            id: id.into(),
        }
    }
}

/// A resolved identifier and when it was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub kind: IdentityKind,
    pub label: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionMode {
    Off,
    #[default]
    Counts,
    Names,
}

impl FromStr for ReactionMode {
    type Err = SlackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "counts" => Ok(Self::Counts),
            "names" => Ok(Self::Names),
            other => Err(SlackError::ConfigError(format!(
                "unknown reaction mode '{other}' (expected off, counts or names)"
            ))),
        }
    }
}
