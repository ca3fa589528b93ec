//! Resolve `--since` / `--until` expressions and narrow message lists to the window.
//!
//! Accepted expressions: `today`, `yesterday`, `now`, `N{m,h,d,w}` (minutes, hours,
//! days, weeks before now), `YYYY-MM-DD` (local midnight) and
//! `YYYY-MM-DD[T ]HH:MM[:SS]` (local), or a full RFC 3339 instant.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::core::models::{Message, Ts};
use crate::errors::SlackError;

static RELATIVE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)([mhdw])$").ok());

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

fn invalid(expr: &str) -> SlackError {
    SlackError::InvalidTimeExpression(expr.to_string())
}

fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz, expr: &str) -> Result<DateTime<Tz>, SlackError> {
    let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| invalid(expr))?;
    local_instant(naive, tz, expr)
}

fn local_instant<Tz: TimeZone>(
    naive: NaiveDateTime,
    tz: &Tz,
    expr: &str,
) -> Result<DateTime<Tz>, SlackError> {
    // DST gaps have no local instant; ambiguous times take the earlier one.
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| invalid(expr))
}

/// Resolve one expression to an absolute instant in `now`'s zone.
///
/// # Errors
///
/// Returns `InvalidTimeExpression` when the expression matches none of the accepted forms.
pub fn parse_instant<Tz: TimeZone>(expr: &str, now: &DateTime<Tz>) -> Result<DateTime<Tz>, SlackError> {
    let trimmed = expr.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let tz = now.timezone();

    match lowered.as_str() {
        "now" => return Ok(now.clone()),
        "today" => return local_midnight(now.date_naive(), &tz, expr),
        "yesterday" => {
            let date = now.date_naive().pred_opt().ok_or_else(|| invalid(expr))?;
            return local_midnight(date, &tz, expr);
        }
        _ => {}
    }

    if let Some(caps) = RELATIVE_RE.as_ref().and_then(|re| re.captures(&lowered)) {
        let amount: i64 = caps[1].parse().map_err(|_| invalid(expr))?;
        let offset = match &caps[2] {
            "m" => Duration::try_minutes(amount),
            "h" => Duration::try_hours(amount),
            "d" => Duration::try_days(amount),
            _ => Duration::try_weeks(amount),
        }
        .ok_or_else(|| invalid(expr))?;
        return now.clone().checked_sub_signed(offset).ok_or_else(|| invalid(expr));
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return local_midnight(date, &tz, expr);
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return local_instant(naive, &tz, expr);
        }
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(instant.with_timezone(&tz));
    }

    Err(invalid(expr))
}

/// A resolved `[since, until)` window. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: Option<Ts>,
    pub until: Option<Ts>,
}

impl TimeWindow {
    /// Resolve both expressions against the same `now`.
    ///
    /// # Errors
    ///
    /// `InvalidTimeExpression` for unparseable input, `InvalidRange` if since is after until.
    pub fn resolve<Tz: TimeZone>(
        since: Option<&str>,
        until: Option<&str>,
        now: &DateTime<Tz>,
    ) -> Result<Self, SlackError> {
        let since_at = since.map(|e| parse_instant(e, now)).transpose()?;
        let until_at = until.map(|e| parse_instant(e, now)).transpose()?;

        if let (Some(s), Some(u)) = (&since_at, &until_at)
            && s > u
        {
            return Err(SlackError::InvalidRange {
                since: s.with_timezone(&Utc).to_rfc3339(),
                until: u.with_timezone(&Utc).to_rfc3339(),
            });
        }

        Ok(Self {
            since: since_at.as_ref().map(Ts::from_datetime),
            until: until_at.as_ref().map(Ts::from_datetime),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!((self.since, self.until), (Some(s), Some(u)) if s >= u)
    }

    /// Inclusive of `since`, exclusive of `until`.
    #[must_use]
    pub fn contains(&self, ts: &Ts) -> bool {
        self.since.is_none_or(|s| *ts >= s) && self.until.is_none_or(|u| *ts < u)
    }

    /// Keep the messages inside the window, preserving order.
    #[must_use]
    pub fn filter(&self, messages: Vec<Message>) -> Vec<Message> {
        messages.into_iter().filter(|m| self.contains(&m.ts)).collect()
    }
}

/// The zone relative expressions are resolved in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Zone {
    #[default]
    System,
    Named(chrono_tz::Tz),
}

impl Zone {
    /// Resolve a window at the instant `now`, expressed in this zone.
    ///
    /// # Errors
    ///
    /// See [`TimeWindow::resolve`].
    pub fn window(
        &self,
        since: Option<&str>,
        until: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TimeWindow, SlackError> {
        match self {
            Self::System => TimeWindow::resolve(since, until, &now.with_timezone(&Local)),
            Self::Named(tz) => TimeWindow::resolve(since, until, &now.with_timezone(tz)),
        }
    }

    /// Format an instant in this zone.
    #[must_use]
    pub fn format(&self, instant: DateTime<Utc>, fmt: &str) -> String {
        match self {
            Self::System => instant.with_timezone(&Local).format(fmt).to_string(),
            Self::Named(tz) => instant.with_timezone(tz).format(fmt).to_string(),
        }
    }
}
