use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::errors::SlackError;
use crate::slack::api::ApiRequest;
use crate::slack::transport::Transport;

/// Slack refuses page sizes above this.
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Pull-based walk over one cursor-paginated Web API query.
///
/// Each [`next_page`](Self::next_page) issues one transport call. The walk ends
/// when Slack returns no cursor, or the item cap is reached; the last page is
/// trimmed to the cap. Page order is preserved as Slack returned it.
pub struct CursorPaginator<'a, T> {
    transport: &'a Transport,
    request: ApiRequest,
    items_key: &'static str,
    cap: Option<usize>,
    cursor: Option<String>,
    yielded: usize,
    pages: usize,
    done: bool,
    _item: PhantomData<fn() -> T>,
}

impl<'a, T: DeserializeOwned> CursorPaginator<'a, T> {
    /// `items_key` names the array in each page (`messages`, `channels`, `members`).
    #[must_use]
    pub fn new(
        transport: &'a Transport,
        request: ApiRequest,
        items_key: &'static str,
        page_size: usize,
        cap: Option<usize>,
    ) -> Self {
        let mut request = request;
        let limit = cap.map_or(page_size, |c| c.min(page_size)).clamp(1, MAX_PAGE_SIZE);
        request.set("limit", limit);
        Self {
            transport,
            request,
            items_key,
            cap,
            cursor: None,
            yielded: 0,
            pages: 0,
            done: cap == Some(0),
            _item: PhantomData,
        }
    }

    /// Fetch the next page, or `None` once the walk is over.
    ///
    /// # Errors
    ///
    /// Propagates transport errors and `ParseError` for pages of unexpected shape.
    pub async fn next_page(&mut self) -> Result<Option<Vec<T>>, SlackError> {
        if self.done {
            return Ok(None);
        }

        let mut request = self.request.clone();
        if let Some(cursor) = &self.cursor {
            request.set("cursor", cursor);
        }
        let body = self.transport.call(&request).await?;
        self.pages += 1;

        let (mut items, next_cursor) = parse_page::<T>(&body, self.items_key)?;
        if let Some(cap) = self.cap {
            let remaining = cap.saturating_sub(self.yielded);
            items.truncate(remaining);
        }
        self.yielded += items.len();

        let has_more = body.get("has_more").and_then(Value::as_bool);
        let cap_reached = self.cap.is_some_and(|c| self.yielded >= c);
        self.cursor = next_cursor;
        self.done = cap_reached || self.cursor.is_none() || has_more == Some(false);

        debug!(
            method = %self.request.method,
            page = self.pages,
            items = items.len(),
            done = self.done,
            "Fetched page"
        );
        Ok(Some(items))
    }

    /// Drain every remaining page into one ordered list.
    ///
    /// # Errors
    ///
    /// See [`next_page`](Self::next_page).
    pub async fn collect_all(mut self) -> Result<Vec<T>, SlackError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }
}

/// Split a page body into its items and the non-empty continuation cursor.
///
/// # Errors
///
/// `ParseError` when the items array is missing or an item does not deserialize.
pub fn parse_page<T: DeserializeOwned>(
    body: &Value,
    items_key: &str,
) -> Result<(Vec<T>, Option<String>), SlackError> {
    let raw_items = body
        .get(items_key)
        .cloned()
        .ok_or_else(|| SlackError::ParseError(format!("response has no '{items_key}' array")))?;
    let items: Vec<T> = serde_json::from_value(raw_items)
        .map_err(|e| SlackError::ParseError(format!("{items_key}: {e}")))?;
    let cursor = body
        .pointer("/response_metadata/next_cursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    Ok((items, cursor))
}
