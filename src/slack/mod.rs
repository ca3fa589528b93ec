//! Slack Web API access: the wire client, retry transport and cursor pagination.

pub mod api;
pub mod client;
pub mod paginator;
pub mod transport;

pub use api::{ApiRequest, RawResponse, SendFailure, SendFailureKind, SlackApi};
pub use client::SlackClient;
pub use paginator::CursorPaginator;
pub use transport::{RetryPolicy, Transport};
