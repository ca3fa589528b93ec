/// slackcli - read Slack conversations from the terminal.
///
/// This crate is the retrieval and consistency engine behind the `slackcli` binary.
/// It turns Slack's rate-limited, cursor-paginated Web API into a coherent local
/// view of conversations, messages, threads and users.
///
/// # Architecture
///
/// The system uses:
/// - `slack::transport` for rate-limit-aware retry around every Web API call
/// - `slack::paginator` to walk cursor-paginated methods as one sequence
/// - `cache` for TTL-bounded conversation and identity caches on disk
/// - `utils` for the permalink codec, time windows, mention and Block Kit rendering
/// - `features` for the command-level operations
/// - Tokio for async runtime
///
/// # Example
///
/// ```no_run
/// use slackcli::core::config::AppConfig;
/// use slackcli::core::context::SlackContext;
/// use slackcli::features::collect::{ListMessagesRequest, list_messages};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     slackcli::setup_logging(false, false);
///
///     let config = AppConfig::load(None)?;
///     let org = config.select_org(None, std::env::var("SLACK_TOKEN").ok())?;
///     let ctx = SlackContext::connect(&config, &org, CancellationToken::new())?;
///
///     let mut request = ListMessagesRequest::new("#general");
///     request.since = Some("7d".into());
///     request.with_threads = true;
///
///     let listing = list_messages(&ctx, &request).await?;
///     for message in listing.messages {
///         println!("{} {}: {}", message.ts, message.author, message.text);
///     }
///     Ok(())
/// }
/// ```
pub mod cache;
pub mod core;
pub mod errors;
pub mod features;
pub mod slack;
pub mod utils;

/// Configure structured logging on stderr.
///
/// The level comes from `RUST_LOG` when set, else `warn` (or `debug` with
/// `verbose`). `json` switches to one JSON object per line. Safe to call more
/// than once; later calls are ignored.
///
/// # Example
///
/// ```
/// slackcli::setup_logging(false, false);
/// ```
pub fn setup_logging(verbose: bool, json: bool) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let default_level = if verbose || cfg!(feature = "debug-logs") {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    // Already initialised (tests, embedding): keep the existing subscriber.
    let _ = result;
}
