use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use slackcli::core::config::{AppConfig, TOKEN_ENV};
use slackcli::core::context::SlackContext;
use slackcli::core::models::{ReactionMode, UserInfo};
use slackcli::errors::SlackError;
use slackcli::features::collect::{DEFAULT_LIMIT, ListMessagesRequest, MessageListing, list_messages};
use slackcli::features::conversations::{ConversationSummary, list_conversations};
use slackcli::features::pins::{PinListing, list_pins};
use slackcli::features::resolve::{ResolvedMessage, resolve_permalink};
use slackcli::features::unread::{UnreadCount, UnreadReport, list_unread};
use slackcli::features::users::{ListUsersRequest, list_users, lookup_user, search_users};
use slackcli::utils::filters::ConversationFilter;
use slackcli::utils::links::parse_permalink;
use slackcli::utils::time_window::Zone;

#[derive(Parser)]
#[command(name = "slackcli")]
#[command(version)]
#[command(about = "Read Slack conversations from the terminal", long_about = None)]
struct Cli {
    /// Org from the config file to use
    #[arg(long, global = true)]
    org: Option<String>,

    /// Config file (default: <config dir>/slackcli/config.toml)
    #[arg(long, global = true, env = "SLACKCLI_CONFIG")]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Give up after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show messages from a conversation
    Messages(MessagesArgs),
    /// Work with the conversation directory
    #[command(subcommand)]
    Conversations(ConversationsCommand),
    /// Fetch the message a permalink points at
    Resolve {
        url: String,
    },
    /// List joined conversations with unread messages
    Unread,
    /// Look up workspace members
    #[command(subcommand)]
    Users(UsersCommand),
    /// Pinned messages
    #[command(subcommand)]
    Pins(PinsCommand),
}

#[derive(Args)]
struct MessagesArgs {
    /// Conversation id, #channel, @user or @email
    conversation: String,
    /// Show a single thread by timestamp or permalink token
    #[arg(long)]
    thread: Option<String>,
    /// Start of the window (today, yesterday, 7d, 2026-01-31, ...)
    #[arg(long)]
    since: Option<String>,
    /// End of the window, exclusive
    #[arg(long)]
    until: Option<String>,
    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    limit: usize,
    /// Include thread replies under their parents
    #[arg(long)]
    threads: bool,
    /// off, counts or names
    #[arg(long, default_value = "counts")]
    reactions: ReactionMode,
}

#[derive(Subcommand)]
enum ConversationsCommand {
    /// List conversations
    List(ListArgs),
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    dms: bool,
    #[arg(long)]
    private: bool,
    #[arg(long)]
    public: bool,
    /// Only conversations you have joined
    #[arg(long)]
    member: bool,
    /// Only conversations you have not joined
    #[arg(long)]
    non_member: bool,
    #[arg(long)]
    exclude_archived: bool,
    /// Ignore the cached directory
    #[arg(long)]
    refresh: bool,
}

#[derive(Subcommand)]
enum UsersCommand {
    /// Find one user by @username, email or id
    Lookup { query: String },
    /// List workspace members
    List {
        /// Include bot users
        #[arg(long)]
        bots: bool,
        /// Include deactivated accounts
        #[arg(long)]
        deleted: bool,
        /// Ignore the cached user directory
        #[arg(long)]
        refresh: bool,
    },
    /// Users whose name, display name or email contains the query
    Search { query: String },
}

#[derive(Subcommand)]
enum PinsCommand {
    /// List pinned messages in a conversation
    List { conversation: String },
}

fn spawn_cancellation(timeout: Option<u64>) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => debug!("Interrupted"),
            () = deadline => debug!("Command timed out"),
        }
        trigger.cancel();
    });
    cancel
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_listing(listing: &MessageListing, zone: &Zone) {
    println!("{} ({})", listing.conversation, listing.conversation_id);
    for message in &listing.messages {
        let indent = "    ".repeat(usize::from(message.depth));
        let time = message
            .time
            .map_or_else(|| message.ts.to_string(), |t| zone.format(t, "%Y-%m-%d %H:%M"));
        let replies = if message.reply_count > 0 && message.depth == 0 {
            format!(" [{} replies]", message.reply_count)
        } else {
            String::new()
        };
        println!("{indent}[{time}] {}: {}{replies}", message.author, message.text);
        for reaction in &message.reactions {
            if reaction.users.is_empty() {
                println!("{indent}    :{}: {}", reaction.name, reaction.count);
            } else {
                println!(
                    "{indent}    :{}: {} ({})",
                    reaction.name,
                    reaction.count,
                    reaction.users.join(", ")
                );
            }
        }
        for file in &message.files {
            let name = file.name.as_deref().or(file.title.as_deref()).unwrap_or(&file.id);
            println!("{indent}    [file] {name}");
        }
    }
    for warning in &listing.warnings {
        eprintln!("warning: {warning}");
    }
}

fn print_conversations(conversations: &[ConversationSummary]) {
    for c in conversations {
        let mut flags = Vec::new();
        if !c.is_member {
            flags.push("not joined");
        }
        if c.is_archived {
            flags.push("archived");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" ({})", flags.join(", "))
        };
        println!("{:<12} {}{flags}", c.id, c.label);
    }
}

fn print_unread(report: &UnreadReport) {
    for entry in &report.conversations {
        let count = match entry.unread {
            UnreadCount::Exact(n) => n.to_string(),
            UnreadCount::AtLeast(n) => format!("{n}+"),
            UnreadCount::Inconsistent => "?".to_string(),
        };
        println!("{count:>5}  {}", entry.label);
    }
    if report
        .conversations
        .iter()
        .any(|e| e.unread == UnreadCount::Inconsistent)
    {
        eprintln!("note: Slack does not report group DM unread state reliably; '?' marks those.");
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
}

fn user_line(user: &UserInfo) -> String {
    let mut line = format!("{:<12} @{}", user.id, user.label());
    let display = user.display_name();
    if display != user.label() {
        line.push_str(&format!(" ({display})"));
    }
    if let Some(email) = &user.profile.email {
        line.push_str(&format!(" <{email}>"));
    }
    let mut flags = Vec::new();
    if user.is_bot {
        flags.push("bot");
    }
    if user.is_admin {
        flags.push("admin");
    }
    if user.deleted {
        flags.push("deleted");
    }
    if !flags.is_empty() {
        line.push_str(&format!(" [{}]", flags.join(", ")));
    }
    line
}

fn print_users(users: &[UserInfo]) {
    for user in users {
        println!("{}", user_line(user));
    }
    eprintln!("{} users", users.len());
}

fn print_pins(listing: &PinListing, zone: &Zone) {
    println!("{} ({})", listing.conversation, listing.conversation_id);
    if listing.pins.is_empty() {
        eprintln!("No pinned messages.");
    }
    for pin in &listing.pins {
        let message = &pin.message;
        let time = message
            .time
            .map_or_else(|| message.ts.to_string(), |t| zone.format(t, "%Y-%m-%d %H:%M"));
        println!("[{time}] {}: {}", message.author, message.text);
        if let Some(by) = &pin.pinned_by {
            println!("    pinned by {by}");
        }
    }
}

fn print_resolved(resolved: &ResolvedMessage, zone: &Zone) {
    let message = &resolved.message;
    let time = message
        .time
        .map_or_else(|| message.ts.to_string(), |t| zone.format(t, "%Y-%m-%d %H:%M:%S"));
    println!("{} ({})", resolved.conversation, resolved.permalink.channel_id);
    println!("[{time}] {}: {}", message.author, message.text);
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // A permalink names its workspace; use it when it matches a configured org.
    let requested_org = cli.org.clone().or_else(|| match &cli.command {
        Commands::Resolve { url } => parse_permalink(url)
            .ok()
            .map(|link| link.workspace)
            .filter(|ws| config.has_org(ws)),
        _ => None,
    });
    let org = config.select_org(requested_org.as_deref(), std::env::var(TOKEN_ENV).ok())?;
    let cancel = spawn_cancellation(cli.timeout);
    let ctx = SlackContext::connect(&config, &org, cancel)?;
    debug!(org = %ctx.org, "Context ready");

    match cli.command {
        Commands::Messages(args) => {
            let request = ListMessagesRequest {
                conversation: args.conversation,
                thread: args.thread,
                since: args.since,
                until: args.until,
                limit: args.limit,
                with_threads: args.threads,
                reactions: args.reactions,
            };
            let listing = list_messages(&ctx, &request).await?;
            if cli.json {
                print_json(&listing)?;
            } else {
                print_listing(&listing, &ctx.zone);
            }
        }
        Commands::Conversations(ConversationsCommand::List(args)) => {
            let filter = ConversationFilter {
                dms: args.dms,
                private: args.private,
                public: args.public,
                member: args.member,
                non_member: args.non_member,
                exclude_archived: args.exclude_archived,
            };
            let conversations = list_conversations(&ctx, &filter, args.refresh).await?;
            if cli.json {
                print_json(&conversations)?;
            } else {
                print_conversations(&conversations);
            }
        }
        Commands::Resolve { url } => {
            let resolved = resolve_permalink(&ctx, &url).await?;
            if cli.json {
                print_json(&resolved)?;
            } else {
                print_resolved(&resolved, &ctx.zone);
            }
        }
        Commands::Unread => {
            let report = list_unread(&ctx).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_unread(&report);
            }
        }
        Commands::Users(UsersCommand::Lookup { query }) => {
            let user = lookup_user(&ctx, &query).await?;
            if cli.json {
                print_json(&user)?;
            } else {
                println!("{}", user_line(&user));
            }
        }
        Commands::Users(UsersCommand::List {
            bots,
            deleted,
            refresh,
        }) => {
            let request = ListUsersRequest {
                refresh,
                include_bots: bots,
                include_deleted: deleted,
            };
            let users = list_users(&ctx, &request).await?;
            if cli.json {
                print_json(&users)?;
            } else {
                print_users(&users);
            }
        }
        Commands::Users(UsersCommand::Search { query }) => {
            let users = search_users(&ctx, &query).await?;
            if cli.json {
                print_json(&users)?;
            } else if users.is_empty() {
                eprintln!("No users match '{query}'.");
            } else {
                print_users(&users);
            }
        }
        Commands::Pins(PinsCommand::List { conversation }) => {
            let listing = list_pins(&ctx, &conversation).await?;
            if cli.json {
                print_json(&listing)?;
            } else {
                print_pins(&listing, &ctx.zone);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    slackcli::setup_logging(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            let slack_error = error.downcast_ref::<SlackError>();
            if let Some(hint) = slack_error.and_then(SlackError::hint) {
                eprintln!("hint: {hint}");
            }
            let code = slack_error.map_or(1, SlackError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
