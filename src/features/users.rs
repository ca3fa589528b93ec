use crate::core::context::SlackContext;
use crate::core::models::UserInfo;
use crate::errors::SlackError;

/// `LookupUser`: exactly one user for `@username`, `@email` or a raw id.
///
/// # Errors
///
/// `AmbiguousOrUnknownRecipient` unless exactly one user matches.
pub async fn lookup_user(ctx: &SlackContext, query: &str) -> Result<UserInfo, SlackError> {
    let mut matches = ctx.identities.find_users(query).await?;
    if matches.len() == 1
        && let Some(user) = matches.pop()
    {
        return Ok(user);
    }
    Err(SlackError::AmbiguousOrUnknownRecipient {
        query: query.to_string(),
        matches: matches
            .iter()
            .map(|u| format!("@{} ({})", u.label(), u.id))
            .collect(),
    })
}

#[derive(Debug, Clone, Default)]
pub struct ListUsersRequest {
    pub refresh: bool,
    pub include_bots: bool,
    pub include_deleted: bool,
}

fn sort_by_handle(users: &mut [UserInfo]) {
    users.sort_by_cached_key(|u| (u.label().to_lowercase(), u.id.clone()));
}

/// `ListUsers`: the workspace directory, humans and active accounts by default.
///
/// # Errors
///
/// Transport errors while loading the directory.
pub async fn list_users(ctx: &SlackContext, request: &ListUsersRequest) -> Result<Vec<UserInfo>, SlackError> {
    let directory = if request.refresh {
        ctx.identities.reload_user_directory().await?
    } else {
        ctx.identities.user_directory().await?
    };
    let mut users: Vec<UserInfo> = directory
        .iter()
        .filter(|u| request.include_bots || !u.is_bot)
        .filter(|u| request.include_deleted || !u.deleted)
        .cloned()
        .collect();
    sort_by_handle(&mut users);
    Ok(users)
}

/// `SearchUsers`: case-insensitive substring match on username, display name,
/// real name and email, against the cached directory.
///
/// # Errors
///
/// Transport errors while loading the directory.
pub async fn search_users(ctx: &SlackContext, query: &str) -> Result<Vec<UserInfo>, SlackError> {
    let needle = query.trim().trim_start_matches('@').to_lowercase();
    let directory = ctx.identities.user_directory().await?;
    let hit = |value: Option<&String>| value.is_some_and(|v| v.to_lowercase().contains(&needle));
    let mut users: Vec<UserInfo> = directory
        .iter()
        .filter(|u| {
            hit(u.name.as_ref())
                || hit(u.profile.display_name.as_ref())
                || hit(u.real_name.as_ref())
                || hit(u.profile.real_name.as_ref())
                || hit(u.profile.email.as_ref())
        })
        .cloned()
        .collect();
    sort_by_handle(&mut users);
    Ok(users)
}
