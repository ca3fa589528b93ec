use crate::core::models::{Conversation, ConversationKind};

/// Which conversations `conversations list` shows.
///
/// The type flags are OR-combined (none set means all types). The membership
/// flags are AND-combined with the type selection; direct conversations always
/// count as joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    pub dms: bool,
    pub private: bool,
    pub public: bool,
    pub member: bool,
    pub non_member: bool,
    pub exclude_archived: bool,
}

impl ConversationFilter {
    #[must_use]
    pub fn matches(&self, conversation: &Conversation) -> bool {
        let any_type = self.dms || self.private || self.public;
        let type_ok = !any_type
            || match conversation.kind {
                ConversationKind::Im | ConversationKind::Mpim => self.dms,
                ConversationKind::PrivateChannel => self.private,
                ConversationKind::PublicChannel => self.public,
            };

        let joined = conversation.kind.is_direct() || conversation.is_member;
        let member_ok = (!self.member || joined) && (!self.non_member || !joined);
        let archive_ok = !(self.exclude_archived && conversation.is_archived);

        type_ok && member_ok && archive_ok
    }
}

/// Filters a conversation list, keeping the directory's order.
#[must_use]
pub fn filter_conversations(
    conversations: &[Conversation],
    filter: &ConversationFilter,
) -> Vec<Conversation> {
    conversations
        .iter()
        .filter(|c| filter.matches(c))
        .cloned()
        .collect()
}
