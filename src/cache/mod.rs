pub mod directory;
pub mod identity;
pub mod store;

pub use directory::ConversationDirectory;
pub use identity::IdentityCache;
pub use store::{CacheEnvelope, CacheStore, Clock, ManualClock, SystemClock};
