//! Command-level operations built on the caches and transport.

pub mod collect;
pub mod conversations;
pub mod pins;
pub mod resolve;
pub mod threads;
pub mod unread;
pub mod users;
