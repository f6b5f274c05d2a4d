pub mod conversation;
pub mod unread;

pub use conversation::{Conversation, Merge, Presentation};
pub use unread::UnreadTracker;
