pub mod conversation;
pub mod export;
pub mod message;
pub mod provider;

pub use conversation::{Conversation, default_title};
pub use export::{ConversationExport, ExportFormat, ExportedMessage};
pub use message::{Message, Role};
pub use provider::*;
