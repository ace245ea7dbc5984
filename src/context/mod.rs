pub mod builder;

pub use builder::{ChatMessage, ChatRole, ContextBuilder, Prompt, Reference};
