pub mod anthropic;
pub mod catalog;
pub mod gemini;
pub mod local;
pub mod openai;
pub mod selector;
pub mod unavailable;
pub(crate) mod utils;

pub use anthropic::Anthropic;
pub use gemini::Gemini;
pub use local::Local;
pub use openai::OpenAI;
pub use selector::{Selection, select};
pub use unavailable::Unavailable;

#[cfg(test)]
use mockall::automock;

use std::{pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::Stream;

use crate::{
    config::ChatConfig,
    context::Prompt,
    error::{ProviderError, Result},
    models::ProviderKind,
};

/// Lazy, finite fragment sequence. The sequence ends when the provider
/// signals end-of-stream; an `Err` item is always the last one.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Backend {
    fn kind(&self) -> ProviderKind;
    fn model(&self) -> &str;

    /// One-time preparation before the first call. Safe to call repeatedly
    /// and concurrently.
    async fn initialize(&self) -> Result<()>;

    async fn complete(&self, prompt: &Prompt) -> Result<String>;
    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream>;
}

pub type ArcBackend = Arc<dyn Backend + Send + Sync>;

pub fn new_backend(selection: &Selection, config: &ChatConfig) -> ArcBackend {
    let model = selection.model();
    match selection.kind() {
        ProviderKind::OpenAI => Arc::new(OpenAI::from(config).with_model(model)),
        ProviderKind::Anthropic => Arc::new(Anthropic::from(config).with_model(model)),
        ProviderKind::Google => Arc::new(Gemini::from(config).with_model(model)),
        ProviderKind::Local => Arc::new(Local::from(config).with_model(model)),
        ProviderKind::None => Arc::new(Unavailable),
    }
}
