use async_trait::async_trait;

use crate::{
    backend::{Backend, FragmentStream},
    context::Prompt,
    error::{Error, Result},
    models::ProviderKind,
};

/// Stand-in used when nothing is configured. Never touches the network.
pub struct Unavailable;

#[async_trait]
impl Backend for Unavailable {
    fn kind(&self) -> ProviderKind {
        ProviderKind::None
    }

    fn model(&self) -> &str {
        ""
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn complete(&self, _prompt: &Prompt) -> Result<String> {
        Err(Error::NotConfigured)
    }

    async fn stream(&self, _prompt: &Prompt) -> Result<FragmentStream> {
        Err(Error::NotConfigured)
    }
}
