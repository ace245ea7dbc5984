use crate::{
    backend::Local,
    config::ChatConfig,
    models::{ModelCatalog, ProviderKind},
};

const OPENAI_MODELS: &[&str] = &["gpt-4", "gpt-4-turbo", "gpt-3.5-turbo"];
const ANTHROPIC_MODELS: &[&str] = &["claude-3-opus", "claude-3-sonnet", "claude-3-haiku"];
const GOOGLE_MODELS: &[&str] = &["gemini-pro", "gemini-pro-vision"];

/// Known models per provider. The local list is whatever the configured
/// local endpoint reports, empty when it cannot be reached.
pub async fn available_models(config: &ChatConfig) -> ModelCatalog {
    let mut catalog = ModelCatalog::new();
    for (kind, models) in [
        (ProviderKind::OpenAI, OPENAI_MODELS),
        (ProviderKind::Anthropic, ANTHROPIC_MODELS),
        (ProviderKind::Google, GOOGLE_MODELS),
    ] {
        catalog.insert(kind, models.iter().map(|m| m.to_string()).collect());
    }

    let local = match Local::from(config).list_models().await {
        Ok(models) => models,
        Err(err) => {
            log::debug!("Local models unavailable: {}", err);
            vec![]
        }
    };
    catalog.insert(ProviderKind::Local, local);
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_available_models() {
        let mut server = mockito::Server::new_async().await;
        let _tags = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"qwen2:7b"},{"name":"llama3:latest"}]}"#)
            .create_async()
            .await;

        let config = ChatConfig::default().with_endpoint(&server.url());
        let catalog = available_models(&config).await;

        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog[&ProviderKind::OpenAI][2], "gpt-3.5-turbo");
        assert_eq!(catalog[&ProviderKind::Anthropic].len(), 3);
        assert_eq!(catalog[&ProviderKind::Google][0], "gemini-pro");
        assert_eq!(
            catalog[&ProviderKind::Local],
            vec!["llama3:latest".to_string(), "qwen2:7b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_available_models_local_unreachable() {
        let config = ChatConfig::default().with_endpoint("http://127.0.0.1:1");
        let catalog = available_models(&config).await;
        assert!(catalog[&ProviderKind::Local].is_empty());
        assert_eq!(catalog[&ProviderKind::OpenAI].len(), 3);
    }
}
