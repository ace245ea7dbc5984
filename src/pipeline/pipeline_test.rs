use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::*;
use crate::{
    backend::{Backend, FragmentStream, MockBackend},
    error::ProviderErrorKind,
    models::ConversationExport,
    storage::sqlite::Sqlite,
};

fn mock_backend() -> MockBackend {
    let mut backend = MockBackend::new();
    backend.expect_kind().return_const(ProviderKind::OpenAI);
    backend.expect_model().return_const("gpt-4".to_string());
    backend.expect_initialize().returning(|| Ok(()));
    backend
}

fn fragments(items: Vec<Result<String, ProviderError>>) -> FragmentStream {
    Box::pin(futures::stream::iter(items))
}

/// Yields `head` and then never ends.
fn hanging(head: &str) -> FragmentStream {
    let head = futures::stream::iter(vec![Ok(head.to_string())]);
    Box::pin(head.chain(futures::stream::pending()))
}

async fn new_storage() -> ArcStorage {
    Arc::new(Sqlite::new(None).await.unwrap())
}

async fn setup(backend: MockBackend) -> (ResponsePipeline, ArcStorage) {
    setup_with_config(ChatConfig::default(), backend).await
}

async fn setup_with_config(
    config: ChatConfig,
    backend: MockBackend,
) -> (ResponsePipeline, ArcStorage) {
    let storage = new_storage().await;
    let pipeline = ResponsePipeline::with_backend(config, storage.clone(), Arc::new(backend)).await;
    (pipeline, storage)
}

fn complete(reply: TurnReply) -> TurnResponse {
    match reply {
        TurnReply::Complete(res) => res,
        TurnReply::Stream(_) => panic!("expected a synchronous reply"),
    }
}

fn stream(reply: TurnReply) -> TurnStream {
    match reply {
        TurnReply::Stream(stream) => stream,
        TurnReply::Complete(_) => panic!("expected a stream"),
    }
}

#[tokio::test]
async fn test_turn_without_conversation_creates_one() {
    let mut backend = mock_backend();
    backend
        .expect_complete()
        .withf(|prompt| prompt.user() == "Hello" && prompt.history().is_empty())
        .times(1)
        .returning(|_| Ok("Hi there!".to_string()));

    let (pipeline, storage) = setup(backend).await;
    let existing = pipeline.create_conversation(Some("older")).await.unwrap();

    let res = complete(pipeline.send_turn(TurnRequest::new("Hello")).await.unwrap());
    assert!(!res.failed);
    assert_eq!(res.response(), "Hi there!");

    let conversations = storage.list_conversations().await.unwrap();
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0].id(), res.conversation_id);
    assert_eq!(conversations[1].id(), existing.id());
    assert_eq!(conversations[0].provider(), "openai");
    assert_eq!(conversations[0].model(), "gpt-4");

    let history = storage.history(&res.conversation_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role(), Role::User);
    assert_eq!(history[0].content(), "Hello");
    assert_eq!(history[1], res.message);
}

#[tokio::test]
async fn test_turn_uses_history_and_configuration() {
    let mut backend = mock_backend();
    backend
        .expect_complete()
        .withf(|prompt| prompt.history().is_empty())
        .times(1)
        .returning(|_| Ok("first reply".to_string()));
    backend
        .expect_complete()
        .withf(|prompt| {
            prompt.system() == "Be brief."
                && prompt.user() == "second"
                && prompt
                    .history()
                    .iter()
                    .map(|m| m.content())
                    .eq(["first", "first reply"])
        })
        .times(1)
        .returning(|_| Ok("second reply".to_string()));

    let config = ChatConfig::default().with_system_prompt("Be brief.");
    let (pipeline, storage) = setup_with_config(config, backend).await;

    let first = complete(pipeline.send_turn(TurnRequest::new("first")).await.unwrap());
    let other = pipeline.create_conversation(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let second = complete(
        pipeline
            .send_turn(TurnRequest::new("second").with_conversation_id(&first.conversation_id))
            .await
            .unwrap(),
    );
    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(second.response(), "second reply");

    let conversations = storage.list_conversations().await.unwrap();
    assert_eq!(conversations[0].id(), first.conversation_id);
    assert_eq!(conversations[1].id(), other.id());
    assert_eq!(
        conversations[0].updated_at(),
        second.message.timestamp()
    );
}

#[tokio::test]
async fn test_missing_conversation_is_not_found() {
    let mut backend = mock_backend();
    backend.expect_complete().never();

    let (pipeline, storage) = setup(backend).await;
    let err = pipeline
        .send_turn(TurnRequest::new("hello").with_conversation_id("missing"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::NotFound(id) if id == "missing"));
    assert!(storage.list_conversations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let mut backend = mock_backend();
    backend.expect_complete().never();

    let (pipeline, storage) = setup(backend).await;
    let err = pipeline
        .send_turn(TurnRequest::new("   \n"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(storage.list_conversations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_provider_failure_is_persisted() {
    let mut backend = mock_backend();
    backend
        .expect_complete()
        .returning(|_| Err(ProviderError::from_status(429, "quota exceeded").into()));

    let (pipeline, storage) = setup(backend).await;
    let res = complete(pipeline.send_turn(TurnRequest::new("hello")).await.unwrap());
    assert!(res.failed);
    assert_eq!(
        res.response(),
        "Error getting AI response: rate limited (429): quota exceeded"
    );

    let history = storage.history(&res.conversation_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role(), Role::Assistant);
    assert_eq!(history[1].content(), res.response());
}

#[tokio::test]
async fn test_not_configured_is_persisted() {
    let storage = new_storage().await;
    let pipeline = ResponsePipeline::new(ChatConfig::default(), storage.clone()).await;
    assert_eq!(pipeline.provider(), ProviderKind::None);

    let res = complete(pipeline.send_turn(TurnRequest::new("hello")).await.unwrap());
    assert!(res.failed);
    assert_eq!(res.response(), NOT_CONFIGURED_MESSAGE);

    let conversation = storage.get_conversation(&res.conversation_id).await.unwrap();
    assert_eq!(conversation.provider(), "none");
    assert_eq!(storage.history(&res.conversation_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_initialize_failure_downgrades_to_none() {
    let mut backend = MockBackend::new();
    backend.expect_kind().return_const(ProviderKind::Local);
    backend.expect_model().return_const("llama3".to_string());
    backend
        .expect_initialize()
        .times(1)
        .returning(|| Err(ProviderError::unknown("model llama3 is not available").into()));
    backend.expect_complete().never();

    let (pipeline, _storage) = setup(backend).await;
    assert_eq!(pipeline.provider(), ProviderKind::None);
    assert_eq!(pipeline.model(), "");

    let reply = pipeline.chat("hello").await.unwrap();
    assert_eq!(reply, NOT_CONFIGURED_MESSAGE);
}

#[tokio::test]
async fn test_local_prefix_selected_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let _tags = server
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_body(r#"{"models":[{"name":"foo:latest"}]}"#)
        .create_async()
        .await;
    let _generate = server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(r#"{"response":"local reply","done":true}"#)
        .create_async()
        .await;

    let config = ChatConfig::default()
        .with_openai_api_key("sk")
        .with_model_path("/models/bar")
        .with_selected_model("local:foo")
        .with_endpoint(&server.url());
    let pipeline = ResponsePipeline::new(config, new_storage().await).await;
    assert_eq!(pipeline.provider(), ProviderKind::Local);
    assert_eq!(pipeline.model(), "foo");

    assert_eq!(pipeline.chat("hi").await.unwrap(), "local reply");
}

#[tokio::test]
async fn test_stream_turn() {
    let mut backend = mock_backend();
    backend.expect_stream().times(1).returning(|_| {
        Ok(fragments(vec![
            Ok("Hel".to_string()),
            Ok("lo".to_string()),
            Ok("!".to_string()),
        ]))
    });

    let (pipeline, storage) = setup(backend).await;
    let turn = stream(
        pipeline
            .send_turn(TurnRequest::new("hi").with_stream(true))
            .await
            .unwrap(),
    );
    let conversation_id = turn.conversation_id().to_string();

    let events = turn.collect::<Vec<_>>().await;
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], TurnEvent::Fragment("Hel".to_string()));
    assert_eq!(events[2], TurnEvent::Fragment("!".to_string()));
    let TurnEvent::End(message) = &events[3] else {
        panic!("expected end event, got {:?}", events[3]);
    };
    assert_eq!(message.content(), "Hello!");

    let history = storage.history(&conversation_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(&history[1], message);
}

#[tokio::test]
async fn test_stream_error_after_three_fragments() {
    let mut backend = mock_backend();
    backend.expect_stream().returning(|_| {
        Ok(fragments(vec![
            Ok("one ".to_string()),
            Ok("two ".to_string()),
            Ok("three".to_string()),
            Err(ProviderError::unknown("connection reset")),
        ]))
    });

    let (pipeline, storage) = setup(backend).await;
    let turn = stream(
        pipeline
            .send_turn(TurnRequest::new("count").with_stream(true))
            .await
            .unwrap(),
    );
    let conversation_id = turn.conversation_id().to_string();
    let events = turn.collect::<Vec<_>>().await;

    let expected = "one two three\n\n[error: provider error: connection reset]";
    assert_eq!(events.len(), 5);
    assert_eq!(
        events[3],
        TurnEvent::Failed("\n\n[error: provider error: connection reset]".to_string())
    );
    assert!(matches!(&events[4], TurnEvent::End(m) if m.content() == expected));

    let history = storage.history(&conversation_id).await.unwrap();
    let replies = history
        .iter()
        .filter(|m| m.role() == Role::Assistant)
        .collect::<Vec<_>>();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].content(), expected);
}

#[tokio::test]
async fn test_stream_interrupted() {
    let mut backend = mock_backend();
    backend
        .expect_stream()
        .returning(|_| Ok(hanging("partial")));

    let (pipeline, storage) = setup(backend).await;
    let mut turn = stream(
        pipeline
            .send_turn(TurnRequest::new("tell me a story").with_stream(true))
            .await
            .unwrap(),
    );
    let conversation_id = turn.conversation_id().to_string();

    assert_eq!(
        turn.next().await,
        Some(TurnEvent::Fragment("partial".to_string()))
    );
    let message = turn.interrupt().await.unwrap();
    assert_eq!(message.content(), "partial\n\n[interrupted]");

    let history = storage.history(&conversation_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content(), "partial\n\n[interrupted]");
}

#[tokio::test]
async fn test_dropped_stream_is_persisted_as_interrupted() {
    let mut backend = mock_backend();
    backend.expect_stream().returning(|_| Ok(hanging("abc")));

    let (pipeline, storage) = setup(backend).await;
    let mut turn = stream(
        pipeline
            .send_turn(TurnRequest::new("go").with_stream(true))
            .await
            .unwrap(),
    );
    let conversation_id = turn.conversation_id().to_string();
    assert!(matches!(turn.next().await, Some(TurnEvent::Fragment(_))));
    drop(turn);

    let history = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let history = storage.history(&conversation_id).await.unwrap();
            if history.len() == 2 {
                return history;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("interrupted reply should be persisted");
    assert_eq!(history[1].content(), "abc\n\n[interrupted]");
}

#[tokio::test]
async fn test_stream_not_configured() {
    let storage = new_storage().await;
    let pipeline = ResponsePipeline::new(ChatConfig::default(), storage.clone()).await;

    let turn = stream(
        pipeline
            .send_turn(TurnRequest::new("hello").with_stream(true))
            .await
            .unwrap(),
    );
    let conversation_id = turn.conversation_id().to_string();
    let events = turn.collect::<Vec<_>>().await;
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        TurnEvent::Failed(NOT_CONFIGURED_MESSAGE.to_string())
    );
    assert!(matches!(&events[1], TurnEvent::End(m) if m.content() == NOT_CONFIGURED_MESSAGE));
    assert_eq!(storage.history(&conversation_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_turns_keep_stable_order() {
    let mut backend = mock_backend();
    backend
        .expect_complete()
        .times(10)
        .returning(|prompt| Ok(format!("echo {}", prompt.user())));

    let (pipeline, storage) = setup(backend).await;
    let pipeline = Arc::new(pipeline);
    let conversation = pipeline.create_conversation(None).await.unwrap();

    let mut handles = vec![];
    for i in 0..10 {
        let pipeline = Arc::clone(&pipeline);
        let id = conversation.id().to_string();
        handles.push(tokio::spawn(async move {
            pipeline
                .send_turn(TurnRequest::new(format!("msg {}", i)).with_conversation_id(id))
                .await
                .map(complete)
        }));
    }
    for handle in handles {
        assert!(!handle.await.unwrap().unwrap().failed);
    }

    let history = storage.history(conversation.id()).await.unwrap();
    assert_eq!(history.len(), 20);
    for pair in history.windows(2) {
        assert!(pair[0].timestamp() < pair[1].timestamp());
    }
    assert_eq!(history, storage.history(conversation.id()).await.unwrap());

    let conversation = storage.get_conversation(conversation.id()).await.unwrap();
    assert_eq!(conversation.updated_at(), history[19].timestamp());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_turns_only_see_prior_messages() {
    let prompts = Arc::new(std::sync::Mutex::new(Vec::<Prompt>::new()));
    let mut backend = mock_backend();
    let recorded = Arc::clone(&prompts);
    backend.expect_complete().times(12).returning(move |prompt| {
        recorded.lock().unwrap().push(prompt.clone());
        Ok(format!("echo {}", prompt.user()))
    });

    let (pipeline, storage) = setup(backend).await;
    let pipeline = Arc::new(pipeline);
    let conversation = pipeline.create_conversation(None).await.unwrap();

    let mut handles = vec![];
    for i in 0..12 {
        let pipeline = Arc::clone(&pipeline);
        let id = conversation.id().to_string();
        handles.push(tokio::spawn(async move {
            pipeline
                .send_turn(TurnRequest::new(format!("turn {}", i)).with_conversation_id(id))
                .await
                .map(complete)
        }));
    }
    for handle in handles {
        assert!(!handle.await.unwrap().unwrap().failed);
    }

    let history = storage.history(conversation.id()).await.unwrap();
    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 12);
    for prompt in prompts.iter() {
        let position = history
            .iter()
            .position(|m| m.role() == Role::User && m.content() == prompt.user())
            .unwrap();
        let own_id = history[position].id();
        assert!(
            prompt.history().iter().all(|m| m.id() < own_id),
            "{} saw a later message",
            prompt.user()
        );
        assert_eq!(prompt.history(), &history[..position]);
    }
}

struct SlowBackend;

#[async_trait]
impl Backend for SlowBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn model(&self) -> &str {
        "slow"
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn complete(&self, _prompt: &Prompt) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".to_string())
    }

    async fn stream(&self, _prompt: &Prompt) -> Result<FragmentStream> {
        Ok(fragments(vec![]))
    }
}

#[tokio::test]
async fn test_timeout_is_persisted() {
    let storage = new_storage().await;
    let config = ChatConfig::default().with_timeout_secs(1);
    let pipeline = ResponsePipeline::with_backend(config, storage.clone(), Arc::new(SlowBackend)).await;

    let res = complete(pipeline.send_turn(TurnRequest::new("hello")).await.unwrap());
    assert!(res.failed);
    assert!(
        res.response()
            .starts_with("Error getting AI response: timeout: no response after")
    );
    assert_eq!(storage.history(&res.conversation_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_export_matches_history() {
    let mut backend = mock_backend();
    backend
        .expect_complete()
        .returning(|prompt| Ok(format!("re: {}", prompt.user())));

    let (pipeline, _storage) = setup(backend).await;
    let res = complete(pipeline.send_turn(TurnRequest::new("one")).await.unwrap());
    pipeline
        .send_turn(TurnRequest::new("two").with_conversation_id(&res.conversation_id))
        .await
        .unwrap();

    let history = pipeline.history(&res.conversation_id).await.unwrap();
    let exported = pipeline
        .export_conversation(&res.conversation_id, ExportFormat::Structured)
        .await
        .unwrap();
    let parsed = ConversationExport::parse(&exported).unwrap();

    assert_eq!(parsed.messages.len(), history.len());
    for (exported, message) in parsed.messages.iter().zip(&history) {
        assert_eq!(exported.role, message.role());
        assert_eq!(exported.content, message.content());
        assert_eq!(exported.timestamp, message.timestamp());
    }

    pipeline.delete_conversation(&res.conversation_id).await.unwrap();
    assert!(matches!(
        pipeline.history(&res.conversation_id).await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn test_status() {
    let config = ChatConfig::default()
        .with_selected_model("gpt-4")
        .with_openai_api_key("sk-secret")
        .with_google_api_key(" ");
    let (pipeline, _storage) = setup_with_config(config, mock_backend()).await;

    let status = pipeline.status();
    assert_eq!(status.selected_model, "gpt-4");
    assert_eq!(status.current_provider, ProviderKind::OpenAI);
    assert_eq!(status.current_model, "gpt-4");
    assert!(status.has_openai_key);
    assert!(!status.has_anthropic_key);
    assert!(!status.has_google_key);
    assert!(!status.has_model_path);
    assert!(!serde_json::to_string(&status).unwrap().contains("sk-secret"));
}

#[test]
fn test_failure_text() {
    assert_eq!(failure_text(&Error::NotConfigured), NOT_CONFIGURED_MESSAGE);
    let err = Error::Provider(ProviderError::new(
        ProviderErrorKind::ContextTooLong,
        "too many tokens",
    ));
    assert_eq!(
        failure_text(&err),
        "Error getting AI response: context too long: too many tokens"
    );
}
