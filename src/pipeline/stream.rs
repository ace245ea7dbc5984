use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{SinkExt, Stream, StreamExt, channel::mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    backend::FragmentStream,
    config::constants::STREAM_INTERRUPTED_MARKER,
    error::Result,
    models::{Message, Role},
    pipeline::turn::{Turn, TurnState},
    storage::ArcStorage,
};

const EVENT_BUFFER: usize = 32;

/// What a streaming caller receives. Concatenating every `Fragment` and
/// `Failed` text yields exactly the persisted assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Fragment(String),
    Failed(String),
    /// Sent once, after the assistant message is persisted.
    End(Message),
}

/// Cancellable, single-reader stream of a turn's events. Dropping it aborts
/// the turn; the text produced so far is persisted as interrupted.
pub struct TurnStream {
    conversation_id: String,
    events: mpsc::Receiver<TurnEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
    handle: JoinHandle<Result<Message>>,
}

impl TurnStream {
    /// A turn that failed before any fragment was produced. The failure
    /// is already persisted as `message`.
    pub(crate) fn failed(message: Message) -> Self {
        let (mut tx, events) = mpsc::channel(2);
        let _ = tx.try_send(TurnEvent::Failed(message.content().to_string()));
        let _ = tx.try_send(TurnEvent::End(message.clone()));

        let cancel = CancellationToken::new();
        Self {
            conversation_id: message.conversation_id().to_string(),
            events,
            _guard: cancel.clone().drop_guard(),
            cancel,
            handle: tokio::spawn(async move { Ok(message) }),
        }
    }

    /// Drives `fragments` on a separate task, forwarding each fragment and
    /// persisting the concatenation once the sequence ends.
    pub(crate) fn spawn(turn: Turn, fragments: FragmentStream, storage: ArcStorage) -> Self {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let conversation_id = turn.conversation_id().to_string();

        let handle = tokio::spawn(produce(turn, fragments, storage, tx, cancel.clone()));

        Self {
            conversation_id,
            events,
            _guard: cancel.clone().drop_guard(),
            cancel,
            handle,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Stops fragment production. The partial reply is persisted as
    /// interrupted and returned.
    pub async fn interrupt(self) -> Result<Message> {
        let TurnStream {
            events,
            cancel,
            handle,
            ..
        } = self;
        cancel.cancel();
        drop(events);
        handle.await?
    }
}

impl Stream for TurnStream {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

enum Outcome {
    Finished,
    Errored(String),
    Interrupted,
}

async fn produce(
    mut turn: Turn,
    mut fragments: FragmentStream,
    storage: ArcStorage,
    mut tx: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
) -> Result<Message> {
    let mut content = String::new();

    let outcome = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break Outcome::Interrupted,
            next = fragments.next() => next,
        };

        match next {
            Some(Ok(text)) => {
                content.push_str(&text);
                let sent = tokio::select! {
                    _ = cancel.cancelled() => false,
                    res = tx.send(TurnEvent::Fragment(text)) => res.is_ok(),
                };
                if !sent {
                    break Outcome::Interrupted;
                }
            }
            Some(Err(err)) => {
                log::warn!(
                    "Stream for conversation {} failed: {}",
                    turn.conversation_id(),
                    err
                );
                break Outcome::Errored(format!("\n\n[error: {}]", err));
            }
            None => break Outcome::Finished,
        }
    };
    // Stop the provider connection before persisting.
    drop(fragments);

    let next = match &outcome {
        Outcome::Finished => TurnState::Completed,
        Outcome::Errored(marker) => {
            content.push_str(marker);
            TurnState::Failed
        }
        Outcome::Interrupted => {
            log::info!(
                "Stream for conversation {} interrupted",
                turn.conversation_id()
            );
            content.push_str("\n\n");
            content.push_str(STREAM_INTERRUPTED_MARKER);
            TurnState::Failed
        }
    };

    let message = storage
        .append_message(turn.conversation_id(), Role::Assistant, &content)
        .await
        .inspect_err(|err| log::error!("Failed to persist streamed reply: {}", err))?;
    turn.advance(next)?;

    if let Outcome::Errored(marker) = outcome {
        let _ = tx.send(TurnEvent::Failed(marker)).await;
    }
    if !cancel.is_cancelled() {
        let _ = tx.send(TurnEvent::End(message.clone())).await;
    }
    Ok(message)
}
