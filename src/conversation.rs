//! Conversation state: the transcript plus the single in-flight send.
//!
//! State lives in a `watch` channel so renderers can observe every change
//! while `send` folds the transport's event stream into it.

use crate::api::{ChatError, ChatTransport, StreamEvent};
use crate::types::{ChatMessage, MessageId, Role, SessionId};
use futures::StreamExt;
use tokio::sync::watch;

pub const WELCOME_MESSAGE: &str = "Hello! I'm your RAG-powered assistant. I can help you find information from your documents.

**What I can do:**
- Answer questions based on your knowledge base
- Provide accurate, context-aware responses
- Remember our conversation for follow-up questions

Ask me anything, or try one of the sample questions below!";

pub const CLEARED_MESSAGE: &str = "Conversation cleared. How can I help you?";

#[derive(Clone, Debug, PartialEq)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    pub in_flight: Option<MessageId>,
    pub last_error: Option<String>,
}

impl ConversationState {
    fn with_greeting(greeting: &str) -> Self {
        Self {
            messages: vec![ChatMessage::assistant(greeting)],
            in_flight: None,
            last_error: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn message(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|msg| &msg.id == id)
    }

    /// The assistant message currently receiving content, if any.
    pub fn streaming_message(&self) -> Option<&ChatMessage> {
        self.in_flight.as_ref().and_then(|id| self.message(id))
    }
}

/// User-visible annotation that replaces a failed assistant message.
pub fn error_annotation(err: &ChatError) -> String {
    if err.is_protocol() {
        format!("Sorry, I encountered an error: {err}")
    } else {
        format!("Sorry, I encountered an error: {err}. Please try again.")
    }
}

pub struct Conversation<T> {
    transport: T,
    session_id: SessionId,
    state: watch::Sender<ConversationState>,
}

impl<T: ChatTransport> Conversation<T> {
    pub fn new(transport: T, session_id: SessionId) -> Self {
        let (state, _) = watch::channel(ConversationState::with_greeting(WELCOME_MESSAGE));
        Self {
            transport,
            session_id,
            state,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.borrow().last_error.clone()
    }

    /// Sends `text` and streams the reply into the transcript.
    ///
    /// Does nothing for blank input or while another send is in flight.
    /// Failures end up in the transcript and in `last_error`, never in the
    /// return value.
    pub async fn send(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let mut started = None;
        self.state.send_if_modified(|state| {
            if state.is_loading() {
                return false;
            }
            let assistant = ChatMessage::assistant_placeholder();
            started = Some(assistant.id.clone());
            state.in_flight = Some(assistant.id.clone());
            state.last_error = None;
            state.messages.push(ChatMessage::user(text));
            state.messages.push(assistant);
            true
        });
        let Some(assistant_id) = started else {
            tracing::debug!("send ignored, a reply is still streaming");
            return;
        };

        let reply = PendingReply {
            conversation: self,
            id: assistant_id,
            settled: false,
        };

        tracing::info!(session = %self.session_id, "sending message");
        let mut events = match self.transport.stream_chat(&self.session_id, text).await {
            Ok(events) => events,
            Err(err) => return reply.settle(Some(err)),
        };

        while let Some(item) = events.next().await {
            match item {
                Ok(StreamEvent::Content(chunk)) => self.append(&reply.id, &chunk),
                Ok(StreamEvent::Done) => return reply.settle(None),
                Ok(StreamEvent::Error(message)) => {
                    return reply.settle(Some(ChatError::Protocol(message)));
                }
                Err(err) => return reply.settle(Some(err)),
            }
        }

        // Custom transports may end without a terminal event.
        reply.settle(None);
    }

    /// Clears the server-side session and resets the local transcript.
    ///
    /// The local reset happens even when the server cannot be reached.
    pub async fn clear(&self) {
        if let Err(err) = self.transport.clear_session(&self.session_id).await {
            tracing::warn!(error = %err, session = %self.session_id, "failed to clear server session");
        }

        self.state.send_modify(|state| {
            state.messages = vec![ChatMessage::assistant(CLEARED_MESSAGE)];
            state.last_error = None;
        });
    }

    fn append(&self, id: &MessageId, chunk: &str) {
        self.state.send_if_modified(|state| {
            match state
                .messages
                .iter_mut()
                .find(|msg| &msg.id == id && msg.role == Role::Assistant)
            {
                Some(msg) if msg.is_streaming => {
                    msg.content.push_str(chunk);
                    true
                }
                _ => {
                    tracing::debug!(message = %id, "dropping content for a message no longer streaming");
                    false
                }
            }
        });
    }

    fn settle(&self, id: &MessageId, failure: Option<ChatError>) {
        match &failure {
            Some(err) => tracing::warn!(error = %err, "chat reply failed"),
            None => tracing::info!(message = %id, "chat reply complete"),
        }

        self.state.send_modify(|state| {
            if state.in_flight.as_ref() == Some(id) {
                state.in_flight = None;
            }
            let Some(msg) = state.messages.iter_mut().find(|msg| &msg.id == id) else {
                return;
            };
            if !msg.is_streaming {
                return;
            }
            msg.is_streaming = false;
            if let Some(err) = failure {
                msg.content = error_annotation(&err);
                state.last_error = Some(err.to_string());
            }
        });
    }
}

/// Settles the in-flight reply exactly once, including when `send` is
/// dropped mid-stream.
struct PendingReply<'a, T: ChatTransport> {
    conversation: &'a Conversation<T>,
    id: MessageId,
    settled: bool,
}

impl<T: ChatTransport> PendingReply<'_, T> {
    fn settle(mut self, failure: Option<ChatError>) {
        self.settled = true;
        self.conversation.settle(&self.id, failure);
    }
}

impl<T: ChatTransport> Drop for PendingReply<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            self.conversation.settle(&self.id, Some(ChatError::Interrupted));
        }
    }
}
