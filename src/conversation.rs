//! Conversation transcript and the per-message lifecycle.
//!
//! Messages move one way: `Pending -> Streaming -> Done | Failed` (a pending
//! message may also be finalized directly). The [`Conversation`] is the only
//! writer of the transcript. Every successful mutation publishes a fresh
//! [`TranscriptSnapshot`] to subscribers.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::chart::ChartSpec;

pub type MessageId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Done,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Done | MessageStatus::Failed)
    }

    /// Pending or streaming.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

/// How an assistant message ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    pub status: MessageStatus,
}

/// Immutable view of the transcript after one state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSnapshot {
    /// Bumped by every reset.
    pub generation: u64,
    /// Bumped by every published change.
    pub revision: u64,
    pub messages: Vec<Message>,
}

impl TranscriptSnapshot {
    pub fn streaming_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.status == MessageStatus::Streaming)
            .count()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Ticket for the open assistant message. Only valid within the generation
/// it was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistantHandle {
    id: MessageId,
    generation: u64,
}

impl AssistantHandle {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("an assistant message is already in flight")]
    AssistantInFlight,

    #[error("assistant message {0} has already been finalized")]
    AlreadyFinalized(MessageId),

    #[error("handle belongs to a conversation that has been reset")]
    StaleHandle,

    #[error("no assistant message with id {0}")]
    UnknownMessage(MessageId),
}

#[derive(Debug)]
pub struct Conversation {
    messages: Vec<Message>,
    generation: u64,
    revision: u64,
    snapshots: watch::Sender<TranscriptSnapshot>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(TranscriptSnapshot {
            generation: 0,
            revision: 0,
            messages: Vec::new(),
        });
        Self {
            messages: Vec::new(),
            generation: 0,
            revision: 0,
            snapshots,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while an assistant message is pending or streaming.
    pub fn has_open_message(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.sender == Sender::Assistant && m.status.is_open())
    }

    pub fn append_user_message(&mut self, text: impl Into<String>) -> MessageId {
        let id = Uuid::new_v4();
        self.messages.push(Message {
            id,
            sender: Sender::User,
            text: text.into(),
            chart: None,
            status: MessageStatus::Done,
        });
        self.publish();
        id
    }

    /// Adds an already-finished assistant message (greetings, notices).
    pub fn append_assistant_message(&mut self, text: impl Into<String>) -> MessageId {
        let id = Uuid::new_v4();
        self.messages.push(Message {
            id,
            sender: Sender::Assistant,
            text: text.into(),
            chart: None,
            status: MessageStatus::Done,
        });
        self.publish();
        id
    }

    /// Opens a pending assistant message for a streamed reply.
    pub fn begin_assistant_message(&mut self) -> Result<AssistantHandle, ConversationError> {
        if self.has_open_message() {
            return Err(ConversationError::AssistantInFlight);
        }

        let id = Uuid::new_v4();
        self.messages.push(Message {
            id,
            sender: Sender::Assistant,
            text: String::new(),
            chart: None,
            status: MessageStatus::Pending,
        });
        self.publish();

        Ok(AssistantHandle {
            id,
            generation: self.generation,
        })
    }

    /// Replaces the text of the open assistant message and marks it streaming.
    pub fn update_assistant_text(
        &mut self,
        handle: &AssistantHandle,
        text: &str,
    ) -> Result<(), ConversationError> {
        let message = self.open_message_mut(handle)?;
        message.text.clear();
        message.text.push_str(text);
        message.status = MessageStatus::Streaming;
        self.publish();
        Ok(())
    }

    /// Closes the assistant message. Callable once per handle.
    pub fn finalize_assistant(
        &mut self,
        handle: &AssistantHandle,
        text: String,
        chart: Option<ChartSpec>,
        outcome: Outcome,
    ) -> Result<(), ConversationError> {
        let message = self.open_message_mut(handle)?;
        message.text = text;
        message.chart = chart;
        message.status = match outcome {
            Outcome::Done => MessageStatus::Done,
            Outcome::Failed => MessageStatus::Failed,
        };
        self.publish();
        Ok(())
    }

    /// Discards the transcript. Handles issued before the reset go stale.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.generation += 1;
        self.publish();
    }

    fn open_message_mut(
        &mut self,
        handle: &AssistantHandle,
    ) -> Result<&mut Message, ConversationError> {
        if handle.generation != self.generation {
            return Err(ConversationError::StaleHandle);
        }
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == handle.id && m.sender == Sender::Assistant)
            .ok_or(ConversationError::UnknownMessage(handle.id))?;
        if message.status.is_terminal() {
            return Err(ConversationError::AlreadyFinalized(handle.id));
        }
        Ok(message)
    }

    fn publish(&mut self) {
        self.revision += 1;
        self.snapshots.send_replace(TranscriptSnapshot {
            generation: self.generation,
            revision: self.revision,
            messages: self.messages.clone(),
        });
    }
}
