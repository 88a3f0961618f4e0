//! The session aggregate: one dataset, one conversation, one question in
//! flight at a time.
//!
//! `Session` is a cheap handle; clones share the same state. The state lock
//! is only held for the synchronous part of each operation, never while a
//! backend stream is awaited, so `reset` can run while a reply is streaming.
//! A reset bumps the conversation generation, and the orphaned reply notices
//! on its next update and stops consuming its stream.

use std::sync::Arc;

use futures::stream::StreamExt;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::assembler::ResponseAssembler;
use crate::backend::ChatBackend;
use crate::chart::ChartSpec;
use crate::conversation::{
    AssistantHandle, Conversation, ConversationError, Message, Outcome, TranscriptSnapshot,
};
use crate::dataset::{DatasetPreview, TabularDataset, PREVIEW_ROWS};
use crate::prompt::{build_request, ChatRequest, PromptError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no dataset loaded; upload a CSV file first")]
    NoDataset,

    #[error("a question is already being answered")]
    Busy,

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),
}

/// A submitted question whose reply has not been streamed yet.
#[derive(Debug)]
pub struct PendingTurn {
    handle: AssistantHandle,
    request: ChatRequest,
}

impl PendingTurn {
    pub fn handle(&self) -> AssistantHandle {
        self.handle
    }

    pub fn request(&self) -> &ChatRequest {
        &self.request
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The assistant message reached `done` or `failed`.
    Finished(Message),
    /// The session was reset while the reply was in flight.
    Orphaned,
}

struct SessionState {
    dataset: Option<TabularDataset>,
    conversation: Conversation,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
    snapshots: watch::Receiver<TranscriptSnapshot>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub fn greeting(dataset: &TabularDataset) -> String {
    format!(
        "Successfully loaded your data with {} rows. I am the Business Insights Advisor. \
         What would you like to know? You can ask for calculations, insights, or even charts \
         (e.g., \"show me a bar chart of sales by product\").",
        dataset.row_count()
    )
}

impl Session {
    pub fn new() -> Self {
        let conversation = Conversation::new();
        let snapshots = conversation.subscribe();
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                dataset: None,
                conversation,
            })),
            snapshots,
        }
    }

    /// Starts a fresh conversation about `dataset`, replacing any previous one.
    pub async fn init(&self, dataset: TabularDataset) {
        let mut state = self.inner.lock().await;
        state.conversation.reset();
        state.conversation.append_assistant_message(greeting(&dataset));
        info!(
            columns = dataset.headers().len(),
            rows = dataset.row_count(),
            "Session initialized"
        );
        state.dataset = Some(dataset);
    }

    /// Drops the dataset and the transcript. Safe while a reply is streaming.
    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.dataset = None;
        state.conversation.reset();
        info!(generation = state.conversation.generation(), "Session reset");
    }

    pub async fn dataset(&self) -> Option<TabularDataset> {
        self.inner.lock().await.dataset.clone()
    }

    pub async fn preview(&self) -> Option<DatasetPreview> {
        self.inner
            .lock()
            .await
            .dataset
            .as_ref()
            .map(|d| d.preview(PREVIEW_ROWS))
    }

    /// True while an assistant reply is pending or streaming.
    pub async fn is_busy(&self) -> bool {
        self.inner.lock().await.conversation.has_open_message()
    }

    pub fn subscribe(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Records the question and opens the assistant message.
    ///
    /// Checking for a reply in flight and opening the new one happen under
    /// the same lock, so two concurrent submissions cannot both pass.
    pub async fn begin_turn(&self, question: &str) -> Result<PendingTurn, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        let dataset = state.dataset.as_ref().ok_or(SessionError::NoDataset)?;
        if state.conversation.has_open_message() {
            return Err(SessionError::Busy);
        }

        let request = build_request(dataset, question)?;
        state.conversation.append_user_message(question);
        let handle = state.conversation.begin_assistant_message()?;
        debug!(message = %handle.id(), "Turn started");

        Ok(PendingTurn { handle, request })
    }

    /// Streams the reply for `turn` into the conversation.
    ///
    /// Backend failures never escape: they end up as the text of a `failed`
    /// message, or, after some text has arrived, as a best-effort `done`.
    #[instrument(skip_all, fields(backend = backend.name(), message = %turn.handle.id()))]
    pub async fn run_turn(&self, turn: PendingTurn, backend: &dyn ChatBackend) -> TurnOutcome {
        let PendingTurn { handle, request } = turn;

        let mut stream = match backend.open_stream(&request).await {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "Failed to open backend stream");
                return self
                    .finalize(&handle, err.user_message(), None, Outcome::Failed)
                    .await;
            }
        };

        let mut assembler = ResponseAssembler::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    assembler.push(&fragment);
                    let mut state = self.inner.lock().await;
                    if let Err(err) = state
                        .conversation
                        .update_assistant_text(&handle, assembler.text())
                    {
                        debug!(error = %err, "Dropping reply for a discarded conversation");
                        return TurnOutcome::Orphaned;
                    }
                }
                Err(err) if assembler.fragments_seen() == 0 => {
                    error!(error = %err, "Backend stream failed before any text arrived");
                    return self
                        .finalize(&handle, err.user_message(), None, Outcome::Failed)
                        .await;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        fragments = assembler.fragments_seen(),
                        "Backend stream interrupted, keeping partial reply"
                    );
                    break;
                }
            }
        }

        let assembled = assembler.finish();
        self.finalize(&handle, assembled.text, assembled.chart, Outcome::Done)
            .await
    }

    /// `begin_turn` followed by `run_turn`.
    pub async fn submit(
        &self,
        question: &str,
        backend: &dyn ChatBackend,
    ) -> Result<TurnOutcome, SessionError> {
        let turn = self.begin_turn(question).await?;
        Ok(self.run_turn(turn, backend).await)
    }

    async fn finalize(
        &self,
        handle: &AssistantHandle,
        text: String,
        chart: Option<ChartSpec>,
        outcome: Outcome,
    ) -> TurnOutcome {
        let mut state = self.inner.lock().await;
        match state
            .conversation
            .finalize_assistant(handle, text, chart, outcome)
        {
            Ok(()) => state
                .conversation
                .messages()
                .iter()
                .find(|m| m.id == handle.id())
                .cloned()
                .map(TurnOutcome::Finished)
                .unwrap_or(TurnOutcome::Orphaned),
            Err(err) => {
                debug!(error = %err, "Not finalizing reply for a discarded conversation");
                TurnOutcome::Orphaned
            }
        }
    }
}
