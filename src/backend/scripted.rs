//! In-memory backend that replays a fixed reply. Used by tests and offline
//! demos.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use super::{BackendError, ChatBackend, FragmentStream};
use crate::prompt::ChatRequest;

#[derive(Debug, Clone)]
enum Script {
    Reply {
        fragments: Vec<String>,
        /// Break the stream off after this many fragments.
        interrupt_after: Option<usize>,
    },
    FailToOpen(String),
}

#[derive(Debug)]
pub struct ScriptedBackend {
    script: Script,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn reply<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Reply {
            fragments: fragments.into_iter().map(Into::into).collect(),
            interrupt_after: None,
        })
    }

    /// Delivers the first `after` fragments, then a transport error.
    pub fn interrupted<I, S>(fragments: I, after: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Reply {
            fragments: fragments.into_iter().map(Into::into).collect(),
            interrupt_after: Some(after),
        })
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self::with_script(Script::FailToOpen(reason.into()))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, oldest first.
    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream, BackendError> {
        self.requests.lock().await.push(request.clone());

        match &self.script {
            Script::FailToOpen(reason) => Err(BackendError::Upstream(reason.clone())),
            Script::Reply {
                fragments,
                interrupt_after,
            } => {
                let delivered = interrupt_after.unwrap_or(fragments.len()).min(fragments.len());
                let mut items: Vec<Result<String, BackendError>> =
                    fragments[..delivered].iter().cloned().map(Ok).collect();
                if interrupt_after.is_some() {
                    items.push(Err(BackendError::Interrupted(
                        "connection reset by peer".to_string(),
                    )));
                }
                Ok(stream::iter(items).boxed())
            }
        }
    }
}
