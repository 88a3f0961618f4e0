//! Language-model backends that answer a [`ChatRequest`] with a stream of
//! text fragments.

pub mod gemini;
pub mod ollama;
pub mod scripted;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::StatusCode;
use thiserror::Error;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use crate::prompt::ChatRequest;

pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;
pub use scripted::ScriptedBackend;

/// Longest single line accepted from a streamed response body.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Forward-only sequence of reply fragments. An `Err` item means the stream
/// broke off; nothing useful follows it.
pub type FragmentStream = BoxStream<'static, Result<String, BackendError>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("missing API key for {0}")]
    MissingApiKey(&'static str),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}: {snippet}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        snippet: String,
    },

    /// The provider reported an error inside the stream.
    #[error("{0}")]
    Upstream(String),

    /// The response body broke off or could not be framed.
    #[error("stream interrupted: {0}")]
    Interrupted(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Text shown in the chat bubble when a reply could not be produced.
    pub fn user_message(&self) -> String {
        format!("I'm sorry, but I encountered an error: {self}")
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Sends the request and returns the reply stream once the provider has
    /// accepted it. Connection, auth and quota problems surface here.
    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream, BackendError>;
}

/// Checks that an endpoint uses http(s) and strips the trailing slash.
pub(crate) fn normalize_endpoint(endpoint: &str) -> Result<String, BackendError> {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(BackendError::InvalidEndpoint(endpoint.to_string()))
    }
}

/// Turns a non-2xx response into [`BackendError::HttpStatus`].
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            tracing::debug!(error = %err, %url, "Failed to read error response body");
            String::new()
        }
    };
    let snippet = body.trim().chars().take(240).collect::<String>();
    tracing::error!(%status, %url, %snippet, "Backend request failed");
    Err(BackendError::HttpStatus {
        status,
        url: url.to_string(),
        snippet,
    })
}

/// Frames a streamed HTTP body into text lines.
pub(crate) fn body_lines(
    response: reqwest::Response,
) -> BoxStream<'static, Result<String, BackendError>> {
    let bytes = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other));
    FramedRead::new(
        StreamReader::new(bytes),
        LinesCodec::new_with_max_length(MAX_LINE_BYTES),
    )
    .map(|line| line.map_err(interrupted))
    .boxed()
}

fn interrupted(err: LinesCodecError) -> BackendError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            BackendError::Interrupted(format!("line longer than {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io) => BackendError::Interrupted(io.to_string()),
    }
}
