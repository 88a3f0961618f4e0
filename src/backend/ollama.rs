//! Streaming client for a local Ollama server.
//!
//! `POST {endpoint}/api/generate` with `stream: true` answers with one JSON
//! object per line:
//!
//! ```text
//! {"model":"gemma3:12b","response":"Here","done":false}
//! {"model":"gemma3:12b","response":" are","done":false}
//! {"model":"gemma3:12b","response":"","done":true}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{body_lines, ensure_success, normalize_endpoint, BackendError, ChatBackend, FragmentStream};
use crate::prompt::ChatRequest;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

pub struct OllamaBackend {
    client: reqwest::Client,
    model: String,
    url_generate: String,
}

impl OllamaBackend {
    pub fn new(endpoint: &str, model: impl Into<String>) -> Result<Self, BackendError> {
        let base = normalize_endpoint(endpoint)?;
        // No overall timeout: a reply streams for as long as the model talks.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            model: model.into(),
            url_generate: format!("{base}/api/generate"),
        })
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream, BackendError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: &request.system_instruction,
            stream: true,
        };

        debug!("POST {}", self.url_generate);
        let response = self
            .client
            .post(&self.url_generate)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, &self.url_generate).await?;

        let fragments = body_lines(response).filter_map(|line| async move {
            match line {
                Ok(line) => parse_line(&line).transpose(),
                Err(err) => Some(Err(err)),
            }
        });
        Ok(fragments.boxed())
    }
}

/// Decodes one NDJSON line. Blank lines, empty deltas and the closing
/// `done` object yield nothing.
fn parse_line(line: &str) -> Result<Option<String>, BackendError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let chunk: GenerateChunk = serde_json::from_str(line).map_err(|e| {
        warn!("Failed to parse JSON line: {} - Error: {}", line, e);
        BackendError::Decode(format!("invalid stream line: {e}"))
    })?;

    if let Some(error) = chunk.error {
        return Err(BackendError::Upstream(error));
    }
    if chunk.response.is_empty() {
        return Ok(None);
    }
    Ok(Some(chunk.response))
}
