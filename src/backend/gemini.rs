//! Streaming client for the Gemini `streamGenerateContent` API.
//!
//! With `alt=sse` the reply is a server-sent event stream whose `data:` lines
//! each carry a `GenerateContentResponse` JSON object.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{body_lines, ensure_success, normalize_endpoint, BackendError, ChatBackend, FragmentStream};
use crate::prompt::ChatRequest;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<OutPart<'a>>,
}

#[derive(Debug, Serialize)]
struct OutPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<InPart>,
}

#[derive(Debug, Deserialize)]
struct InPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
}

pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url_stream: String,
}

impl GeminiBackend {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, BackendError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(BackendError::MissingApiKey("gemini"))?;
        let base = normalize_endpoint(endpoint)?;
        let model = model.into();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let url_stream = format!("{base}/v1beta/models/{model}:streamGenerateContent?alt=sse");
        Ok(Self {
            client,
            api_key,
            model,
            url_stream,
        })
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream, BackendError> {
        let body = StreamRequest {
            system_instruction: Content {
                role: None,
                parts: vec![OutPart {
                    text: &request.system_instruction,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![OutPart {
                    text: &request.prompt,
                }],
            }],
        };

        debug!("POST {}", self.url_stream);
        let response = self
            .client
            .post(&self.url_stream)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, &self.url_stream).await?;

        let fragments = body_lines(response).filter_map(|line| async move {
            match line {
                Ok(line) => parse_event_line(&line).transpose(),
                Err(err) => Some(Err(err)),
            }
        });
        Ok(fragments.boxed())
    }
}

/// Extracts the text of one SSE line. Non-`data:` lines (blank separators,
/// comments, event names) yield nothing.
fn parse_event_line(line: &str) -> Result<Option<String>, BackendError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        warn!("Failed to parse SSE data: {} - Error: {}", data, e);
        BackendError::Decode(format!("invalid event payload: {e}"))
    })?;

    if let Some(error) = chunk.error {
        return Err(BackendError::Upstream(error.message));
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .take(1)
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|p| p.text)
        .collect();

    Ok(if text.is_empty() { None } else { Some(text) })
}
