use std::sync::Arc;

use clap::{Args, ValueEnum};

use crate::backend::{BackendError, ChatBackend, GeminiBackend, OllamaBackend};
use crate::constants::{
    DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_URL, DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// Local Ollama server.
    Ollama,
    /// Google Gemini API.
    Gemini,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::Gemini => "gemini",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Ollama => DEFAULT_OLLAMA_MODEL,
            Provider::Gemini => DEFAULT_GEMINI_MODEL,
        }
    }
}

/// Backend selection, shared by every command that talks to a model.
#[derive(Debug, Clone, Args)]
pub struct BackendArgs {
    /// Language-model provider.
    #[arg(long, env = "ADVISOR_PROVIDER", value_enum, default_value_t = Provider::Ollama, global = true)]
    pub provider: Provider,

    /// Model name (defaults to a sensible model for the provider).
    #[arg(long, env = "ADVISOR_MODEL", global = true)]
    pub model: Option<String>,

    /// Base URL of the Ollama server.
    #[arg(long, env = "OLLAMA_URL", default_value = DEFAULT_OLLAMA_URL, global = true)]
    pub ollama_url: String,

    /// Base URL of the Gemini API.
    #[arg(long, env = "GEMINI_URL", default_value = DEFAULT_GEMINI_URL, global = true)]
    pub gemini_url: String,

    /// API key for Gemini.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    pub gemini_api_key: Option<String>,
}

impl BackendArgs {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn build_backend(&self) -> Result<Arc<dyn ChatBackend>, BackendError> {
        let model = self.model().to_string();
        tracing::info!(provider = self.provider.as_str(), %model, "Configuring backend");
        Ok(match self.provider {
            Provider::Ollama => Arc::new(OllamaBackend::new(&self.ollama_url, model)?),
            Provider::Gemini => Arc::new(GeminiBackend::new(
                &self.gemini_url,
                model,
                self.gemini_api_key.clone(),
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        backend: BackendArgs,
    }

    #[test]
    fn test_model_falls_back_to_provider_default() {
        let cli = TestCli::parse_from(["test", "--provider", "gemini", "--gemini-api-key", "k"]);
        assert_eq!(cli.backend.provider, Provider::Gemini);
        assert_eq!(cli.backend.model(), DEFAULT_GEMINI_MODEL);
    }

    #[test]
    fn test_explicit_model_wins() {
        let cli = TestCli::parse_from(["test", "--model", "llama3.1:8b", "--ollama-url", "http://box:11434"]);
        assert_eq!(cli.backend.model(), "llama3.1:8b");
        assert!(cli.backend.build_backend().is_ok());
    }

    #[test]
    fn test_gemini_without_key_fails() {
        let mut cli = TestCli::parse_from(["test", "--provider", "gemini"]);
        cli.backend.gemini_api_key = None;
        assert!(matches!(
            cli.backend.build_backend().err(),
            Some(BackendError::MissingApiKey(_))
        ));
    }
}
