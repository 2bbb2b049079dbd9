use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::TextGenerator;
use crate::retry::send_with_retry;

const MAX_RETRIES: u32 = 3;

/// Non-streaming Ollama `/api/generate` client.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    #[must_use]
    pub fn new(base_url: &str, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            model: model.into(),
        }
    }

    /// Check that Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint cannot be reached.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::Unavailable(format!(
                "ollama returned {} — is it running?",
                response.status()
            )))
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TextGenerator for OllamaGenerator {
    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            system,
            stream: false,
            options: GenerateOptions {
                num_predict: max_tokens,
            },
        };

        let response = send_with_retry("ollama", MAX_RETRIES, || {
            self.client.post(&url).json(&body).send()
        })
        .await?;

        if !response.status().is_success() {
            return Err(LlmError::Unavailable(format!(
                "ollama returned {}",
                response.status()
            )));
        }

        let parsed: GenerateResponse = response.json().await?;
        if parsed.response.trim().is_empty() {
            return Err(LlmError::EmptyResponse { provider: "ollama" });
        }
        Ok(parsed.response)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
