//! HTTP synthesis client
//!
//! `POST {url}` with `{"text", "voice", "model"}`; the service renders the
//! audio to a file and answers `{"file_path": "..."}`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use voice_chat_config::SynthesisSettings;
use voice_chat_core::{AudioRef, Error, Result, RetryPolicy, SynthesisClient};

const COMPONENT: &str = "synthesis";

/// Synthesis client configuration
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub url: String,
    pub model: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self::from(&SynthesisSettings::default())
    }
}

impl From<&SynthesisSettings> for SynthesisConfig {
    fn from(settings: &SynthesisSettings) -> Self {
        Self {
            url: settings.url.clone(),
            model: settings.model.clone(),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            retry: settings.retry.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Synthesis over a local HTTP service
pub struct HttpSynthesisClient {
    client: reqwest::Client,
    config: SynthesisConfig,
}

impl HttpSynthesisClient {
    pub fn new(config: SynthesisConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("synthesis http client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn request(&self, text: &str, voice_id: &str) -> Result<AudioRef> {
        let body = SynthesisRequest {
            text,
            voice: voice_id,
            model: &self.config.model,
        };

        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::transient(COMPONENT, format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::collaborator(COMPONENT, format!("HTTP {}: {}", status, detail)));
        }

        let parsed: SynthesisResponse = response
            .json()
            .await
            .map_err(|e| Error::collaborator(COMPONENT, format!("bad response body: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(Error::collaborator(COMPONENT, error));
        }
        match parsed.file_path {
            Some(path) if !path.trim().is_empty() => Ok(AudioRef::File(PathBuf::from(path))),
            _ => Err(Error::collaborator(COMPONENT, "response carried no file_path")),
        }
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        Error::transient(COMPONENT, err)
    } else {
        Error::collaborator(COMPONENT, err)
    }
}

#[async_trait]
impl SynthesisClient for HttpSynthesisClient {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioRef> {
        let started = std::time::Instant::now();
        let audio = self
            .config
            .retry
            .run("synthesize", |_| self.request(text, voice_id))
            .await?;

        tracing::debug!(
            voice = voice_id,
            chars = text.chars().count(),
            latency_ms = started.elapsed().as_millis() as u64,
            audio = %audio,
            "Synthesized segment"
        );
        Ok(audio)
    }

    fn name(&self) -> &str {
        "http"
    }
}
