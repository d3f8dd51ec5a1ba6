//! HTTP agent backend
//!
//! Talks to an application-completion endpoint:
//! `POST {url}/{app_id}/completion` with
//! `{"input": {"prompt", "session_id"?}, "parameters": {"character_id"?}}`,
//! answered by `{"output": {"text", "session_id"}}`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use voice_chat_config::AgentSettings;
use voice_chat_core::{AgentClient, AgentReply, AgentRequest, Result, RetryPolicy};

use crate::LlmError;

/// Agent backend configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Apps API base URL
    pub endpoint: String,
    pub api_key: Option<String>,
    pub app_id: String,
    /// Single request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl AgentConfig {
    /// Build from settings; the application id is mandatory
    pub fn from_settings(settings: &AgentSettings) -> std::result::Result<Self, LlmError> {
        let app_id = settings
            .app_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| LlmError::Configuration("agent app_id is not set".to_string()))?;
        Ok(Self {
            endpoint: settings.url.clone(),
            api_key: settings.api_key.clone(),
            app_id,
            timeout: Duration::from_millis(settings.request_timeout_ms),
            retry: settings.retry.into(),
        })
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    input: CompletionInput<'a>,
    parameters: CompletionParameters<'a>,
}

#[derive(Debug, Serialize)]
struct CompletionInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CompletionParameters<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    character_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    output: Option<CompletionOutput>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    /// Character the stored session was opened for
    character_id: Option<String>,
}

/// Agent client over the apps completion API
pub struct HttpAgentClient {
    client: Client,
    config: AgentConfig,
    session: Mutex<SessionState>,
}

impl HttpAgentClient {
    pub fn new(config: AgentConfig) -> std::result::Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self {
            client,
            config,
            session: Mutex::new(SessionState::default()),
        })
    }

    fn completion_url(&self) -> String {
        format!(
            "{}/{}/completion",
            self.config.endpoint.trim_end_matches('/'),
            self.config.app_id
        )
    }

    /// Session id to send for `character_id`, dropping one opened for another character
    fn session_for(&self, character_id: Option<&str>) -> Option<String> {
        let mut session = self.session.lock();
        if session.session_id.is_some() && session.character_id.as_deref() != character_id {
            tracing::info!(
                previous = ?session.character_id,
                next = ?character_id,
                "Character changed, starting a new agent session"
            );
            session.session_id = None;
        }
        session.session_id.clone()
    }

    async fn complete(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        character_id: Option<&str>,
    ) -> std::result::Result<CompletionOutput, LlmError> {
        let body = CompletionRequest {
            input: CompletionInput { prompt, session_id },
            parameters: CompletionParameters { character_id },
        };

        let mut request = self.client.post(self.completion_url()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::Network(format!("HTTP {}", status)));
        }

        let parsed: CompletionResponse = if status.is_success() {
            response.json().await?
        } else {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, text)));
        };

        match parsed.output {
            Some(output) if !output.text.trim().is_empty() => Ok(output),
            _ => Err(LlmError::InvalidResponse(format!(
                "no output text (code={}, message={})",
                parsed.code.unwrap_or_default(),
                parsed.message.unwrap_or_default()
            ))),
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn chat(&self, request: AgentRequest) -> Result<AgentReply> {
        let character_id = request.character_id.as_deref();
        let session_id = self.session_for(character_id);
        let start = Instant::now();

        let prompt = request.utterance_text.as_str();
        let resume = session_id.as_deref();
        let output = self
            .config
            .retry
            .run("agent completion", |_| async move {
                self.complete(prompt, resume, character_id)
                    .await
                    .map_err(voice_chat_core::Error::from)
            })
            .await?;

        {
            let mut session = self.session.lock();
            if output.session_id.is_some() {
                session.session_id = output.session_id.clone();
                session.character_id = request.character_id.clone();
            }
        }

        tracing::info!(
            role = %request.role_id,
            session_id = ?output.session_id,
            resumed = session_id.is_some(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Agent replied"
        );

        Ok(AgentReply {
            reply_text: output.text,
            session_id: output.session_id,
        })
    }

    fn reset_session(&self) {
        let mut session = self.session.lock();
        if session.session_id.take().is_some() {
            tracing::debug!("Agent session reset");
        }
        session.character_id = None;
    }

    fn session_id(&self) -> Option<String> {
        self.session.lock().session_id.clone()
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use voice_chat_core::Role;

    #[derive(Clone, Default)]
    struct FakeApps {
        requests: Arc<Mutex<Vec<serde_json::Value>>>,
        failures: Arc<Mutex<u32>>,
    }

    async fn completion(
        State(apps): State<FakeApps>,
        Path(app_id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        {
            let mut failures = apps.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return (StatusCode::BAD_GATEWAY, Json(serde_json::json!({})));
            }
        }
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer sk-test") {
            return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"code": "InvalidApiKey"})));
        }
        apps.requests.lock().push(body.clone());
        let turn = apps.requests.lock().len();
        let session = body["input"]["session_id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-session-{}", app_id, turn));
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "output": { "text": format!("reply {}", turn), "session_id": session }
            })),
        )
    }

    async fn spawn_apps(apps: FakeApps) -> String {
        let app = Router::new()
            .route("/apps/:app_id/completion", post(completion))
            .with_state(apps);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/apps", addr)
    }

    fn client(endpoint: String, key: &str) -> HttpAgentClient {
        HttpAgentClient::new(AgentConfig {
            endpoint,
            api_key: Some(key.to_string()),
            app_id: "app1".to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(2, Duration::from_millis(5)),
        })
        .unwrap()
    }

    fn libai() -> Role {
        Role::new("libai", "李白", "longshu").with_character_id("char-libai")
    }

    #[test]
    fn test_app_id_required() {
        let settings = AgentSettings {
            app_id: None,
            ..AgentSettings::default()
        };
        assert!(matches!(
            AgentConfig::from_settings(&settings),
            Err(LlmError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_session_continuity() {
        let apps = FakeApps::default();
        let agent = client(spawn_apps(apps.clone()).await, "sk-test");

        let first = agent.chat(AgentRequest::new("你好", &libai())).await.unwrap();
        assert_eq!(first.reply_text, "reply 1");
        assert_eq!(agent.session_id().as_deref(), Some("app1-session-1"));

        agent.chat(AgentRequest::new("再来一首", &libai())).await.unwrap();
        let requests = apps.requests.lock().clone();
        assert!(requests[0]["input"].get("session_id").is_none());
        assert_eq!(requests[1]["input"]["session_id"], "app1-session-1");
        assert_eq!(requests[1]["parameters"]["character_id"], "char-libai");
    }

    #[tokio::test]
    async fn test_reset_session_starts_fresh() {
        let apps = FakeApps::default();
        let agent = client(spawn_apps(apps.clone()).await, "sk-test");

        agent.chat(AgentRequest::new("你好", &libai())).await.unwrap();
        agent.reset_session();
        assert!(agent.session_id().is_none());

        agent.chat(AgentRequest::new("你好", &libai())).await.unwrap();
        assert!(apps.requests.lock()[1]["input"].get("session_id").is_none());
    }

    #[tokio::test]
    async fn test_character_change_drops_session() {
        let apps = FakeApps::default();
        let agent = client(spawn_apps(apps.clone()).await, "sk-test");

        agent.chat(AgentRequest::new("你好", &libai())).await.unwrap();
        let other = Role::new("sunwukong", "孙悟空", "longxiaochun").with_character_id("char-wukong");
        agent.chat(AgentRequest::new("你好", &other)).await.unwrap();
        assert!(apps.requests.lock()[1]["input"].get("session_id").is_none());
    }

    #[tokio::test]
    async fn test_gateway_errors_retried() {
        let apps = FakeApps::default();
        *apps.failures.lock() = 2;
        let agent = client(spawn_apps(apps.clone()).await, "sk-test");

        let reply = agent.chat(AgentRequest::new("你好", &libai())).await.unwrap();
        assert_eq!(reply.reply_text, "reply 1");
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let apps = FakeApps::default();
        let agent = client(spawn_apps(apps.clone()).await, "wrong");

        let err = agent.chat(AgentRequest::new("你好", &libai())).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(agent.session_id().is_none());
    }
}
