//! Streaming recognition over WebSocket
//!
//! Protocol: after connecting the client sends a `start` text message with
//! the audio format, then raw PCM16LE frames as binary messages. The service
//! answers with JSON text messages `{"text": "...", "is_final": bool}` or
//! `{"error": "..."}`. A `stop` message ends the stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use voice_chat_config::RecognitionSettings;
use voice_chat_core::{
    AudioFrame, Error, RecognitionClient, Result, TranscriptEvent, TranscriptStream,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

const COMPONENT: &str = "recognition";

/// WebSocket recognition client configuration
#[derive(Debug, Clone)]
pub struct WsRecognitionConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub sample_rate: u32,
    pub connect_timeout: Duration,
}

impl From<&RecognitionSettings> for WsRecognitionConfig {
    fn from(settings: &RecognitionSettings) -> Self {
        Self {
            url: settings.url.clone(),
            api_key: settings.api_key.clone(),
            sample_rate: settings.sample_rate,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecognitionMessage {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Streaming recognition client
pub struct WsRecognitionClient {
    config: WsRecognitionConfig,
    sink: tokio::sync::Mutex<Option<WsSink>>,
}

impl WsRecognitionClient {
    pub fn new(config: WsRecognitionConfig) -> Self {
        Self {
            config,
            sink: tokio::sync::Mutex::new(None),
        }
    }

    fn start_message(&self) -> String {
        serde_json::json!({
            "type": "start",
            "sample_rate": self.config.sample_rate,
            "format": "pcm",
        })
        .to_string()
    }
}

/// Map one server message to a transcript event; `None` for messages that carry nothing
fn parse_message(text: &str) -> Option<Result<TranscriptEvent>> {
    let message: RecognitionMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unparseable recognition message");
            return None;
        }
    };

    if let Some(error) = message.error {
        return Some(Err(Error::transient(COMPONENT, error)));
    }

    message.text.map(|text| {
        Ok(TranscriptEvent {
            text,
            is_final: message.is_final,
        })
    })
}

#[async_trait]
impl RecognitionClient for WsRecognitionClient {
    async fn connect(&self) -> Result<TranscriptStream> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Config(format!("invalid recognition url: {}", e)))?;

        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| Error::Config(format!("invalid recognition api key: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws_stream, _response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(request))
                .await
                .map_err(|_| Error::Timeout(self.config.connect_timeout.as_millis() as u64))?
                .map_err(|e| Error::transient(COMPONENT, e))?;

        let (mut sink, stream) = ws_stream.split();
        sink.send(Message::Text(self.start_message()))
            .await
            .map_err(|e| Error::transient(COMPONENT, e))?;
        *self.sink.lock().await = Some(sink);

        tracing::info!(url = %self.config.url, "Connected to recognition service");

        let events = stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => parse_message(&text),
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Recognition service closed connection");
                    None
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
                Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => None,
                Err(e) => Some(Err(Error::transient(COMPONENT, e))),
            }
        });

        Ok(Box::pin(events))
    }

    async fn send_audio(&self, frame: &AudioFrame) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| Error::transient(COMPONENT, "not connected"))?;
        sink.send(Message::Binary(frame.data.to_vec()))
            .await
            .map_err(|e| Error::transient(COMPONENT, e))
    }

    async fn close(&self) -> Result<()> {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return Ok(());
        };
        let stop = serde_json::json!({ "type": "stop" }).to_string();
        if let Err(e) = sink.send(Message::Text(stop)).await {
            tracing::debug!(error = %e, "Failed to send stop message");
        }
        sink.close().await.map_err(|e| Error::transient(COMPONENT, e))
    }

    fn name(&self) -> &str {
        "websocket"
    }
}
