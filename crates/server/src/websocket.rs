//! WebSocket Handler
//!
//! One socket per client. Dialogue events are pushed as JSON text frames;
//! binary frames carry PCM16LE audio into the dialogue; text frames carry
//! commands.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use voice_chat_core::ConversationState;

use crate::state::AppState;

/// Commands a client may send
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Typed utterance
    Text {
        content: String,
        #[serde(default)]
        role_id: Option<String>,
    },
    SetRole {
        role_id: String,
    },
    StartListening,
    StopListening,
    SetSpeechOutput {
        enabled: bool,
    },
    Interrupt,
    Ping,
}

/// Control messages sent besides dialogue events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ready {
        client_id: String,
        state: ConversationState,
        role_id: String,
    },
    Accepted {
        state: ConversationState,
    },
    Error {
        message: String,
    },
    Pong,
}

type SocketSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// WebSocket handler
pub struct WebSocketHandler;

impl WebSocketHandler {
    /// Handle WebSocket upgrade
    pub fn handle(ws: WebSocketUpgrade, state: AppState) -> Response {
        ws.on_upgrade(move |socket| Self::handle_socket(socket, state))
    }

    async fn handle_socket(socket: WebSocket, state: AppState) {
        let client_id = uuid::Uuid::new_v4().to_string();
        let (sender, mut receiver) = socket.split();
        let sender: SocketSender = Arc::new(Mutex::new(sender));

        // Subscribe before announcing so no event falls in between
        let events = state.dialogue.subscribe();

        let ready = ServerMessage::Ready {
            client_id: client_id.clone(),
            state: state.dialogue.state(),
            role_id: state.dialogue.role().id,
        };
        if send_json(&sender, &ready).await.is_err() {
            return;
        }
        tracing::info!(client_id = %client_id, "WebSocket client connected");

        let event_task = tokio::spawn(forward_events(events, sender.clone(), client_id.clone()));

        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    if let Err(e) = state.dialogue.submit_audio(&data) {
                        tracing::warn!(client_id = %client_id, bytes = data.len(), error = %e, "Audio rejected");
                        let _ = send_json(&sender, &ServerMessage::Error { message: e.to_string() }).await;
                    }
                }
                Ok(Message::Text(text)) => {
                    let reply = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(command) => execute(&state, command).await,
                        Err(e) => ServerMessage::Error {
                            message: format!("invalid message: {}", e),
                        },
                    };
                    if send_json(&sender, &reply).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Ping(data)) => {
                    let mut s = sender.lock().await;
                    let _ = s.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(client_id = %client_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }

        event_task.abort();
        tracing::info!(client_id = %client_id, "WebSocket closed");
    }
}

/// Route handler for `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    WebSocketHandler::handle(ws, state)
}

async fn execute(state: &AppState, command: ClientMessage) -> ServerMessage {
    let dialogue = state.dialogue();
    let result = match command {
        ClientMessage::Text { content, role_id } => dialogue.submit_text(content, role_id).await,
        ClientMessage::SetRole { role_id } => dialogue.set_role(role_id).await.map(|_| dialogue.state()),
        ClientMessage::StartListening => dialogue.start_listening().await.map(|_| dialogue.state()),
        ClientMessage::StopListening => {
            dialogue.stop_listening().await;
            Ok(dialogue.state())
        }
        ClientMessage::SetSpeechOutput { enabled } => dialogue.set_speech_output(enabled).await,
        ClientMessage::Interrupt => dialogue.interrupt().await,
        ClientMessage::Ping => return ServerMessage::Pong,
    };
    match result {
        Ok(state) => ServerMessage::Accepted { state },
        Err(e) => ServerMessage::Error { message: e.to_string() },
    }
}

async fn forward_events(
    mut events: broadcast::Receiver<voice_chat_agent::DialogueEvent>,
    sender: SocketSender,
    client_id: String,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if send_json(&sender, &event).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(client_id = %client_id, skipped, "WebSocket client lagging, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send_json<T: Serialize>(sender: &SocketSender, message: &T) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize WebSocket message");
            return Ok(());
        }
    };
    sender.lock().await.send(Message::Text(text)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_router;
    use crate::test_support::test_state;
    use tokio_tungstenite::tungstenite::Message as WsFrame;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"text","content":"你好","role_id":"libai"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Text { role_id: Some(ref id), .. } if id == "libai"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"interrupt"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Interrupt));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"stop_listening"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::StopListening));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"set_speech_output","enabled":false}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SetSpeechOutput { enabled: false }));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[tokio::test]
    async fn test_socket_streams_events() {
        let rig = test_state().await;
        let app = create_router(rig.state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();

        let next_json = |frame: Option<Result<WsFrame, _>>| -> serde_json::Value {
            match frame {
                Some(Ok(WsFrame::Text(text))) => serde_json::from_str(&text).unwrap(),
                other => panic!("unexpected frame {:?}", other),
            }
        };

        let ready = next_json(socket.next().await);
        assert_eq!(ready["type"], "ready");
        assert_eq!(ready["role_id"], "libai");

        socket
            .send(WsFrame::Text(r#"{"type":"text","content":"你好"}"#.into()))
            .await
            .unwrap();

        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(3);
        while tokio::time::Instant::now() < deadline {
            let frame = tokio::time::timeout_at(deadline, socket.next()).await.unwrap();
            let json = next_json(frame);
            let kind = json["type"].as_str().unwrap().to_string();
            let done = kind == "replied";
            seen.push(kind);
            if done {
                break;
            }
        }

        assert!(seen.contains(&"accepted".to_string()));
        assert!(seen.contains(&"utterance_finalized".to_string()));
        assert!(seen.contains(&"replied".to_string()));

        socket
            .send(WsFrame::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();
        loop {
            let json = next_json(socket.next().await);
            if json["type"] == "pong" {
                break;
            }
        }

        rig.state.dialogue.shutdown().await;
    }
}
