use anyhow::Result;
use rocket::futures::{SinkExt, StreamExt};
use rocket::{get, State};
use rocket_ws::stream::DuplexStream;
use rocket_ws::{Channel, Message, WebSocket};
use serde_json::json;
use tracing::{error, info, warn};

use super::{ChatSurface, DocentSession, UiElement};

/// Outgoing JSON frames on a single WebSocket connection
pub struct WsSurface<'a> {
    stream: &'a mut DuplexStream,
}

impl<'a> WsSurface<'a> {
    pub fn new(stream: &'a mut DuplexStream) -> Self {
        Self { stream }
    }

    async fn send_json(&mut self, frame: serde_json::Value) -> Result<()> {
        self.stream.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    pub async fn send_error(&mut self, message: &str) -> Result<()> {
        self.send_json(json!({ "type": "error", "message": message }))
            .await
    }
}

#[async_trait::async_trait]
impl<'a> ChatSurface for WsSurface<'a> {
    async fn set_sidebar(&mut self, title: &str, elements: Vec<UiElement>) -> Result<()> {
        self.send_json(json!({
            "type": "sidebar",
            "title": title,
            "elements": elements,
        }))
        .await
    }

    async fn send_message(&mut self, content: &str, elements: Vec<UiElement>) -> Result<()> {
        self.send_json(json!({
            "type": "message",
            "author": "assistant",
            "content": content,
            "elements": elements,
        }))
        .await
    }
}

/// Accepts `{"message": "..."}` or a bare string.
pub fn parse_user_message(text: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(json) => json["message"].as_str().unwrap_or(text).to_string(),
        Err(_) => text.to_string(),
    }
}

/// WebSocket chat endpoint: one docent session per connection
#[get("/chat?<museum>")]
pub fn chat_websocket(
    ws: WebSocket,
    museum: Option<String>,
    state: &State<crate::server::AppState>,
) -> Channel<'static> {
    let museum = state.museums.get(museum.as_deref());
    let llm = state.llm_provider.clone();
    let images = state.images.clone();
    let temperature = state.temperature;

    ws.channel(move |mut stream| {
        Box::pin(async move {
            let mut surface = WsSurface::new(&mut stream);

            let museum = match museum {
                Ok(m) => m,
                Err(e) => {
                    warn!("WebSocket rejected: {}", e);
                    let _ = surface.send_error(&e.to_string()).await;
                    return Ok(());
                }
            };

            let mut session = DocentSession::new(museum, llm, images).with_temperature(temperature);
            info!("WebSocket connected: session {} ({})", session.id(), session.museum());

            let _ = surface
                .send_json(json!({
                    "type": "session",
                    "id": session.id().to_string(),
                    "museum": session.museum(),
                }))
                .await;

            if let Err(e) = session.on_chat_start(&mut surface).await {
                error!("session {} failed to start: {:#}", session.id(), e);
                let _ = surface.send_error(&format!("{:#}", e)).await;
                return Ok(());
            }

            // Handle incoming messages
            while let Some(message) = surface.stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let user_message = parse_user_message(&text);
                        if user_message.trim().is_empty() {
                            continue;
                        }

                        if let Err(e) = session.on_message(&user_message, &mut surface).await {
                            error!("session {} message failed: {:#}", session.id(), e);
                            if surface.send_error(&format!("{:#}", e)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket closed for session {}", session.id());
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_from_json_or_text() {
        assert_eq!(parse_user_message(r#"{"message":"Who painted it?"}"#), "Who painted it?");
        assert_eq!(parse_user_message("plain words"), "plain words");
        assert_eq!(parse_user_message(r#"{"other":1}"#), r#"{"other":1}"#);
    }
}
