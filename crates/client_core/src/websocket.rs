use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::{future, SinkExt, StreamExt};
use shared::protocol::{AuthenticationChallenge, WebSocketMessage};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::groups::{RealtimeGroupEventRouter, RouterStats};

pub fn websocket_url(server_url: &str) -> Result<String> {
    let server_url = server_url.trim_end_matches('/');
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(anyhow!("server_url must start with http:// or https://"));
    };
    Ok(format!("{ws_url}/api/v4/websocket"))
}

fn decode_frame(server_url: &str, frame: Message) -> Option<WebSocketMessage> {
    let Message::Text(text) = frame else {
        return None;
    };
    match serde_json::from_str::<WebSocketMessage>(&text) {
        Ok(msg) => Some(msg),
        Err(err) => {
            if text.contains("\"seq_reply\"") {
                debug!(server_url, "realtime: reply frame: {text}");
            } else {
                warn!(server_url, "realtime: invalid event frame: {err}");
            }
            None
        }
    }
}

/// Connects to the server's websocket, authenticates with `token` and feeds
/// every event to `router` on a background task. The task ends when the
/// socket closes or fails and returns the router's counters.
pub async fn spawn_group_event_listener(
    router: Arc<RealtimeGroupEventRouter>,
    server_url: &str,
    token: &str,
) -> Result<JoinHandle<RouterStats>> {
    let ws_url = websocket_url(server_url)?;
    let (ws_stream, _) = connect_async(&ws_url)
        .await
        .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
    let (mut ws_writer, ws_reader) = ws_stream.split();

    let challenge = serde_json::to_string(&AuthenticationChallenge::new(1, token))?;
    ws_writer
        .send(Message::Text(challenge))
        .await
        .context("failed to send websocket authentication challenge")?;
    info!(server_url, "realtime: websocket connected");

    let server_url = server_url.to_string();
    Ok(tokio::spawn(async move {
        let reader_url = server_url.clone();
        let decode_url = server_url.clone();
        let events = ws_reader
            .take_while(move |frame| {
                let keep = match frame {
                    Ok(Message::Close(_)) => false,
                    Ok(_) => true,
                    Err(err) => {
                        warn!(server_url = %reader_url, "realtime: websocket receive failed: {err}");
                        false
                    }
                };
                future::ready(keep)
            })
            .filter_map(move |frame| {
                future::ready(frame.ok().and_then(|frame| decode_frame(&decode_url, frame)))
            });

        let stats = router.run(&server_url, events).await;
        drop(ws_writer);
        info!(
            %server_url,
            applied = stats.applied,
            dropped = stats.dropped,
            "realtime: websocket closed"
        );
        stats
    }))
}

#[cfg(test)]
#[path = "tests/websocket_tests.rs"]
mod tests;
