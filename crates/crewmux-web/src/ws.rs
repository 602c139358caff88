use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crewmux_protocol::{
    AgentStatus, Event, HealthReport, Request, Response as DaemonResponse, SessionName,
};

use crate::client::CrewmuxClient;
use crate::input_filter::strip_terminal_responses;
use crate::ws_protocol::{
    decode_binary_frame, encode_binary_frame, WsClientMessage, WsServerMessage,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub socket_path: PathBuf,
    /// Re-check interval while a subscribed session is still activating.
    pub pending_retry: Duration,
    /// Give up on an activating session after this long.
    pub pending_deadline: Duration,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one observer connection.
///
/// Architecture mirrors the daemon side: one daemon connection per
/// subscription, a central send task writing to the WS, and the recv loop
/// managing the single active subscription. Subscribing to a second session
/// tears the first forwarder down.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Message>(256);
    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // At most one live subscription per observer connection.
    let mut subscription: Option<(SessionName, tokio::task::JoinHandle<()>)> = None;

    while let Some(msg_result) = ws_receiver.next().await {
        let msg = match msg_result {
            Ok(m) => m,
            Err(e) => {
                debug!("ws read error: {e}");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let client_msg: WsClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        send_control(
                            &tx,
                            &WsServerMessage::Error {
                                message: format!("invalid message: {e}"),
                                session_name: None,
                            },
                        )
                        .await;
                        continue;
                    }
                };

                match client_msg {
                    WsClientMessage::Subscribe {
                        session_name,
                        last_seq,
                    } => {
                        if let Some((old_name, handle)) = subscription.take() {
                            handle.abort();
                            send_control(
                                &tx,
                                &WsServerMessage::Unsubscribed {
                                    session_name: old_name,
                                },
                            )
                            .await;
                        }

                        let tx_clone = tx.clone();
                        let state_clone = Arc::clone(&state);
                        let name = session_name.clone();
                        let handle = tokio::spawn(async move {
                            run_subscription(state_clone, name, last_seq, tx_clone).await;
                        });
                        subscription = Some((session_name, handle));
                    }

                    WsClientMessage::Unsubscribe { session_name } => {
                        if let Some((name, handle)) = subscription.take() {
                            if name == session_name {
                                handle.abort();
                            } else {
                                subscription = Some((name, handle));
                            }
                        }
                        send_control(&tx, &WsServerMessage::Unsubscribed { session_name }).await;
                    }

                    WsClientMessage::Input { session_name, data } => {
                        match STANDARD.decode(&data) {
                            Ok(bytes) => {
                                forward_input(&state, &session_name, &bytes, &tx).await;
                            }
                            Err(e) => {
                                send_control(
                                    &tx,
                                    &WsServerMessage::Error {
                                        message: format!("invalid base64: {e}"),
                                        session_name: Some(session_name),
                                    },
                                )
                                .await;
                            }
                        }
                    }
                }
            }

            Message::Binary(data) => {
                // Binary frame: observer keystrokes for a session.
                if let Some((session_name, input_data)) = decode_binary_frame(&data) {
                    forward_input(&state, session_name, input_data, &tx).await;
                }
            }

            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some((_, handle)) = subscription {
        handle.abort();
    }
    drop(tx);
    let _ = write_task.await;
    debug!("ws connection closed");
}

/// Filter observer input and hand it to the daemon as raw session input.
/// Keystrokes that cannot be delivered are reported back to the observer,
/// never silently dropped.
async fn forward_input(
    state: &AppState,
    session_name: &str,
    bytes: &[u8],
    tx: &mpsc::Sender<Message>,
) {
    let filtered = strip_terminal_responses(bytes);
    if filtered.is_empty() {
        return;
    }
    if let Err(e) = deliver_input(state, session_name, filtered).await {
        send_control(
            tx,
            &WsServerMessage::Error {
                message: format!("input delivery failed: {e}"),
                session_name: Some(session_name.to_string()),
            },
        )
        .await;
    }
}

async fn deliver_input(state: &AppState, session_name: &str, data: Vec<u8>) -> anyhow::Result<()> {
    let mut client = CrewmuxClient::connect(Some(&state.socket_path)).await?;
    let result = client
        .request_data(&Request::SendInput {
            session_name: session_name.to_string(),
            data,
        })
        .await?;
    // SendInput replies Ok carrying an ActionResult; surface its failures.
    if let Some(value) = &result {
        if value.get("success").and_then(|v| v.as_bool()) == Some(false) {
            let reason = value
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("rejected by server");
            anyhow::bail!("{reason}");
        }
    }
    Ok(())
}

/// One subscription's lifecycle: pending retries while the agent activates,
/// initial screen snapshot once active, then live output forwarding.
async fn run_subscription(
    state: Arc<AppState>,
    session_name: SessionName,
    last_seq: Option<u64>,
    tx: mpsc::Sender<Message>,
) {
    let mut client = match CrewmuxClient::connect(Some(&state.socket_path)).await {
        Ok(c) => c,
        Err(e) => {
            send_control(
                &tx,
                &WsServerMessage::Error {
                    message: format!("server connection failed: {e}"),
                    session_name: Some(session_name),
                },
            )
            .await;
            return;
        }
    };

    let deadline = Instant::now() + state.pending_deadline;
    loop {
        let report = match check_health(&mut client, &session_name).await {
            Ok(report) => report,
            Err(e) => {
                send_control(
                    &tx,
                    &WsServerMessage::Error {
                        message: format!("health check failed: {e}"),
                        session_name: Some(session_name),
                    },
                )
                .await;
                return;
            }
        };

        if !report.running {
            send_control(&tx, &WsServerMessage::SessionNotFound { session_name }).await;
            return;
        }
        if report.status == AgentStatus::Active {
            break;
        }
        if Instant::now() >= deadline {
            send_control(
                &tx,
                &WsServerMessage::Error {
                    message: format!("session {session_name} did not become active in time"),
                    session_name: Some(session_name),
                },
            )
            .await;
            return;
        }

        send_control(
            &tx,
            &WsServerMessage::Pending {
                session_name: session_name.clone(),
                retry_ms: state.pending_retry.as_millis() as u64,
            },
        )
        .await;
        tokio::time::sleep(state.pending_retry).await;
    }

    let initial_state = match screen_contents(&mut client, &session_name).await {
        Ok(screen) => screen,
        Err(e) => {
            send_control(
                &tx,
                &WsServerMessage::Error {
                    message: format!("screen snapshot failed: {e}"),
                    session_name: Some(session_name),
                },
            )
            .await;
            return;
        }
    };

    let catchup_count = match client
        .request(&Request::Subscribe {
            session_name: session_name.clone(),
            last_seq,
        })
        .await
    {
        Ok(DaemonResponse::Ok { data }) => data
            .as_ref()
            .and_then(|d| d.get("catchup_count"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize,
        Ok(DaemonResponse::Error { message, .. }) => {
            send_control(
                &tx,
                &WsServerMessage::Error {
                    message,
                    session_name: Some(session_name),
                },
            )
            .await;
            return;
        }
        Ok(_) => 0,
        Err(e) => {
            send_control(
                &tx,
                &WsServerMessage::Error {
                    message: format!("subscribe failed: {e}"),
                    session_name: Some(session_name),
                },
            )
            .await;
            return;
        }
    };

    send_control(
        &tx,
        &WsServerMessage::Subscribed {
            session_name: session_name.clone(),
            catchup_count,
            initial_terminal_state: initial_state,
        },
    )
    .await;

    forward_session_events(client, session_name, tx).await;
}

async fn check_health(
    client: &mut CrewmuxClient,
    session_name: &str,
) -> anyhow::Result<HealthReport> {
    let data = client
        .request_data(&Request::CheckHealth {
            session_name: session_name.to_string(),
            probe_timeout_ms: Some(500),
        })
        .await?;
    let value = data.ok_or_else(|| anyhow::anyhow!("empty health response"))?;
    Ok(serde_json::from_value(value)?)
}

async fn screen_contents(
    client: &mut CrewmuxClient,
    session_name: &str,
) -> anyhow::Result<String> {
    let data = client
        .request_data(&Request::ScreenContents {
            session_name: session_name.to_string(),
        })
        .await?;
    Ok(data
        .as_ref()
        .and_then(|v| v.get("screen"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string())
}

/// Forward daemon events for one subscription to the WebSocket send channel.
async fn forward_session_events(
    mut client: CrewmuxClient,
    session_name: SessionName,
    tx: mpsc::Sender<Message>,
) {
    loop {
        let line = match client.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(session = %session_name, "server connection closed");
                break;
            }
            Err(e) => {
                warn!(session = %session_name, error = %e, "read error");
                break;
            }
        };

        let resp: DaemonResponse = match serde_json::from_str(line.trim()) {
            Ok(r) => r,
            Err(e) => {
                warn!(session = %session_name, error = %e, "parse error");
                continue;
            }
        };

        match resp {
            DaemonResponse::Event(Event::Output {
                session_name: name,
                data,
                ..
            }) => {
                // Binary frames: xterm-style clients consume raw bytes.
                let frame = encode_binary_frame(&name, &data);
                if tx.send(Message::binary(frame)).await.is_err() {
                    break;
                }
            }
            DaemonResponse::Event(event) => {
                let msg = WsServerMessage::Event(event);
                if let Ok(json) = serde_json::to_string(&msg) {
                    if tx.send(Message::text(json)).await.is_err() {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
}

async fn send_control(tx: &mpsc::Sender<Message>, msg: &WsServerMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        let _ = tx.send(Message::text(json)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_state() -> AppState {
        AppState {
            socket_path: PathBuf::from("/nonexistent/crewmux.sock"),
            pending_retry: Duration::from_secs(3),
            pending_deadline: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn undeliverable_input_reports_an_error_frame() {
        let state = unreachable_state();
        let (tx, mut rx) = mpsc::channel(8);

        forward_input(&state, "dev-1", b"ls\r", &tx).await;

        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected an error text frame");
        };
        assert!(text.as_str().contains(r#""type":"error""#));
        assert!(text.as_str().contains("input delivery failed"));
        assert!(text.as_str().contains("dev-1"));
    }

    #[tokio::test]
    async fn fully_filtered_input_sends_nothing() {
        let state = unreachable_state();
        let (tx, mut rx) = mpsc::channel(8);

        // A lone device-attributes response is excised entirely, so there is
        // nothing to deliver and nothing to report.
        forward_input(&state, "dev-1", b"\x1b[?1;2c", &tx).await;

        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
