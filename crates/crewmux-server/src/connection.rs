use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crewmux_protocol::{ErrorCode, Event, Request, Response, SessionName};
use libcrewmux::{AssignTaskSpec, CrewmuxError, ScheduleSpec};

use crate::server::SharedDaemon;

type SharedWriter = Arc<Mutex<tokio::net::unix::OwnedWriteHalf>>;

/// Per-client subscription bookkeeping. One live subscription per session;
/// a new subscribe for the same session replaces the old forwarder.
struct ClientState {
    subscriptions: HashMap<SessionName, CancellationToken>,
    task_events: Option<CancellationToken>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            task_events: None,
        }
    }
}

/// Handle a single client connection.
pub async fn handle_client(stream: UnixStream, daemon: SharedDaemon) {
    let (reader, writer) = stream.into_split();
    let reader = BufReader::new(reader);
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    let client_state = Arc::new(Mutex::new(ClientState::new()));

    let mut lines = reader.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("client disconnected");
                break;
            }
            Err(e) => {
                error!("read error: {e}");
                break;
            }
        };

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = Response::Error {
                    message: format!("invalid request: {e}"),
                    code: ErrorCode::InvalidRequest,
                };
                let mut w = writer.lock().await;
                let _ = write_response(&mut w, &resp).await;
                continue;
            }
        };

        // Subscribe writes its own ack so catch-up events follow it in order.
        if let Some(response) = handle_request(request, &daemon, &writer, &client_state).await {
            let mut w = writer.lock().await;
            if let Err(e) = write_response(&mut w, &response).await {
                error!("write error: {e}");
                break;
            }
        }
    }

    // Stop every forwarder this client owned.
    let mut cs = client_state.lock().await;
    for (_, token) in cs.subscriptions.drain() {
        token.cancel();
    }
    if let Some(token) = cs.task_events.take() {
        token.cancel();
    }
}

async fn handle_request(
    request: Request,
    daemon: &SharedDaemon,
    writer: &SharedWriter,
    client_state: &Arc<Mutex<ClientState>>,
) -> Option<Response> {
    Some(match request {
        Request::CreateSession {
            session_name,
            role,
            exec,
            args,
            cwd,
            window_label,
            runtime,
        } => {
            let mut config =
                libcrewmux::CreateSessionConfig::new(session_name, role, exec);
            config.args = args;
            config.cwd = cwd;
            config.window_label = window_label;
            config.runtime = runtime;
            match daemon.registry.create_session(config).await {
                Ok(result) => Response::Ok {
                    data: Some(serde_json::to_value(&result).unwrap_or_default()),
                },
                Err(e) => error_response(&e),
            }
        }

        Request::CheckHealth {
            session_name,
            probe_timeout_ms,
        } => {
            let timeout = probe_timeout_ms.map(Duration::from_millis);
            let report = daemon.registry.check_health(&session_name, timeout).await;
            Response::Ok {
                data: Some(serde_json::to_value(&report).unwrap_or_default()),
            }
        }

        Request::TerminateSession { session_name } => {
            let result = daemon.registry.terminate_session(&session_name).await;
            Response::Ok {
                data: Some(serde_json::to_value(&result).unwrap_or_default()),
            }
        }

        Request::SendMessage { session_name, text } => {
            let result = daemon
                .registry
                .send_message_to_agent(&session_name, &text)
                .await;
            Response::Ok {
                data: Some(serde_json::to_value(&result).unwrap_or_default()),
            }
        }

        Request::SendKey { session_name, key } => {
            let result = daemon.registry.send_key_to_agent(&session_name, &key).await;
            Response::Ok {
                data: Some(serde_json::to_value(&result).unwrap_or_default()),
            }
        }

        Request::SendInput { session_name, data } => {
            let result = daemon.registry.send_raw_to_agent(&session_name, data).await;
            Response::Ok {
                data: Some(serde_json::to_value(&result).unwrap_or_default()),
            }
        }

        Request::SessionList => {
            let sessions = daemon.registry.list_sessions().await;
            Response::Ok {
                data: Some(serde_json::to_value(&sessions).unwrap_or_default()),
            }
        }

        Request::ScreenContents { session_name } => {
            match daemon.registry.screen_contents(&session_name).await {
                Ok(screen) => Response::Ok {
                    data: Some(serde_json::json!({ "screen": screen })),
                },
                Err(e) => error_response(&e),
            }
        }

        Request::ReportStatus {
            session_name,
            working_status,
        } => {
            let result = daemon
                .registry
                .report_working_status(&session_name, working_status)
                .await;
            Response::Ok {
                data: Some(serde_json::to_value(&result).unwrap_or_default()),
            }
        }

        Request::AssignTask {
            project_id,
            project_dir,
            milestone,
            file_name,
            task_name,
            target_role,
            session_name,
        } => {
            let spec = AssignTaskSpec {
                project_id,
                project_dir,
                milestone,
                file_name,
                task_name,
                target_role,
                session_name,
            };
            match daemon.tasks.assign(spec).await {
                Ok(task) => Response::Ok {
                    data: Some(serde_json::to_value(&task).unwrap_or_default()),
                },
                Err(e) => error_response(&e),
            }
        }

        Request::UpdateTaskStatus {
            task_id,
            status,
            block_reason,
        } => match daemon.tasks.update_status(&task_id, status, block_reason).await {
            Ok(()) => Response::Ok { data: None },
            Err(e) => error_response(&e),
        },

        Request::ListTasks => {
            let tasks = daemon.tasks.list_tasks().await;
            Response::Ok {
                data: Some(serde_json::to_value(&tasks).unwrap_or_default()),
            }
        }

        Request::RunRecovery => {
            let report = daemon.tasks.recover_stalled().await;
            Response::Ok {
                data: Some(serde_json::to_value(&report).unwrap_or_default()),
            }
        }

        Request::ScheduleMessage {
            name,
            target_session,
            target_project,
            message,
            delay_amount,
            delay_unit,
            is_recurring,
        } => {
            let spec = ScheduleSpec {
                name,
                target_session,
                target_project,
                message,
                delay_amount,
                delay_unit,
                is_recurring,
            };
            match daemon.schedules.schedule(spec).await {
                Ok(schedule) => Response::Ok {
                    data: Some(serde_json::to_value(&schedule).unwrap_or_default()),
                },
                Err(e) => error_response(&e),
            }
        }

        Request::CancelSchedule { id } => match daemon.schedules.cancel(&id).await {
            Ok(()) => Response::Ok { data: None },
            Err(e) => error_response(&e),
        },

        Request::ListSchedules => {
            let schedules = daemon.schedules.list_schedules().await;
            let projects = daemon.schedules.list_projects().await;
            Response::Ok {
                data: Some(serde_json::json!({
                    "schedules": schedules,
                    "projects": projects,
                })),
            }
        }

        Request::StartProject {
            project_id,
            pm_session,
        } => match daemon.schedules.start_project(&project_id, &pm_session).await {
            Ok(project) => Response::Ok {
                data: Some(serde_json::to_value(&project).unwrap_or_default()),
            },
            Err(e) => error_response(&e),
        },

        Request::StopProject { project_id } => {
            match daemon.schedules.stop_project(&project_id).await {
                Ok(()) => Response::Ok { data: None },
                Err(e) => error_response(&e),
            }
        }

        Request::Subscribe {
            session_name,
            last_seq,
        } => {
            let (catchup, rx) = match daemon.registry.subscribe(&session_name, last_seq).await {
                Ok(pair) => pair,
                Err(e) => return Some(error_response(&e)),
            };

            let token = CancellationToken::new();
            {
                let mut cs = client_state.lock().await;
                if let Some(old) = cs.subscriptions.insert(session_name.clone(), token.clone()) {
                    old.cancel();
                }
                // First subscription also starts the task event forwarder.
                if cs.task_events.is_none() {
                    let task_token = CancellationToken::new();
                    cs.task_events = Some(task_token.clone());
                    let task_rx = daemon.tasks.subscribe_events();
                    let writer_clone = Arc::clone(writer);
                    tokio::spawn(async move {
                        forward_events(task_rx, writer_clone, task_token, None).await;
                    });
                }
            }

            // Ack first so the client can pair request and response, then the
            // catch-up chunks, then live events from the forwarder.
            {
                let mut w = writer.lock().await;
                let ack = Response::Ok {
                    data: Some(serde_json::json!({
                        "catchup_count": catchup.len(),
                    })),
                };
                let _ = write_response(&mut w, &ack).await;
                for chunk in &catchup {
                    let event = Response::Event(Event::Output {
                        session_name: session_name.clone(),
                        seq: chunk.seq,
                        data: chunk.data.clone(),
                    });
                    let _ = write_response(&mut w, &event).await;
                }
            }

            // The receiver was registered before the catch-up snapshot, so
            // chunks up to the snapshot's newest seq may replay on it.
            let horizon = catchup
                .last()
                .map(|chunk| (session_name.clone(), chunk.seq));
            let writer_clone = Arc::clone(writer);
            tokio::spawn(async move {
                forward_events(rx, writer_clone, token, horizon).await;
            });

            return None;
        }

        Request::Unsubscribe { session_name } => {
            let mut cs = client_state.lock().await;
            if let Some(token) = cs.subscriptions.remove(&session_name) {
                token.cancel();
            }
            Response::Ok { data: None }
        }
    })
}

fn error_response(err: &CrewmuxError) -> Response {
    let (code, message) = err.to_error_code();
    Response::Error { message, code }
}

/// True for output chunks the client already received as catch-up.
fn already_delivered(event: &Event, horizon: Option<&(SessionName, u64)>) -> bool {
    let (Event::Output {
        session_name, seq, ..
    }, Some((horizon_session, horizon_seq))) = (event, horizon)
    else {
        return false;
    };
    session_name == horizon_session && *seq <= *horizon_seq
}

/// Forward broadcast events to a client's write stream until cancelled.
async fn forward_events(
    mut rx: broadcast::Receiver<Event>,
    writer: SharedWriter,
    token: CancellationToken,
    horizon: Option<(SessionName, u64)>,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            recv = rx.recv() => recv,
        };
        match event {
            Ok(event) => {
                if already_delivered(&event, horizon.as_ref()) {
                    continue;
                }
                let resp = Response::Event(event);
                let mut w = writer.lock().await;
                if write_response(&mut w, &resp).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "subscriber lagged");
                // Client missed events; it can re-subscribe with last_seq.
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("broadcast channel closed");
                break;
            }
        }
    }
}

async fn write_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &Response,
) -> Result<(), std::io::Error> {
    let json = serde_json::to_string(response)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
