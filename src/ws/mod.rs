// ABOUTME: WebSocket connection hub - one task and exactly one terminal proxy per connection
// Owns message dispatch per §4.9; terminal bytes flow proxy -> connection -> socket without touching the registry

pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TerminalMode;
use crate::error::{AppError, WireError};
use crate::registry::RegistryEvent;
use crate::state::AppState;
use crate::terminal::pipe_pane::PipePaneBackend;
use crate::terminal::pty::PtyBackend;
use crate::terminal::ssh::SshBackend;
use crate::terminal::{ProxyBackend, TerminalProxy};

use protocol::{decode_terminal_bytes, encode_terminal_bytes, ClientMessage, ServerMessage};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_PONGS: u32 = 2;
const PROXY_START_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The single terminal proxy a connection may hold at a time (§5: "one
/// terminal-proxy task per connection"). Re-attaching to a different session
/// on the same host reuses `proxy` via `switch_to`; attaching to a session on
/// a different host disposes it and rebuilds a fresh one for that host,
/// since the backend (PTY/pipe-pane vs SSH) is tied to a single host.
struct ActiveProxy {
    proxy: Arc<TerminalProxy>,
    session_id: String,
    tmux_target: String,
    host: Option<String>,
    /// Session id to stamp onto forwarded `terminal-output` frames; updated
    /// on every switch so output is labeled with whichever session is
    /// currently attached.
    current_label: Arc<RwLock<String>>,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut registry_events = state.registry.subscribe();
    let mut shutdown_rx = state.shutdown.subscribe();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(256);
    let mut proxy: Option<ActiveProxy> = None;

    let snapshot = state.registry.snapshot().await;
    let _ = out_tx.send(ServerMessage::Sessions { sessions: snapshot }).await;
    let (active, inactive) = state.registry.agent_sessions_partition().await;
    let _ = out_tx.send(ServerMessage::AgentSessions { active, inactive }).await;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut missed_pongs: u32 = 0;

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&text, &state, &connection_id, &mut proxy, &out_tx).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            evt = registry_events.recv() => {
                match evt {
                    Ok(event) => {
                        if let Some(msg) = translate_event(event) {
                            if ws_tx.send(Message::Text(serde_json::to_string(&msg).unwrap())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            Some(out) = out_rx.recv() => {
                if ws_tx.send(Message::Text(serde_json::to_string(&out).unwrap())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                missed_pongs += 1;
                if missed_pongs > MAX_MISSED_PONGS {
                    debug!(connection_id = %connection_id, "heartbeat timed out, closing");
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(connection_id = %connection_id, "shutdown signal received, closing");
                break;
            }
        }
    }

    if let Some(active) = proxy.take() {
        active.proxy.dispose().await;
    }
    info!(connection_id = %connection_id, "websocket disconnected");
}

fn translate_event(event: RegistryEvent) -> Option<ServerMessage> {
    match event {
        RegistryEvent::Snapshot(sessions) => Some(ServerMessage::Sessions { sessions }),
        RegistryEvent::SessionCreated(session) => Some(ServerMessage::SessionCreated { session }),
        RegistryEvent::SessionUpdate(session) => Some(ServerMessage::SessionUpdate { session }),
        RegistryEvent::SessionRemoved { session_id } => Some(ServerMessage::SessionRemoved { session_id }),
        RegistryEvent::SessionOrphaned(session) => Some(ServerMessage::SessionOrphaned { session }),
        RegistryEvent::AgentSessionsPartition { active, inactive } => {
            Some(ServerMessage::AgentSessions { active, inactive })
        }
    }
}

async fn dispatch(
    text: &str,
    state: &Arc<AppState>,
    connection_id: &str,
    proxy: &mut Option<ActiveProxy>,
    out_tx: &mpsc::Sender<ServerMessage>,
) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, raw = text, "dropping unparsable websocket frame");
            return;
        }
    };

    match msg {
        ClientMessage::TerminalAttach { session_id, tmux_target, cols, rows } => {
            handle_attach(state, connection_id, proxy, out_tx, session_id, tmux_target, cols, rows).await;
        }
        ClientMessage::TerminalDetach { session_id } => {
            if let Some(active) = proxy.as_ref().filter(|a| a.session_id == session_id) {
                active.proxy.suppress_output(true);
            }
        }
        ClientMessage::TerminalInput { session_id, data } => {
            if let Some(active) = proxy.as_ref().filter(|a| a.session_id == session_id) {
                let bytes = decode_terminal_bytes(&data);
                let _ = active.proxy.write(&bytes).await;
            }
        }
        ClientMessage::TerminalResize { session_id, cols, rows } => {
            if let Some(active) = proxy.as_ref().filter(|a| a.session_id == session_id) {
                let _ = active.proxy.resize(cols, rows).await;
            }
        }
        ClientMessage::SessionCreate { project_path, command } => {
            match state.registry.create_session(project_path, command).await {
                Ok(session) => {
                    let _ = out_tx.send(ServerMessage::SessionCreated { session }).await;
                }
                Err(err) => {
                    let _ = out_tx.send(ServerMessage::Error { error: WireError::from(&err) }).await;
                }
            }
        }
        ClientMessage::SessionKill { session_id } => match state.registry.kill_session(session_id.clone()).await {
            Ok(()) => {}
            Err(_) => {
                let _ = out_tx
                    .send(ServerMessage::KillFailed {
                        session_id,
                        message: "window not found".to_string(),
                    })
                    .await;
            }
        },
        ClientMessage::SessionRename { session_id, name } => {
            let _ = state.registry.rename_session(session_id, name).await;
        }
        ClientMessage::SessionRefresh => {
            state.registry.refresh_now().await;
        }
        ClientMessage::SessionResume { session_id } => match state.resume.resume(&session_id).await {
            Ok(session) => {
                let _ = out_tx
                    .send(ServerMessage::SessionResumeResult { ok: true, session: Some(session), error: None })
                    .await;
            }
            Err(err) => {
                let _ = out_tx
                    .send(ServerMessage::SessionResumeResult {
                        ok: false,
                        session: None,
                        error: Some(WireError::from(&err)),
                    })
                    .await;
            }
        },
        ClientMessage::SessionPin { session_id, is_pinned } => {
            if state.registry.set_pinned(session_id.clone(), is_pinned).await.is_ok() {
                let _ = out_tx.send(ServerMessage::SessionPinResult { session_id, is_pinned }).await;
            }
        }
        ClientMessage::TmuxCheckCopyMode { session_id } => {
            let active = tmux_copy_mode_active(state, proxy, &session_id).await;
            let _ = out_tx
                .send(ServerMessage::TmuxCopyModeStatus { session_id, active })
                .await;
        }
        ClientMessage::TmuxCancelCopyMode { session_id } => {
            if let Some(active) = proxy.as_ref().filter(|a| a.session_id == session_id) {
                let _ = active.proxy.write(b"q").await;
            }
        }
    }
}

async fn tmux_copy_mode_active(state: &Arc<AppState>, proxy: &Option<ActiveProxy>, session_id: &str) -> bool {
    let Some(active) = proxy.as_ref().filter(|a| a.session_id == session_id) else {
        return false;
    };
    let adapter = state.adapter_for(active.host.as_deref());
    adapter
        .display_message(&active.tmux_target, "#{pane_in_mode}")
        .await
        .map(|out| out.trim() == "1")
        .unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
async fn handle_attach(
    state: &Arc<AppState>,
    connection_id: &str,
    proxy: &mut Option<ActiveProxy>,
    out_tx: &mpsc::Sender<ServerMessage>,
    session_id: String,
    tmux_target: Option<String>,
    cols: u16,
    rows: u16,
) {
    let sessions = state.registry.snapshot().await;
    let session = sessions.iter().find(|s| s.id == session_id);
    let target = tmux_target
        .or_else(|| session.map(|s| s.tmux_window.clone()))
        .unwrap_or_default();

    if target.is_empty() {
        let _ = out_tx
            .send(ServerMessage::TerminalError {
                session_id,
                error: WireError::from(&AppError::InvalidWindow("no tmux target".into())),
            })
            .await;
        return;
    }

    let host = session.and_then(|s| s.host.clone());

    // A proxy already exists for this connection: if it's attached to the
    // same host, coalesce onto the same proxy via `switch_to`. A different
    // host needs a different backend, so dispose the old proxy first - only
    // one terminal-proxy task ever lives for this connection at a time.
    let reuse = match proxy.as_ref() {
        Some(active) if active.host == host => true,
        Some(_) => {
            let stale = proxy.take().unwrap();
            stale.proxy.dispose().await;
            false
        }
        None => false,
    };

    if reuse {
        let active = proxy.as_mut().unwrap();
        active.session_id = session_id.clone();
        active.tmux_target = target.clone();
        *active.current_label.write().await = session_id.clone();

        let result = active.proxy.switch_to(target).await.map(|_| ());
        match result {
            Ok(()) => {
                let _ = out_tx.send(ServerMessage::TerminalReady { session_id }).await;
            }
            Err(err) => {
                let _ = out_tx
                    .send(ServerMessage::TerminalError { session_id, error: WireError::from(&err) })
                    .await;
            }
        }
        return;
    }

    let backend = build_backend(state, connection_id, &session_id, host.as_deref());
    let terminal_proxy = Arc::new(TerminalProxy::new(backend, PROXY_START_TIMEOUT));
    let current_label = Arc::new(RwLock::new(session_id.clone()));

    let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<u8>>(256);
    let forward_tx = out_tx.clone();
    let forward_label = current_label.clone();
    tokio::spawn(async move {
        while let Some(chunk) = raw_rx.recv().await {
            let data = encode_terminal_bytes(&chunk);
            let session_id = forward_label.read().await.clone();
            if forward_tx.send(ServerMessage::TerminalOutput { session_id, data }).await.is_err() {
                break;
            }
        }
    });

    let start_result = terminal_proxy.start(cols, rows, raw_tx).await;
    *proxy = Some(ActiveProxy {
        proxy: terminal_proxy,
        session_id: session_id.clone(),
        tmux_target: target,
        host,
        current_label,
    });

    match start_result {
        Ok(()) => {
            let _ = out_tx.send(ServerMessage::TerminalReady { session_id }).await;
        }
        Err(err) => {
            let _ = out_tx
                .send(ServerMessage::TerminalError { session_id, error: WireError::from(&err) })
                .await;
        }
    }
}

fn build_backend(
    state: &Arc<AppState>,
    connection_id: &str,
    session_id: &str,
    host: Option<&str>,
) -> Arc<dyn ProxyBackend> {
    let helper_session = format!("agentboard-ws-{connection_id}-{session_id}");
    let base_session = state.config.tmux_session.clone();

    if let Some(host) = host {
        let adapter = state.adapter_for(Some(host));
        return Arc::new(SshBackend::new(
            adapter,
            host.to_string(),
            state.config.remote_ssh_opts.clone(),
            helper_session,
            state.config.remote_timeout,
        ));
    }

    let adapter = state.local_adapter.clone();
    match state.config.terminal_mode {
        TerminalMode::Pty => Arc::new(PtyBackend::new(adapter, base_session, helper_session, Duration::from_secs(2))),
        TerminalMode::PipePane => Arc::new(PipePaneBackend::new(adapter, base_session, helper_session)),
        TerminalMode::Auto => {
            if std::io::IsTerminal::is_terminal(&std::io::stdin()) {
                Arc::new(PtyBackend::new(adapter, base_session, helper_session, Duration::from_secs(2)))
            } else {
                Arc::new(PipePaneBackend::new(adapter, base_session, helper_session))
            }
        }
    }
}
