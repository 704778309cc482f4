use crate::AppState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use script_hub_core::{
    envelope::CLOSE_GOING_AWAY, CloseSignal, ConnId, HubError, Outbound, TransportHandle,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket, remote))
}

/// One task per agent socket: a reader loop feeding the lifecycle, a writer
/// task draining the outbound queue, and an optional pinger.
pub async fn handle_socket(state: AppState, socket: WebSocket, remote: SocketAddr) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (mut conn, rx) = state.hub.accept();
    let conn_id = conn.id();
    let handle = conn.handle().clone();
    info!(event = "socket_open", conn_id = conn_id, remote = %remote);

    let mut write_task = tokio::spawn(writer_loop(
        conn_id,
        ws_sender,
        rx,
        handle.close_signal(),
        state.config.write_timeout,
    ));
    let ping_task = start_ping(handle.clone(), state.config.ping_interval);

    let reason = loop {
        let next = tokio::select! {
            _ = handle.closed() => break "closed_by_hub",
            next = ws_receiver.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                warn!(event = "read_error", conn_id = conn_id, error = %err);
                break "read_error";
            }
            None => break "disconnect",
        };
        let data = match msg {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Close(frame) => {
                debug!(event = "client_close", conn_id = conn_id, frame = ?frame);
                break "disconnect";
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if state.config.debug {
            debug!(
                event = "message_received",
                conn_id = conn_id,
                raw = %String::from_utf8_lossy(&data)
            );
        }
        match conn.handle_inbound(&data).await {
            Ok(_) => {}
            Err(err @ HubError::InternalInvariantViolation(_)) => {
                error!(event = "register_failed", conn_id = conn_id, error = %err);
            }
            Err(err) => {
                warn!(
                    event = "message_invalid",
                    conn_id = conn_id,
                    code = err.code(),
                    error = %err
                );
            }
        }
    };

    if let Some(task) = ping_task {
        task.abort();
    }
    conn.close(reason).await;
    drop(handle);
    if tokio::time::timeout(state.config.write_timeout, &mut write_task)
        .await
        .is_err()
    {
        write_task.abort();
    }
}

/// Drains the outbound queue into the socket. Once the connection starts
/// closing, frames already queued are flushed and the socket is closed.
async fn writer_loop(
    conn_id: ConnId,
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    signal: CloseSignal,
    write_timeout: Duration,
) {
    let mut draining = false;
    loop {
        let frame = if draining {
            match rx.try_recv() {
                Ok(frame) => frame,
                Err(_) => break,
            }
        } else {
            tokio::select! {
                biased;
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = signal.closed() => {
                    draining = true;
                    continue;
                }
            }
        };
        let (msg, last) = match frame {
            Outbound::Text(text) => (Message::Text(text), false),
            Outbound::Ping => (Message::Ping(Vec::new()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };
        match tokio::time::timeout(write_timeout, ws_sender.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(event = "write_error", conn_id = conn_id, error = %err);
                signal.mark();
                return;
            }
            Err(_) => {
                warn!(event = "write_timeout", conn_id = conn_id);
                signal.mark();
                return;
            }
        }
        if last {
            break;
        }
    }
    let _ = tokio::time::timeout(write_timeout, ws_sender.close()).await;
}

fn start_ping(handle: Arc<TransportHandle>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = handle.send(Outbound::Ping) {
                warn!(event = "ping_failed", conn_id = handle.conn_id(), error = %err);
                handle.close(CLOSE_GOING_AWAY, "ping_failed");
                return;
            }
        }
    }))
}
