use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::protocol::ToolResponse;
use crate::state::AppState;
use crate::ws::manager::{WsRegistration, WsSender};

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsManager`.
///   2. Spawns a sender task that forwards responses to the sink.
///   3. Spawns one task per inbound frame, so a long generation never
///      blocks later calls on the same connection.
///   4. On disconnect, cancels whatever is still polling.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let WsRegistration {
        sender,
        mut receiver,
        cancel,
    } = state.ws_manager.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = receiver.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                spawn_call(&state.dispatcher, text.as_str().to_owned(), &sender, &cancel);
            }
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => spawn_call(&state.dispatcher, text, &sender, &cancel),
                Err(_) => {
                    let error = DispatchError::MalformedPayload("binary frame is not UTF-8".into());
                    let response = ToolResponse::from(error).into_value().to_string();
                    let _ = sender.send(Message::Text(response.into()));
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {
                tracing::trace!(conn_id = %conn_id, "Control frame received");
            }
            Some(Err(e)) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    let open_for = state.ws_manager.remove(&conn_id).await;
    if state.shutdown.is_cancelled() {
        let _ = sender.send(Message::Close(None));
        let _ = tokio::time::timeout(Duration::from_secs(1), send_task).await;
    } else {
        send_task.abort();
    }
    tracing::info!(
        conn_id = %conn_id,
        open_secs = open_for.map(|d| d.as_secs_f64()),
        "WebSocket disconnected",
    );
}

/// Run one tool call on its own task and queue the response frame.
fn spawn_call(
    dispatcher: &Arc<Dispatcher>,
    text: String,
    sender: &WsSender,
    cancel: &CancellationToken,
) {
    let dispatcher = Arc::clone(dispatcher);
    let sender = sender.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move {
        let response = dispatcher.dispatch_text(&text, &cancel).await;
        if sender.send(Message::Text(response.into())).is_err() {
            tracing::debug!("Connection closed before tool response was sent");
        }
    });
}
