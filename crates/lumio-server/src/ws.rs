//! Per-socket WebSocket handling.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::debug;

use lumio_core::{Command, StateDelta};

use crate::message::WireMessage;
use crate::server::AppState;

/// The messages a freshly-connected client needs to render the UI before
/// any event arrives.
fn priming_messages(state: &AppState) -> Vec<WireMessage> {
    let snapshot = state.store.snapshot();
    vec![
        WireMessage::new(
            "ble_status",
            serde_json::json!({ "connected": snapshot.link_up, "rssi": snapshot.rssi }),
        ),
        WireMessage::new(
            "device_state",
            serde_json::to_value(StateDelta::snapshot(&snapshot)).unwrap_or_default(),
        ),
        WireMessage::new(
            "pattern_status",
            serde_json::json!({ "running": snapshot.running_pattern }),
        ),
        WireMessage::new(
            "pattern_list",
            serde_json::json!(state.patterns.list().unwrap_or_default()),
        ),
        WireMessage::new(
            "schedule_list",
            serde_json::to_value((state.schedules)()).unwrap_or_default(),
        ),
    ]
}

pub(crate) async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, mut outbound) = state.hub.register();
    let (mut sink, mut stream) = socket.split();

    for message in priming_messages(&state) {
        let Ok(text) = serde_json::to_string(&message) else {
            continue;
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            state.hub.unregister(client_id);
            return;
        }
    }

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<Command>(&text) {
            Ok(command) => {
                if state.commands.send(command).await.is_err() {
                    break;
                }
            }
            Err(e) => debug!(client = client_id, error = %e, "dropping malformed command"),
        }
    }

    state.hub.unregister(client_id);
    writer.abort();
}
