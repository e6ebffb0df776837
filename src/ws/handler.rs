use crate::channel::ObserverCommand;
use crate::http::HttpAppState;
use crate::hub::{DetachCause, SubscriptionRegistry};
use crate::ws::WsChannel;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<HttpAppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, state.channel))
}

async fn handle_socket(
    socket: WebSocket,
    hub: Arc<SubscriptionRegistry>,
    channel: Arc<WsChannel>,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut rx = channel.add(&conn_id).await;
    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                debug!(conn_id = %sender_conn_id, "WebSocket-приёмник закрыт");
                break;
            }
        }
    });

    hub.on_attach(&conn_id).await;

    let mut cause = DetachCause::Clean;
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => dispatch_command(&hub, &conn_id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => trace!(conn_id = %conn_id, "получен pong"),
            Ok(_) => {}
            Err(err) => {
                cause = DetachCause::Error(err.to_string());
                break;
            }
        }
    }

    hub.on_detach(&conn_id, cause).await;
    channel.remove(&conn_id).await;
    send_task.abort();
}

pub(crate) async fn dispatch_command(hub: &SubscriptionRegistry, conn_id: &str, text: &str) {
    let command = match ObserverCommand::parse(text) {
        Ok(command) => command,
        Err(err) => {
            warn!(conn_id = %conn_id, error = %err, "некорректная команда наблюдателя проигнорирована");
            return;
        }
    };
    debug!(conn_id = %conn_id, command = ?command, "команда наблюдателя");
    if let Err(err) = hub.handle_command(conn_id, command).await {
        warn!(conn_id = %conn_id, error = %err, "команда наблюдателя не выполнена");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{COMBINED_TELEMETRY, DYNAMIC_TELEMETRY_UPDATED, STATIC_TELEMETRY};
    use crate::metrics::Metrics;
    use crate::testing::{FakeCollector, RecordingChannel};

    fn registry() -> (Arc<RecordingChannel>, SubscriptionRegistry) {
        let channel = Arc::new(RecordingChannel::default());
        let hub = SubscriptionRegistry::new(
            Arc::new(FakeCollector::default()),
            channel.clone(),
            Metrics::new().expect("инициализация метрик"),
        );
        (channel, hub)
    }

    #[tokio::test]
    async fn request_commands_answer_the_caller_only() {
        let (channel, hub) = registry();
        hub.on_attach("a").await;
        hub.on_attach("b").await;
        channel.clear();

        dispatch_command(&hub, "a", r#"{"command":"request-static"}"#).await;
        dispatch_command(&hub, "a", r#"{"command":"request-dynamic"}"#).await;
        dispatch_command(&hub, "a", r#"{"command":"request-combined"}"#).await;

        assert_eq!(
            channel.events_for("a"),
            vec![STATIC_TELEMETRY, DYNAMIC_TELEMETRY_UPDATED, COMBINED_TELEMETRY]
        );
        assert!(channel.events_for("b").is_empty());
    }

    #[tokio::test]
    async fn group_commands_update_membership() {
        let (_channel, hub) = registry();
        hub.on_attach("a").await;

        dispatch_command(&hub, "a", r#"{"command":"join-group","group":"rack-1"}"#).await;
        assert_eq!(hub.group_members("rack-1").await, vec!["a".to_string()]);

        dispatch_command(&hub, "a", r#"{"command":"leave-group","group":"rack-1"}"#).await;
        assert!(hub.group_members("rack-1").await.is_empty());
    }

    #[tokio::test]
    async fn malformed_and_unattached_commands_are_ignored() {
        let (channel, hub) = registry();
        hub.on_attach("a").await;
        channel.clear();

        dispatch_command(&hub, "a", "{").await;
        dispatch_command(&hub, "a", r#"{"command":"shutdown"}"#).await;
        dispatch_command(&hub, "ghost", r#"{"command":"request-static"}"#).await;

        assert!(channel.sent().is_empty());
        assert!(hub.is_attached("a").await);
        assert!(!hub.is_attached("ghost").await);
    }
}
