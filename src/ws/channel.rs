use crate::channel::{PublishError, PushChannel, TelemetryEvent};
use async_trait::async_trait;
use axum::extract::ws::Message;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

pub type WsSender = mpsc::UnboundedSender<Message>;

pub struct WsChannel {
    connections: RwLock<HashMap<String, WsSender>>,
}

impl WsChannel {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add(&self, conn_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .write()
            .await
            .insert(conn_id.to_string(), tx);
        rx
    }

    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for sender in conns.values() {
            let _ = sender.send(Message::Close(None));
        }
        conns.clear();
        info!(count, "все WebSocket-соединения закрыты");
    }
}

impl Default for WsChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushChannel for WsChannel {
    async fn send(&self, connection_id: &str, event: &TelemetryEvent) -> Result<(), PublishError> {
        let text = event.to_json()?;
        let conns = self.connections.read().await;
        let sender = conns
            .get(connection_id)
            .ok_or_else(|| PublishError::UnknownConnection(connection_id.to_string()))?;
        sender
            .send(Message::Text(text))
            .map_err(|_| PublishError::Closed(connection_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_dynamic;

    fn dynamic_event() -> TelemetryEvent {
        TelemetryEvent::DynamicTelemetryUpdated(sample_dynamic())
    }

    #[tokio::test]
    async fn send_writes_json_text_frame() {
        let channel = WsChannel::new();
        let mut rx = channel.add("c1").await;

        channel.send("c1", &dynamic_event()).await.unwrap();

        match rx.recv().await {
            Some(Message::Text(text)) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["event"], "dynamic-telemetry-updated");
                assert_eq!(value["payload"]["memory_total_mb"], 8192.0);
            }
            other => panic!("ожидался текстовый кадр, получено {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_to_unknown_connection_fails() {
        let channel = WsChannel::new();

        let err = channel.send("ghost", &dynamic_event()).await.unwrap_err();

        assert!(matches!(err, PublishError::UnknownConnection(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn send_after_writer_dropped_reports_closed() {
        let channel = WsChannel::new();
        let rx = channel.add("c1").await;
        drop(rx);

        let err = channel.send("c1", &dynamic_event()).await.unwrap_err();

        assert!(matches!(err, PublishError::Closed(id) if id == "c1"));
    }

    #[tokio::test]
    async fn remove_forgets_connection() {
        let channel = WsChannel::new();
        let _rx = channel.add("c1").await;
        let _rx2 = channel.add("c2").await;
        assert_eq!(channel.connection_count().await, 2);

        channel.remove("c1").await;

        assert_eq!(channel.connection_count().await, 1);
        assert!(channel.send("c1", &dynamic_event()).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_all_sends_close_and_clears() {
        let channel = WsChannel::new();
        let mut rx = channel.add("c1").await;

        channel.shutdown_all().await;

        assert!(matches!(rx.recv().await, Some(Message::Close(None))));
        assert_eq!(channel.connection_count().await, 0);
    }
}
