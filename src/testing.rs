use crate::channel::{PublishError, PushChannel, TelemetryEvent};
use crate::collectors::{CollectError, DynamicSnapshot, MetricsCollector, StaticSnapshot};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn sample_static() -> StaticSnapshot {
    StaticSnapshot::new(
        "Raspbian GNU/Linux 11 (bullseye)".to_string(),
        "aarch64".to_string(),
        "Raspberry Pi 4 Model B Rev 1.4".to_string(),
        "8.0 GB".to_string(),
        "Cortex-A72".to_string(),
        4,
    )
}

pub fn sample_dynamic() -> DynamicSnapshot {
    DynamicSnapshot::new(48.3, 12.5, 75.0, 8192.0, 2048.0)
}

pub async fn failed_collection() -> CollectError {
    let handle = tokio::spawn(std::future::pending::<()>());
    handle.abort();
    let err = handle
        .await
        .expect_err("прерванная задача не может завершиться");
    CollectError::from(err)
}

#[derive(Default)]
pub struct FakeCollector {
    pub static_calls: AtomicUsize,
    pub dynamic_calls: AtomicUsize,
    pub fail_static: AtomicBool,
    pub fail_dynamic: AtomicBool,
    pub dynamic_delay_ms: AtomicU64,
}

#[async_trait]
impl MetricsCollector for FakeCollector {
    async fn get_static(&self) -> Result<StaticSnapshot, CollectError> {
        self.static_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_static.load(Ordering::SeqCst) {
            return Err(failed_collection().await);
        }
        Ok(sample_static())
    }

    async fn get_dynamic(&self) -> Result<DynamicSnapshot, CollectError> {
        self.dynamic_calls.fetch_add(1, Ordering::SeqCst);
        let delay_ms = self.dynamic_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        if self.fail_dynamic.load(Ordering::SeqCst) {
            return Err(failed_collection().await);
        }
        Ok(sample_dynamic())
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(String, TelemetryEvent)>>,
    closed: Mutex<HashSet<String>>,
}

impl RecordingChannel {
    pub fn events_for(&self, connection_id: &str) -> Vec<&'static str> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == connection_id)
            .map(|(_, event)| event.name())
            .collect()
    }

    pub fn sent(&self) -> Vec<(String, TelemetryEvent)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn close(&self, connection_id: &str) {
        self.closed.lock().unwrap().insert(connection_id.to_string());
    }
}

#[async_trait]
impl PushChannel for RecordingChannel {
    async fn send(&self, connection_id: &str, event: &TelemetryEvent) -> Result<(), PublishError> {
        if self.closed.lock().unwrap().contains(connection_id) {
            return Err(PublishError::Closed(connection_id.to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((connection_id.to_string(), event.clone()));
        Ok(())
    }
}
