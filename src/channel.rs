use crate::collectors::{CombinedSnapshot, DynamicSnapshot, StaticSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STATIC_TELEMETRY: &str = "static-telemetry";
pub const DYNAMIC_TELEMETRY_UPDATED: &str = "dynamic-telemetry-updated";
pub const COMBINED_TELEMETRY: &str = "combined-telemetry";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum TelemetryEvent {
    StaticTelemetry(StaticSnapshot),
    DynamicTelemetryUpdated(DynamicSnapshot),
    CombinedTelemetry(CombinedSnapshot),
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::StaticTelemetry(_) => STATIC_TELEMETRY,
            TelemetryEvent::DynamicTelemetryUpdated(_) => DYNAMIC_TELEMETRY_UPDATED,
            TelemetryEvent::CombinedTelemetry(_) => COMBINED_TELEMETRY,
        }
    }

    pub fn to_json(&self) -> Result<String, PublishError> {
        serde_json::to_string(self).map_err(|source| PublishError::Encode {
            event: self.name(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum ObserverCommand {
    RequestStatic,
    RequestDynamic,
    RequestCombined,
    JoinGroup { group: String },
    LeaveGroup { group: String },
}

impl ObserverCommand {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("соединение {0} не зарегистрировано в канале")]
    UnknownConnection(String),
    #[error("соединение {0} закрыто")]
    Closed(String),
    #[error("не удалось сериализовать событие {event}: {source}")]
    Encode {
        event: &'static str,
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn send(&self, connection_id: &str, event: &TelemetryEvent) -> Result<(), PublishError>;
}
