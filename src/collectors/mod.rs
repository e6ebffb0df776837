pub mod sources;
pub mod system;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaticSnapshot {
    pub operating_system: String,
    pub architecture: String,
    pub model: String,
    pub ram_size: String,
    pub cpu_info: String,
    pub cpu_core_count: u32,
}

impl StaticSnapshot {
    pub fn new(
        operating_system: String,
        architecture: String,
        model: String,
        ram_size: String,
        cpu_info: String,
        cpu_core_count: u32,
    ) -> Self {
        Self {
            operating_system,
            architecture,
            model,
            ram_size,
            cpu_info,
            cpu_core_count: cpu_core_count.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicSnapshot {
    pub cpu_temperature_celsius: f64,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub memory_total_mb: f64,
    pub memory_available_mb: f64,
    pub captured_at: DateTime<Utc>,
}

impl DynamicSnapshot {
    pub fn new(
        cpu_temperature_celsius: f64,
        cpu_usage_percent: f64,
        memory_usage_percent: f64,
        memory_total_mb: f64,
        memory_available_mb: f64,
    ) -> Self {
        let memory_total_mb = non_negative(memory_total_mb);
        let mut memory_available_mb = non_negative(memory_available_mb);
        if memory_total_mb > 0.0 {
            memory_available_mb = memory_available_mb.min(memory_total_mb);
        }

        Self {
            cpu_temperature_celsius: if cpu_temperature_celsius.is_finite() {
                cpu_temperature_celsius
            } else {
                0.0
            },
            cpu_usage_percent: percent(cpu_usage_percent),
            memory_usage_percent: percent(memory_usage_percent),
            memory_total_mb,
            memory_available_mb,
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedSnapshot {
    pub operating_system: String,
    pub architecture: String,
    pub model: String,
    pub ram_size: String,
    pub cpu_info: String,
    pub cpu_core_count: u32,
    pub cpu_temperature_celsius: f64,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub memory_total_mb: f64,
    pub memory_available_mb: f64,
    pub captured_at: DateTime<Utc>,
}

impl CombinedSnapshot {
    pub fn merge(static_snapshot: &StaticSnapshot, dynamic: &DynamicSnapshot) -> Self {
        Self {
            operating_system: static_snapshot.operating_system.clone(),
            architecture: static_snapshot.architecture.clone(),
            model: static_snapshot.model.clone(),
            ram_size: static_snapshot.ram_size.clone(),
            cpu_info: static_snapshot.cpu_info.clone(),
            cpu_core_count: static_snapshot.cpu_core_count,
            cpu_temperature_celsius: dynamic.cpu_temperature_celsius,
            cpu_usage_percent: dynamic.cpu_usage_percent,
            memory_usage_percent: dynamic.memory_usage_percent,
            memory_total_mb: dynamic.memory_total_mb,
            memory_available_mb: dynamic.memory_available_mb,
            captured_at: dynamic.captured_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("задача сбора телеметрии не завершилась: {0}")]
    Task(#[from] tokio::task::JoinError),
}

// Unreadable metrics degrade inside the snapshot; Err means the sampling task failed.
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    async fn get_static(&self) -> Result<StaticSnapshot, CollectError>;

    async fn get_dynamic(&self) -> Result<DynamicSnapshot, CollectError>;

    async fn get_combined(&self) -> Result<CombinedSnapshot, CollectError> {
        let static_snapshot = self.get_static().await?;
        let dynamic = self.get_dynamic().await?;
        Ok(CombinedSnapshot::merge(&static_snapshot, &dynamic))
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() {
        v.max(0.0)
    } else {
        0.0
    }
}

fn percent(v: f64) -> f64 {
    non_negative(v).min(100.0)
}
