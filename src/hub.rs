use crate::channel::{ObserverCommand, PublishError, PushChannel, TelemetryEvent};
use crate::collectors::{CollectError, MetricsCollector};
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Observer {
    pub groups: HashSet<String>,
    pub attached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachCause {
    Clean,
    Error(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("наблюдатель {0} не подключён")]
    NotAttached(String),
    #[error("имя группы не должно быть пустым")]
    EmptyGroupName,
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Default)]
struct RegistryInner {
    observers: HashMap<String, Observer>,
    groups: HashMap<String, HashSet<String>>,
}

/// Mutations take the write lock; `broadcast` holds the read lock for the
/// whole fan-out, so it never reaches an observer detached before it started.
pub struct SubscriptionRegistry {
    collector: Arc<dyn MetricsCollector>,
    channel: Arc<dyn PushChannel>,
    metrics: Arc<Metrics>,
    inner: RwLock<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(
        collector: Arc<dyn MetricsCollector>,
        channel: Arc<dyn PushChannel>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            collector,
            channel,
            metrics,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    pub async fn on_attach(&self, connection_id: &str) {
        {
            let mut inner = self.inner.write().await;
            if inner.observers.contains_key(connection_id) {
                warn!(conn_id = %connection_id, "повторное подключение с тем же идентификатором проигнорировано");
                return;
            }
            inner.observers.insert(
                connection_id.to_string(),
                Observer {
                    groups: HashSet::new(),
                    attached_at: Utc::now(),
                },
            );
            self.metrics.set_observer_count(inner.observers.len());
        }
        info!(conn_id = %connection_id, "наблюдатель подключён");

        match self.collector.get_static().await {
            Ok(snapshot) => {
                if let Err(err) = self
                    .deliver(connection_id, &TelemetryEvent::StaticTelemetry(snapshot))
                    .await
                {
                    warn!(conn_id = %connection_id, error = %err, "не удалось отправить статическую телеметрию");
                }
            }
            Err(err) => {
                self.metrics.inc_collect_error("attach");
                warn!(conn_id = %connection_id, error = %err, "не удалось собрать статическую телеметрию при подключении");
            }
        }

        match self.collector.get_dynamic().await {
            Ok(snapshot) => {
                if let Err(err) = self
                    .deliver(
                        connection_id,
                        &TelemetryEvent::DynamicTelemetryUpdated(snapshot),
                    )
                    .await
                {
                    warn!(conn_id = %connection_id, error = %err, "не удалось отправить динамическую телеметрию");
                }
            }
            Err(err) => {
                self.metrics.inc_collect_error("attach");
                warn!(conn_id = %connection_id, error = %err, "не удалось собрать динамическую телеметрию при подключении");
            }
        }
    }

    pub async fn on_detach(&self, connection_id: &str, cause: DetachCause) {
        let removed = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            let removed = inner.observers.remove(connection_id);
            if let Some(observer) = &removed {
                for group in &observer.groups {
                    if let Some(members) = inner.groups.get_mut(group) {
                        members.remove(connection_id);
                        if members.is_empty() {
                            inner.groups.remove(group);
                        }
                    }
                }
            }
            self.metrics.set_observer_count(inner.observers.len());
            removed
        };

        match (removed, cause) {
            (None, _) => {
                debug!(conn_id = %connection_id, "отключение неизвестного наблюдателя");
            }
            (Some(observer), DetachCause::Clean) => {
                info!(
                    conn_id = %connection_id,
                    connected_for = %connected_for(&observer),
                    "наблюдатель отключился"
                );
            }
            (Some(observer), DetachCause::Error(reason)) => {
                warn!(
                    conn_id = %connection_id,
                    connected_for = %connected_for(&observer),
                    reason = %reason,
                    "наблюдатель отключился с ошибкой"
                );
            }
        }
    }

    pub async fn request_static(&self, connection_id: &str) -> Result<(), HubError> {
        self.ensure_attached(connection_id).await?;
        let snapshot = self.collector.get_static().await.map_err(|err| {
            self.metrics.inc_collect_error("pull");
            err
        })?;
        self.deliver(connection_id, &TelemetryEvent::StaticTelemetry(snapshot))
            .await?;
        Ok(())
    }

    pub async fn request_dynamic(&self, connection_id: &str) -> Result<(), HubError> {
        self.ensure_attached(connection_id).await?;
        let snapshot = self.collector.get_dynamic().await.map_err(|err| {
            self.metrics.inc_collect_error("pull");
            err
        })?;
        self.deliver(
            connection_id,
            &TelemetryEvent::DynamicTelemetryUpdated(snapshot),
        )
        .await?;
        Ok(())
    }

    pub async fn request_combined(&self, connection_id: &str) -> Result<(), HubError> {
        self.ensure_attached(connection_id).await?;
        let snapshot = self.collector.get_combined().await.map_err(|err| {
            self.metrics.inc_collect_error("pull");
            err
        })?;
        self.deliver(connection_id, &TelemetryEvent::CombinedTelemetry(snapshot))
            .await?;
        Ok(())
    }

    /// Returns `true` when the observer was not yet a member.
    pub async fn join_group(&self, connection_id: &str, group: &str) -> Result<bool, HubError> {
        if group.trim().is_empty() {
            return Err(HubError::EmptyGroupName);
        }

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let observer = inner
            .observers
            .get_mut(connection_id)
            .ok_or_else(|| HubError::NotAttached(connection_id.to_string()))?;
        let joined = observer.groups.insert(group.to_string());
        if joined {
            inner
                .groups
                .entry(group.to_string())
                .or_default()
                .insert(connection_id.to_string());
            debug!(conn_id = %connection_id, group, "наблюдатель вступил в группу");
        }
        Ok(joined)
    }

    /// Returns `true` when the observer was a member.
    pub async fn leave_group(&self, connection_id: &str, group: &str) -> Result<bool, HubError> {
        if group.trim().is_empty() {
            return Err(HubError::EmptyGroupName);
        }

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let observer = inner
            .observers
            .get_mut(connection_id)
            .ok_or_else(|| HubError::NotAttached(connection_id.to_string()))?;
        let left = observer.groups.remove(group);
        if left {
            if let Some(members) = inner.groups.get_mut(group) {
                members.remove(connection_id);
                if members.is_empty() {
                    inner.groups.remove(group);
                }
            }
            debug!(conn_id = %connection_id, group, "наблюдатель покинул группу");
        }
        Ok(left)
    }

    pub async fn handle_command(
        &self,
        connection_id: &str,
        command: ObserverCommand,
    ) -> Result<(), HubError> {
        match command {
            ObserverCommand::RequestStatic => self.request_static(connection_id).await,
            ObserverCommand::RequestDynamic => self.request_dynamic(connection_id).await,
            ObserverCommand::RequestCombined => self.request_combined(connection_id).await,
            ObserverCommand::JoinGroup { group } => {
                self.join_group(connection_id, &group).await.map(|_| ())
            }
            ObserverCommand::LeaveGroup { group } => {
                self.leave_group(connection_id, &group).await.map(|_| ())
            }
        }
    }

    pub async fn broadcast(&self, event: &TelemetryEvent) -> BroadcastReport {
        let inner = self.inner.read().await;
        let mut report = BroadcastReport::default();
        for connection_id in inner.observers.keys() {
            match self.channel.send(connection_id, event).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    self.metrics.inc_publish_error(event.name());
                    debug!(conn_id = %connection_id, event = event.name(), error = %err, "событие не доставлено");
                }
            }
        }
        report
    }

    pub async fn observer_count(&self) -> usize {
        self.inner.read().await.observers.len()
    }

    pub async fn is_attached(&self, connection_id: &str) -> bool {
        self.inner.read().await.observers.contains_key(connection_id)
    }

    pub async fn group_members(&self, group: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut members: Vec<String> = inner
            .groups
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub async fn groups_of(&self, connection_id: &str) -> Option<Vec<String>> {
        let inner = self.inner.read().await;
        inner.observers.get(connection_id).map(|o| {
            let mut groups: Vec<String> = o.groups.iter().cloned().collect();
            groups.sort();
            groups
        })
    }

    async fn ensure_attached(&self, connection_id: &str) -> Result<(), HubError> {
        if self.is_attached(connection_id).await {
            Ok(())
        } else {
            Err(HubError::NotAttached(connection_id.to_string()))
        }
    }

    async fn deliver(
        &self,
        connection_id: &str,
        event: &TelemetryEvent,
    ) -> Result<(), PublishError> {
        self.channel.send(connection_id, event).await.map_err(|err| {
            self.metrics.inc_publish_error(event.name());
            err
        })
    }
}

fn connected_for(observer: &Observer) -> humantime::FormattedDuration {
    let elapsed = (Utc::now() - observer.attached_at)
        .to_std()
        .unwrap_or_default();
    humantime::format_duration(Duration::from_secs(elapsed.as_secs()))
}
