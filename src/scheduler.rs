use crate::channel::TelemetryEvent;
use crate::collectors::{CollectError, MetricsCollector};
use crate::hub::{BroadcastReport, SubscriptionRegistry};
use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

pub struct BroadcastScheduler {
    collector: Arc<dyn MetricsCollector>,
    hub: Arc<SubscriptionRegistry>,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl BroadcastScheduler {
    pub fn new(
        collector: Arc<dyn MetricsCollector>,
        hub: Arc<SubscriptionRegistry>,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        Self {
            collector,
            hub,
            metrics,
            interval,
        }
    }

    // The interval is measured from the end of one iteration to the start of the next.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                info!("цикл рассылки остановлен до начала итерации");
                break;
            }
            if let Err(err) = self.run_once().await {
                self.metrics.inc_collect_error("broadcast");
                error!(error = %err, "ошибка итерации рассылки телеметрии");
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("получен сигнал остановки цикла рассылки");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    pub async fn run_once(&self) -> Result<BroadcastReport, CollectError> {
        let snapshot = self.collector.get_dynamic().await?;
        self.metrics.update_from_dynamic(&snapshot);

        let report = self
            .hub
            .broadcast(&TelemetryEvent::DynamicTelemetryUpdated(snapshot))
            .await;
        self.metrics.record_broadcast(report.delivered);
        debug!(
            delivered = report.delivered,
            failed = report.failed,
            "динамическая телеметрия разослана"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DYNAMIC_TELEMETRY_UPDATED;
    use crate::hub::DetachCause;
    use crate::testing::{FakeCollector, RecordingChannel};
    use std::sync::atomic::Ordering;

    const INTERVAL: Duration = Duration::from_secs(5);

    struct Fixture {
        collector: Arc<FakeCollector>,
        channel: Arc<RecordingChannel>,
        hub: Arc<SubscriptionRegistry>,
        scheduler: BroadcastScheduler,
    }

    fn fixture() -> Fixture {
        let collector = Arc::new(FakeCollector::default());
        let channel = Arc::new(RecordingChannel::default());
        let metrics = Metrics::new().expect("инициализация метрик");
        let hub = Arc::new(SubscriptionRegistry::new(
            collector.clone(),
            channel.clone(),
            metrics.clone(),
        ));
        let scheduler = BroadcastScheduler::new(collector.clone(), hub.clone(), metrics, INTERVAL);
        Fixture {
            collector,
            channel,
            hub,
            scheduler,
        }
    }

    #[tokio::test]
    async fn iteration_reaches_every_attached_observer() {
        let f = fixture();
        for id in ["a", "b", "c"] {
            f.hub.on_attach(id).await;
        }
        f.hub.on_detach("b", DetachCause::Clean).await;
        f.channel.clear();

        let report = f.scheduler.run_once().await.unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(f.channel.events_for("a"), vec![DYNAMIC_TELEMETRY_UPDATED]);
        assert_eq!(f.channel.events_for("c"), vec![DYNAMIC_TELEMETRY_UPDATED]);
        assert!(f.channel.events_for("b").is_empty());
    }

    #[tokio::test]
    async fn iteration_without_observers_still_samples() {
        let f = fixture();

        let report = f.scheduler.run_once().await.unwrap();

        assert_eq!(report, BroadcastReport::default());
        assert_eq!(f.collector.dynamic_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_iterations_do_not_stop_the_loop() {
        let f = fixture();
        f.hub.on_attach("a").await;
        f.channel.clear();
        f.collector.fail_dynamic.store(true, Ordering::SeqCst);
        let collector = f.collector.clone();
        let channel = f.channel.clone();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(f.scheduler.run(shutdown_rx));

        tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(100)).await;
        let failed_calls = collector.dynamic_calls.load(Ordering::SeqCst);
        assert!(failed_calls >= 2, "итераций: {failed_calls}");
        assert!(channel.events_for("a").is_empty());

        collector.fail_dynamic.store(false, Ordering::SeqCst);
        tokio::time::sleep(INTERVAL).await;
        assert!(!channel.events_for("a").is_empty());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(INTERVAL, task)
            .await
            .expect("цикл должен остановиться в пределах интервала")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_the_delay() {
        let f = fixture();
        let collector = f.collector.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(f.scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(collector.dynamic_calls.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(50), task)
            .await
            .expect("остановка не должна ждать следующего тика")
            .unwrap();
        assert_eq!(collector.dynamic_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_starts_after_iteration_finishes() {
        let f = fixture();
        f.collector.dynamic_delay_ms.store(2_000, Ordering::SeqCst);
        let collector = f.collector.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(f.scheduler.run(shutdown_rx));

        // First sample occupies 0s..2s, so the next one starts at 7s.
        tokio::time::sleep(Duration::from_millis(6_500)).await;
        assert_eq!(collector.dynamic_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(collector.dynamic_calls.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(INTERVAL, task)
            .await
            .expect("цикл должен остановиться в пределах интервала")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_loop_never_samples() {
        let f = fixture();
        let collector = f.collector.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        f.scheduler.run(shutdown_rx).await;

        assert_eq!(collector.dynamic_calls.load(Ordering::SeqCst), 0);
    }
}
