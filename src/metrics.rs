use crate::collectors::DynamicSnapshot;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub telemd_cpu_temperature_celsius: Gauge,
    pub telemd_cpu_usage_percent: Gauge,
    pub telemd_memory_usage_percent: Gauge,
    pub telemd_memory_total_megabytes: Gauge,
    pub telemd_memory_available_megabytes: Gauge,
    pub telemd_observers: Gauge,
    pub telemd_broadcasts_total: Counter,
    pub telemd_deliveries_total: Counter,
    pub telemd_publish_errors_total: CounterVec,
    pub telemd_collect_errors_total: CounterVec,
    pub telemd_scrape_count_total: Counter,
    pub telemd_last_broadcast_timestamp_seconds: Gauge,
    pub telemd_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let telemd_cpu_temperature_celsius = Gauge::with_opts(opts!(
            "telemd_cpu_temperature_celsius",
            "CPU temperature from the last sample in Celsius"
        ))?;
        let telemd_cpu_usage_percent = Gauge::with_opts(opts!(
            "telemd_cpu_usage_percent",
            "CPU utilization from the last sample in percent (0..100)"
        ))?;
        let telemd_memory_usage_percent = Gauge::with_opts(opts!(
            "telemd_memory_usage_percent",
            "Memory utilization from the last sample in percent (0..100)"
        ))?;
        let telemd_memory_total_megabytes = Gauge::with_opts(opts!(
            "telemd_memory_total_megabytes",
            "Total memory in megabytes"
        ))?;
        let telemd_memory_available_megabytes = Gauge::with_opts(opts!(
            "telemd_memory_available_megabytes",
            "Available memory in megabytes"
        ))?;
        let telemd_observers = Gauge::with_opts(opts!(
            "telemd_observers",
            "Number of attached observers"
        ))?;
        let telemd_broadcasts_total = Counter::with_opts(opts!(
            "telemd_broadcasts_total",
            "Completed scheduled broadcasts"
        ))?;
        let telemd_deliveries_total = Counter::with_opts(opts!(
            "telemd_deliveries_total",
            "Events delivered to observers by scheduled broadcasts"
        ))?;
        let telemd_publish_errors_total = CounterVec::new(
            opts!(
                "telemd_publish_errors_total",
                "Failed event deliveries by event name"
            ),
            &["event"],
        )?;
        let telemd_collect_errors_total = CounterVec::new(
            opts!(
                "telemd_collect_errors_total",
                "Failed telemetry collections by stage"
            ),
            &["stage"],
        )?;
        let telemd_scrape_count_total = Counter::with_opts(opts!(
            "telemd_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let telemd_last_broadcast_timestamp_seconds = Gauge::with_opts(opts!(
            "telemd_last_broadcast_timestamp_seconds",
            "Unix time of the last scheduled broadcast"
        ))?;
        let telemd_uptime_seconds =
            Gauge::with_opts(opts!("telemd_uptime_seconds", "Daemon uptime in seconds"))?;

        register(&registry, &telemd_cpu_temperature_celsius)?;
        register(&registry, &telemd_cpu_usage_percent)?;
        register(&registry, &telemd_memory_usage_percent)?;
        register(&registry, &telemd_memory_total_megabytes)?;
        register(&registry, &telemd_memory_available_megabytes)?;
        register(&registry, &telemd_observers)?;
        register(&registry, &telemd_broadcasts_total)?;
        register(&registry, &telemd_deliveries_total)?;
        register(&registry, &telemd_publish_errors_total)?;
        register(&registry, &telemd_collect_errors_total)?;
        register(&registry, &telemd_scrape_count_total)?;
        register(&registry, &telemd_last_broadcast_timestamp_seconds)?;
        register(&registry, &telemd_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            telemd_cpu_temperature_celsius,
            telemd_cpu_usage_percent,
            telemd_memory_usage_percent,
            telemd_memory_total_megabytes,
            telemd_memory_available_megabytes,
            telemd_observers,
            telemd_broadcasts_total,
            telemd_deliveries_total,
            telemd_publish_errors_total,
            telemd_collect_errors_total,
            telemd_scrape_count_total,
            telemd_last_broadcast_timestamp_seconds,
            telemd_uptime_seconds,
        }))
    }

    pub fn update_from_dynamic(&self, snapshot: &DynamicSnapshot) {
        self.telemd_cpu_temperature_celsius
            .set(snapshot.cpu_temperature_celsius);
        self.telemd_cpu_usage_percent.set(snapshot.cpu_usage_percent);
        self.telemd_memory_usage_percent
            .set(snapshot.memory_usage_percent);
        self.telemd_memory_total_megabytes
            .set(snapshot.memory_total_mb);
        self.telemd_memory_available_megabytes
            .set(snapshot.memory_available_mb);
    }

    pub fn record_broadcast(&self, delivered: usize) {
        self.telemd_broadcasts_total.inc();
        self.telemd_deliveries_total.inc_by(delivered as f64);
        self.telemd_last_broadcast_timestamp_seconds
            .set(now_unix() as f64);
    }

    pub fn set_observer_count(&self, count: usize) {
        self.telemd_observers.set(count as f64);
    }

    pub fn inc_scrape_count(&self) {
        self.telemd_scrape_count_total.inc();
    }

    pub fn inc_collect_error(&self, stage: &str) {
        self.telemd_collect_errors_total
            .with_label_values(&[stage])
            .inc();
    }

    pub fn inc_publish_error(&self, event: &str) {
        self.telemd_publish_errors_total
            .with_label_values(&[event])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.telemd_uptime_seconds
            .set(now_unix().saturating_sub(self.started_at_unix) as f64);

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_dynamic;

    #[test]
    fn encodes_sample_gauges_and_counters() {
        let metrics = Metrics::new().expect("инициализация метрик");
        metrics.update_from_dynamic(&sample_dynamic());
        metrics.record_broadcast(3);
        metrics.inc_publish_error("dynamic-telemetry-updated");
        metrics.inc_collect_error("broadcast");
        metrics.set_observer_count(2);

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();

        assert!(text.contains("telemd_memory_usage_percent 75"));
        assert!(text.contains("telemd_deliveries_total 3"));
        assert!(text.contains("telemd_observers 2"));
        assert!(text.contains(r#"telemd_publish_errors_total{event="dynamic-telemetry-updated"} 1"#));
        assert!(text.contains(r#"telemd_collect_errors_total{stage="broadcast"} 1"#));
        assert!(text.contains("telemd_uptime_seconds"));
    }
}
