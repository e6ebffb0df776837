use crate::collectors::sources::{Source, SourceError, SourcePaths};
use crate::collectors::{CollectError, DynamicSnapshot, MetricsCollector, StaticSnapshot};
use async_trait::async_trait;
use std::thread;
use std::time::Duration;
use sysinfo::{ProcessExt, System, SystemExt};
use tracing::{debug, warn};

const UNKNOWN_MODEL: &str = "Unknown";

#[derive(Debug, Clone)]
pub struct ProcfsCollector {
    sources: SourcePaths,
    cpu_sample_window: Duration,
}

#[async_trait]
impl MetricsCollector for ProcfsCollector {
    async fn get_static(&self) -> Result<StaticSnapshot, CollectError> {
        let collector = self.clone();
        Ok(tokio::task::spawn_blocking(move || collector.collect_static()).await?)
    }

    async fn get_dynamic(&self) -> Result<DynamicSnapshot, CollectError> {
        let collector = self.clone();
        Ok(tokio::task::spawn_blocking(move || collector.collect_dynamic()).await?)
    }
}

impl ProcfsCollector {
    pub fn new(sources: SourcePaths, cpu_sample_window: Duration) -> Self {
        Self {
            sources,
            cpu_sample_window,
        }
    }

    pub fn collect_static(&self) -> StaticSnapshot {
        let cpu_core_count = logical_core_count();

        let operating_system = degrade("operating_system", self.os_release(), platform_os_name);
        let model = degrade(
            "model",
            self.device_model().or_else(|err| {
                report("device_model", &err);
                self.cpuinfo_field(&["Model"])
            }),
            || UNKNOWN_MODEL.to_string(),
        );
        let ram_size = degrade(
            "ram_size",
            self.mem_total_kb().map(format_ram_size),
            approximate_ram_size,
        );
        let cpu_info = degrade(
            "cpu_info",
            self.cpuinfo_field(&["model name", "Hardware"]),
            || format!("{cpu_core_count} Core(s)"),
        );

        StaticSnapshot::new(
            operating_system,
            std::env::consts::ARCH.to_string(),
            model,
            ram_size,
            cpu_info,
            cpu_core_count,
        )
    }

    pub fn collect_dynamic(&self) -> DynamicSnapshot {
        let cpu_temperature = degrade("cpu_temperature", self.cpu_temperature(), || 0.0);
        let cpu_usage = degrade("cpu_usage", self.cpu_usage(), || 0.0);
        let memory = degrade("memory", self.memory(), MemoryFigures::default);

        DynamicSnapshot::new(
            cpu_temperature,
            cpu_usage,
            memory.usage_percent,
            memory.total_mb,
            memory.available_mb,
        )
    }

    fn os_release(&self) -> Result<String, SourceError> {
        let src = self.sources.read(Source::OsRelease)?;
        parse_os_release(&src.text).ok_or_else(|| src.malformed("PRETTY_NAME"))
    }

    fn device_model(&self) -> Result<String, SourceError> {
        let src = self.sources.read(Source::DeviceModel)?;
        let model = src
            .text
            .trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if model.is_empty() {
            return Err(src.malformed("model"));
        }
        Ok(model.to_string())
    }

    fn cpuinfo_field(&self, keys: &[&'static str]) -> Result<String, SourceError> {
        let src = self.sources.read(Source::CpuInfo)?;
        keys.iter()
            .find_map(|key| parse_colon_field(&src.text, key))
            .ok_or_else(|| src.malformed(keys.first().copied().unwrap_or("model name")))
    }

    fn mem_total_kb(&self) -> Result<u64, SourceError> {
        let src = self.sources.read(Source::MemInfo)?;
        parse_meminfo_kb(&src.text, "MemTotal").ok_or_else(|| src.malformed("MemTotal"))
    }

    fn memory(&self) -> Result<MemoryFigures, SourceError> {
        let src = self.sources.read(Source::MemInfo)?;
        let total_kb =
            parse_meminfo_kb(&src.text, "MemTotal").ok_or_else(|| src.malformed("MemTotal"))?;
        let available_kb = parse_meminfo_kb(&src.text, "MemAvailable");
        if available_kb.is_none() {
            debug!(path = %src.path.display(), "MemAvailable отсутствует, доступная память принята за 0");
        }
        Ok(MemoryFigures::from_kb(total_kb, available_kb))
    }

    fn cpu_temperature(&self) -> Result<f64, SourceError> {
        let src = self.sources.read(Source::Thermal)?;
        let millidegrees = src
            .text
            .trim()
            .parse::<f64>()
            .map_err(|_| src.malformed("temp"))?;
        Ok(millidegrees / 1000.0)
    }

    fn cpu_times(&self) -> Result<CpuTimes, SourceError> {
        let src = self.sources.read(Source::CpuTimes)?;
        parse_cpu_times(&src.text).ok_or_else(|| src.malformed("cpu"))
    }

    fn cpu_usage(&self) -> Result<f64, SourceError> {
        let first = self.cpu_times()?;
        thread::sleep(self.cpu_sample_window);
        let second = self.cpu_times()?;
        Ok(first.usage_until(&second))
    }
}

fn degrade<T>(
    field: &'static str,
    result: Result<T, SourceError>,
    fallback: impl FnOnce() -> T,
) -> T {
    match result {
        Ok(v) => v,
        Err(err) => {
            report(field, &err);
            fallback()
        }
    }
}

fn report(field: &'static str, err: &SourceError) {
    match err {
        SourceError::Missing { .. } => {
            debug!(field, error = %err, "метрика недоступна, используется значение по умолчанию")
        }
        _ => warn!(field, error = %err, "не удалось получить метрику, используется значение по умолчанию"),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MemoryFigures {
    usage_percent: f64,
    total_mb: f64,
    available_mb: f64,
}

impl MemoryFigures {
    fn from_kb(total_kb: u64, available_kb: Option<u64>) -> Self {
        let total = total_kb as f64;
        let available = available_kb.unwrap_or(0).min(total_kb) as f64;
        let usage_percent = if total > 0.0 {
            (total - available) / total * 100.0
        } else {
            0.0
        };

        Self {
            usage_percent,
            total_mb: total / 1024.0,
            available_mb: available / 1024.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

impl CpuTimes {
    fn usage_until(&self, later: &CpuTimes) -> f64 {
        let total = later.total.saturating_sub(self.total);
        if total == 0 {
            return 0.0;
        }
        let idle = later.idle.saturating_sub(self.idle).min(total);
        ((total - idle) as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

// user nice system idle iowait irq softirq steal [guest guest_nice];
// guest is already included in user and nice.
fn parse_cpu_times(text: &str) -> Option<CpuTimes> {
    let line = text.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if fields.len() < 4 {
        return None;
    }

    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total = fields.iter().take(8).sum();
    Some(CpuTimes { idle, total })
}

fn parse_os_release(text: &str) -> Option<String> {
    let lookup = |key: &str| {
        text.lines().find_map(|line| {
            let value = line.strip_prefix(key)?.strip_prefix('=')?;
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            (!value.is_empty()).then(|| value.to_string())
        })
    };
    lookup("PRETTY_NAME").or_else(|| lookup("NAME"))
}

fn parse_colon_field(text: &str, key: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim() != key {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn parse_meminfo_kb(text: &str, field: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let rest = line.strip_prefix(field)?.strip_prefix(':')?;
        rest.split_whitespace().next()?.parse::<u64>().ok()
    })
}

fn format_ram_size(total_kb: u64) -> String {
    let mb = total_kb / 1024;
    let gb = mb as f64 / 1024.0;
    if gb >= 1.0 {
        format!("{gb:.1} GB")
    } else {
        format!("{mb} MB")
    }
}

fn platform_os_name() -> String {
    System::new()
        .long_os_version()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| std::env::consts::OS.to_string())
}

fn logical_core_count() -> u32 {
    let mut system = System::new();
    system.refresh_cpu();
    let count = system.cpus().len();
    if count > 0 {
        return count as u32;
    }

    thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

fn approximate_ram_size() -> String {
    let mut system = System::new();
    let bytes = sysinfo::get_current_pid()
        .ok()
        .and_then(|pid| {
            system.refresh_process(pid);
            system.process(pid).map(|p| p.memory())
        })
        .unwrap_or(0);
    format!("{} MB (Approximate)", bytes / (1024 * 1024))
}
