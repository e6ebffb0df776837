mod channel;
mod collectors;
mod config;
mod http;
mod hub;
mod metrics;
mod scheduler;
#[cfg(test)]
mod testing;
mod ws;

use axum::serve;
use clap::Parser;
use collectors::system::ProcfsCollector;
use collectors::MetricsCollector;
use config::Config;
use hub::SubscriptionRegistry;
use metrics::Metrics;
use scheduler::BroadcastScheduler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ws::WsChannel;

#[derive(Parser, Debug)]
#[command(name = "telemd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `listen` from the config file
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
        if let Err(err) = cfg.validate() {
            error!(error = %err, "некорректный адрес --listen");
            std::process::exit(1);
        }
    }

    let (interval, sample_window) = match (cfg.broadcast_interval(), cfg.cpu_sample_window()) {
        (Ok(interval), Ok(window)) => (interval, window),
        (Err(err), _) | (_, Err(err)) => {
            error!(error = %err, "некорректные интервалы в конфигурации");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        broadcast_interval = %humantime::format_duration(interval),
        cpu_sample_window = %humantime::format_duration(sample_window),
        roots = ?cfg.sources.roots,
        "запуск telemd"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    let collector: Arc<dyn MetricsCollector> =
        Arc::new(ProcfsCollector::new(cfg.source_paths(), sample_window));
    let ws_channel = Arc::new(WsChannel::new());
    let hub = Arc::new(SubscriptionRegistry::new(
        collector.clone(),
        ws_channel.clone(),
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let listen = cfg.listen.clone();
        let state = http::HttpAppState {
            metrics: metrics.clone(),
            collector: collector.clone(),
            hub: hub.clone(),
            channel: ws_channel.clone(),
        };
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(state);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "некорректный адрес listen");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "не удалось запустить HTTP-сервер");
                    return;
                }
            };
            info!(addr = %addr, "HTTP-сервер слушает");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let scheduler_task = {
        let scheduler = BroadcastScheduler::new(collector, hub.clone(), metrics, interval);
        tokio::spawn(scheduler.run(shutdown_rx))
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    ws_channel.shutdown_all().await;
    let _ = http_task.await;
    info!(observers = hub.observer_count().await, "telemd остановлен");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
