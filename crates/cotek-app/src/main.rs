use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use cotek_app::http::{self, HttpState};
use cotek_app::seed::load_seed;
use cotek_app::sink::TracingSink;
use cotek_app::AppConfig;
use device_cache::DeviceCache;
use poller_actor::SerialService;
use serial_client::SerialConnector;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = parse_config_arg();
    let config = AppConfig::load_with_path(config_path).context("load config failed")?;
    config.validate().context("config validation failed")?;
    let http_addr = config.http_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "metrics recorder install failed");
            None
        }
    };

    let cache = DeviceCache::new(Arc::new(TracingSink));
    if let Some(ref path) = config.seed_path {
        match load_seed(path) {
            Ok(values) => {
                info!(path = %path, sensors = values.len(), "seeding sensor values");
                cache.seed(values);
            }
            Err(err) => warn!(path = %path, error = %err, "seed load failed"),
        }
    }

    info!(
        port = %config.serial.port_path,
        baud_rate = config.serial.baud_rate,
        poll_interval_ms = config.poller.poll_interval.as_millis() as u64,
        "starting serial service"
    );
    let service = SerialService::new(
        SerialConnector::new(config.serial.clone()),
        cache,
        config.poller.clone(),
    );
    let handle = service.handle();
    let service_handle = tokio::spawn(service.run(shutdown_rx.clone()));

    let http_handle = http_addr.map(|addr| {
        let state = HttpState {
            service: handle.clone(),
            metrics: metrics.clone(),
        };
        tokio::spawn(http::serve(addr, state, shutdown_rx.clone()))
    });

    notify_ready();
    let watchdog_handle = start_watchdog(shutdown_rx.clone());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => warn!(error = %err, "signal listener failed"),
    }
    let _ = shutdown_tx.send(true);

    if let Err(err) = service_handle.await {
        warn!(error = %err, "serial service task join failed");
    }
    if let Some(handle) = http_handle {
        match handle.await {
            Ok(Err(err)) => warn!(error = %err, "http server exited with error"),
            Err(err) => warn!(error = %err, "http task join failed"),
            Ok(Ok(())) => {}
        }
    }
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }
    Ok(())
}

fn parse_config_arg() -> Option<String> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn start_watchdog(
    mut shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        warn!(error = %err, "systemd watchdog notify failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn start_watchdog(_shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    let interval = watchdog_usec.saturating_div(2).max(100_000);
    Some(Duration::from_micros(interval))
}
