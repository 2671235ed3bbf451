use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use poller_actor::ActorConfig;
use serial_client::ClientConfig;

#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub serial: ClientConfig,
    pub poller: ActorConfig,
    /// HTTP listen address; the HTTP surface is off when unset.
    pub http_bind: Option<String>,
    /// JSON file of last-known sensor values loaded before the first poll.
    pub seed_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial.port_path.trim().is_empty() {
            anyhow::bail!("serial.port must be non-empty");
        }
        if self.serial.baud_rate == 0 {
            anyhow::bail!("serial.baud_rate must be >= 1");
        }
        if self.poller.poll_interval.as_millis() == 0 {
            anyhow::bail!("poller.poll_interval_ms must be >= 1");
        }
        if self.poller.request_timeout.as_millis() == 0 {
            anyhow::bail!("poller.request_timeout_ms must be >= 1");
        }
        if self.poller.reconnect_interval.as_millis() == 0 {
            anyhow::bail!("poller.reconnect_interval_ms must be >= 1");
        }
        if self.poller.request_timeout >= self.poller.poll_interval {
            anyhow::bail!("poller.request_timeout_ms must be shorter than poller.poll_interval_ms");
        }
        self.http_addr()?;
        if let Some(ref path) = self.seed_path {
            if path.trim().is_empty() {
                anyhow::bail!("seed.path must be non-empty when set");
            }
        }

        Ok(())
    }

    pub fn http_addr(&self) -> Result<Option<SocketAddr>> {
        self.http_bind
            .as_deref()
            .map(|bind| {
                bind.parse::<SocketAddr>()
                    .with_context(|| format!("http.bind {bind} is not a socket address"))
            })
            .transpose()
    }
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(value) = env::var("COTEK_SERIAL_PORT") {
        config.serial.port_path = value;
    }

    if let Some(baud_rate) = parse_env_u32("COTEK_BAUD_RATE") {
        config.serial.baud_rate = baud_rate;
    }

    if let Some(interval_ms) = parse_env_u64("COTEK_POLL_INTERVAL_MS") {
        config.poller.poll_interval = Duration::from_millis(interval_ms);
    }

    if let Some(timeout_ms) = parse_env_u64("COTEK_REQUEST_TIMEOUT_MS") {
        config.poller.request_timeout = Duration::from_millis(timeout_ms);
    }

    if let Some(interval_ms) = parse_env_u64("COTEK_RECONNECT_INTERVAL_MS") {
        config.poller.reconnect_interval = Duration::from_millis(interval_ms);
    }

    config.http_bind = env::var("COTEK_HTTP_BIND").ok().or(config.http_bind.take());
    config.seed_path = env::var("COTEK_SEED_PATH").ok().or(config.seed_path.take());
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    serial: Option<FileSerialConfig>,
    poller: Option<FilePollerConfig>,
    http: Option<FileHttpConfig>,
    seed: Option<FileSeedConfig>,
}

#[derive(Debug, Deserialize)]
struct FileSerialConfig {
    port: Option<String>,
    baud_rate: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FilePollerConfig {
    poll_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    reconnect_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileHttpConfig {
    bind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileSeedConfig {
    path: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("COTEK_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut AppConfig, file: FileConfig) {
    if let Some(serial) = file.serial {
        if let Some(port) = serial.port {
            config.serial.port_path = port;
        }
        if let Some(baud_rate) = serial.baud_rate {
            config.serial.baud_rate = baud_rate;
        }
    }

    if let Some(poller) = file.poller {
        if let Some(interval_ms) = poller.poll_interval_ms {
            config.poller.poll_interval = Duration::from_millis(interval_ms);
        }
        if let Some(timeout_ms) = poller.request_timeout_ms {
            config.poller.request_timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(interval_ms) = poller.reconnect_interval_ms {
            config.poller.reconnect_interval = Duration::from_millis(interval_ms);
        }
    }

    if let Some(http) = file.http {
        if let Some(bind) = http.bind {
            config.http_bind = Some(bind);
        }
    }

    if let Some(seed) = file.seed {
        if let Some(path) = seed.path {
            config.seed_path = Some(path);
        }
    }
}

fn parse_env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}
