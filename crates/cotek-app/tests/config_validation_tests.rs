use std::env;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use cotek_app::AppConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

const ENV_KEYS: [&str; 8] = [
    "COTEK_CONFIG",
    "COTEK_SERIAL_PORT",
    "COTEK_BAUD_RATE",
    "COTEK_POLL_INTERVAL_MS",
    "COTEK_REQUEST_TIMEOUT_MS",
    "COTEK_RECONNECT_INTERVAL_MS",
    "COTEK_HTTP_BIND",
    "COTEK_SEED_PATH",
];

fn clear_env() {
    for key in ENV_KEYS {
        env::remove_var(key);
    }
}

#[test]
fn toml_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("COTEK_CONFIG", fixture_path("config-valid.toml"));

    let config = AppConfig::load().expect("load config");
    config.validate().expect("validate config");
    assert_eq!(config.serial.port_path, "/dev/ttyUSB0");
    assert_eq!(config.poller.request_timeout, Duration::from_secs(1));
    assert_eq!(
        config.http_addr().expect("addr").map(|addr| addr.port()),
        Some(8089)
    );
    assert_eq!(
        config.seed_path.as_deref(),
        Some("/var/lib/cotek/last-state.json")
    );

    clear_env();
}

#[test]
fn json_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("COTEK_CONFIG", fixture_path("config-valid.json"));

    let config = AppConfig::load().expect("load config");
    config.validate().expect("validate config");
    assert_eq!(config.poller.poll_interval, Duration::from_millis(5_000));
    assert_eq!(config.poller.reconnect_interval, Duration::from_millis(2_000));

    clear_env();
}

#[test]
fn invalid_config_fails_validation() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("COTEK_CONFIG", fixture_path("config-invalid.toml"));

    let config = AppConfig::load().expect("load config");
    assert!(config.validate().is_err());

    clear_env();
}

#[test]
fn defaults_match_device() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();

    let config = AppConfig::load().expect("load config");
    config.validate().expect("validate config");
    assert_eq!(config.serial.baud_rate, 4_800);
    assert_eq!(config.poller.poll_interval, Duration::from_secs(10));
    assert_eq!(config.poller.reconnect_interval, Duration::from_secs(10));
    assert!(config.http_bind.is_none());
    assert!(config.seed_path.is_none());
}

#[test]
fn env_overrides_file_values() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("COTEK_SERIAL_PORT", "/dev/ttyS1");
    env::set_var("COTEK_BAUD_RATE", "9600");
    env::set_var("COTEK_REQUEST_TIMEOUT_MS", "250");
    env::set_var("COTEK_HTTP_BIND", "127.0.0.1:9000");

    let config = AppConfig::load_with_path(Some(fixture_path("config-valid.toml")))
        .expect("load config");
    config.validate().expect("validate config");
    assert_eq!(config.serial.port_path, "/dev/ttyS1");
    assert_eq!(config.serial.baud_rate, 9_600);
    assert_eq!(config.poller.request_timeout, Duration::from_millis(250));
    assert_eq!(config.http_bind.as_deref(), Some("127.0.0.1:9000"));

    clear_env();
}

#[test]
fn bad_bind_address_fails_validation() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("COTEK_HTTP_BIND", "not-an-address");

    let config = AppConfig::load().expect("load config");
    assert!(config.validate().is_err());

    clear_env();
}

#[test]
fn zero_baud_rate_fails_validation() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("COTEK_BAUD_RATE", "0");

    let config = AppConfig::load().expect("load config");
    assert!(config.validate().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();

    assert!(AppConfig::load_with_path(Some(fixture_path("does-not-exist.toml"))).is_err());
}

fn fixture_path(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path.to_string_lossy().to_string()
}
