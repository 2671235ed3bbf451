pub mod config;
pub mod http;
pub mod seed;
pub mod sink;

pub use config::AppConfig;
