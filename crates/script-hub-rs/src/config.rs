use clap::Parser;
use script_hub_core::{
    hub::DEFAULT_QUEUE_CAPACITY, protocol::DEFAULT_MAX_MESSAGE_BYTES, HubConfig,
};
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_LOG_DIR: &str = ".script-hub/logs";
const DEFAULT_LOG_FILE: &str = "script-hub.log";

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub debug: bool,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    pub max_message_bytes: usize,
    pub log_dir: String,
    pub log_file: String,
}

impl Config {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.queue_capacity,
            max_message_bytes: self.max_message_bytes,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            debug: false,
            ping_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(2),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            log_dir: String::new(),
            log_file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "script-hub-rs")]
pub struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    /// Seconds between WebSocket pings; 0 disables.
    #[arg(long, default_value_t = 30)]
    ping_interval: u64,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    max_message_bytes: usize,
    #[arg(long)]
    log_dir: Option<String>,
    #[arg(long)]
    log_file: Option<String>,
}

pub fn load_config() -> Config {
    from_args(Args::parse())
}

pub fn from_args(args: Args) -> Config {
    Config {
        addr: resolve_addr(&args.addr),
        debug: args.debug || env_true("SCRIPT_HUB_DEBUG"),
        ping_interval: Duration::from_secs(args.ping_interval),
        write_timeout: Duration::from_secs(args.write_timeout.max(1)),
        queue_capacity: args.queue_capacity.max(1),
        max_message_bytes: args.max_message_bytes,
        log_dir: resolve_log_dir(args.log_dir.as_deref()),
        log_file: resolve_log_file(args.log_file.as_deref()),
    }
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn resolve_addr(addr_flag: &str) -> String {
    if !addr_flag.trim().is_empty() {
        return addr_flag.to_string();
    }
    if let Ok(value) = std::env::var("SCRIPT_HUB_ADDR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    format!("0.0.0.0:{port}")
}

fn resolve_log_dir(log_dir_flag: Option<&str>) -> String {
    if let Some(value) = log_dir_flag {
        return value.to_string();
    }
    if let Ok(value) = std::env::var("SCRIPT_HUB_LOG_DIR") {
        return value;
    }
    DEFAULT_LOG_DIR.to_string()
}

fn resolve_log_file(log_file_flag: Option<&str>) -> String {
    if let Some(value) = log_file_flag {
        return value.to_string();
    }
    match std::env::var("SCRIPT_HUB_LOG_FILE") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => DEFAULT_LOG_FILE.to_string(),
    }
}
