//! Server configuration.
//!
//! Defaults, then environment variables, then positional command-line
//! arguments `<bind_addr> [data_file]`:
//!
//! - `CABTRACK_BIND`: listen address (default `127.0.0.1:3000`)
//! - `CABTRACK_DATA_FILE`: snapshot file; empty disables persistence
//!   (default `cabtrack.bin.gz`)
//! - `CABTRACK_LOG`: default log filter when `RUST_LOG` is unset (default `info`)
//! - `CABTRACK_MAX_UPLOAD`: largest accepted import upload in bytes (default 10 MiB)

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: String,
    pub data_file: Option<PathBuf>,
    pub log_level: String,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            data_file: Some(PathBuf::from("cabtrack.bin.gz")),
            log_level: "info".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Configuration from the process environment and arguments
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::from_sources(|key| std::env::var(key).ok(), &args)
    }

    /// Build from an environment lookup and positional arguments
    pub fn from_sources(env: impl Fn(&str) -> Option<String>, args: &[String]) -> Self {
        let mut config = Config::default();

        if let Some(bind) = env("CABTRACK_BIND").filter(|v| !v.is_empty()) {
            config.bind_addr = bind;
        }
        if let Some(file) = env("CABTRACK_DATA_FILE") {
            config.data_file = data_file(&file);
        }
        if let Some(level) = env("CABTRACK_LOG").filter(|v| !v.is_empty()) {
            config.log_level = level;
        }
        if let Some(max) = env("CABTRACK_MAX_UPLOAD").and_then(|v| v.parse().ok()) {
            config.max_upload_bytes = max;
        }

        if let Some(bind) = args.first() {
            config.bind_addr = bind.clone();
        }
        if let Some(file) = args.get(1) {
            config.data_file = data_file(file);
        }

        config
    }
}

fn data_file(value: &str) -> Option<PathBuf> {
    if value.trim().is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}
