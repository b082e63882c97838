//! Environment-driven configuration. No config-file framework: every input
//! is a single environment variable read once at startup.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
	pub listen: String,
	pub redis_url: String,
	pub unsubscribe_linger: Duration,
	pub max_payload_bytes: usize,
	pub shutdown_drain: Duration,
}

impl Config {
	pub fn from_env() -> Self {
		Self {
			listen: env::var("QUILLSYNC_LISTEN").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
			redis_url: env::var("QUILLSYNC_REDIS_URL")
				.unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
			unsubscribe_linger: Duration::from_millis(env_u64("QUILLSYNC_UNSUBSCRIBE_LINGER_MS", 2000)),
			max_payload_bytes: env_u64("QUILLSYNC_MAX_PAYLOAD_BYTES", 1_048_576) as usize,
			shutdown_drain: Duration::from_millis(env_u64("QUILLSYNC_SHUTDOWN_DRAIN_MS", 5000)),
		}
	}
}

fn env_u64(key: &str, default: u64) -> u64 {
	env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// vim: ts=4
