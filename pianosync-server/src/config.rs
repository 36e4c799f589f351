use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use pianosync_net::config::{
    BatchingConfig, NetConfig, QueueConfig, RateLimitConfig, ReliabilityConfig,
};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

const DEFAULT_BIND: &str = "0.0.0.0:9999";

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    batching: BatchingSection,
    #[serde(default)]
    rate_limit: RateLimitSection,
    #[serde(default)]
    reliability: ReliabilitySection,
    #[serde(default)]
    queue: QueueSection,
}

#[derive(Deserialize, Default)]
struct ServerSection {
    bind: Option<String>,
}

#[derive(Deserialize, Default)]
struct BatchingSection {
    max_batch_size: Option<usize>,
    max_batch_delay_ms: Option<u64>,
    priority_threshold: Option<u8>,
}

#[derive(Deserialize, Default)]
struct RateLimitSection {
    max_messages_per_second: Option<u32>,
    max_burst_size: Option<u32>,
}

#[derive(Deserialize, Default)]
struct ReliabilitySection {
    heartbeat_interval_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    base_reconnect_delay_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    max_reconnect_delay_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct QueueSection {
    max_queue_len: Option<usize>,
}

pub struct Config {
    file: ConfigFile,
}

impl Config {
    /// Embedded defaults merged with the user's config file, if there is one.
    pub fn load() -> Self {
        Self::from_sources(user_config_path().as_deref())
    }

    /// Embedded defaults merged with the file at `path`.
    pub fn load_from(path: &Path) -> Self {
        Self::from_sources(Some(path))
    }

    fn from_sources(user_path: Option<&Path>) -> Self {
        let mut base: ConfigFile = toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::error!(target: "config", "embedded config.toml is invalid: {}", e);
            ConfigFile::default()
        });

        if let Some(path) = user_path {
            if path.exists() {
                match std::fs::read_to_string(path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => merge(&mut base, user),
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        Config { file: base }
    }

    pub fn bind_addr(&self) -> String {
        self.file
            .server
            .bind
            .clone()
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
    }

    /// Resolve every knob, falling back to the network layer's defaults and
    /// clamping values that would stall the reliability controller.
    pub fn net_config(&self) -> NetConfig {
        let fallback = NetConfig::default();
        let batching = &self.file.batching;
        let rate_limit = &self.file.rate_limit;
        let reliability = &self.file.reliability;

        NetConfig {
            batching: BatchingConfig {
                max_batch_size: batching
                    .max_batch_size
                    .unwrap_or(fallback.batching.max_batch_size)
                    .max(1),
                max_batch_delay: batching
                    .max_batch_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(fallback.batching.max_batch_delay),
                priority_threshold: batching
                    .priority_threshold
                    .unwrap_or(fallback.batching.priority_threshold),
            },
            rate_limit: RateLimitConfig {
                max_messages_per_second: rate_limit
                    .max_messages_per_second
                    .unwrap_or(fallback.rate_limit.max_messages_per_second),
                max_burst_size: rate_limit
                    .max_burst_size
                    .unwrap_or(fallback.rate_limit.max_burst_size),
            },
            reliability: ReliabilityConfig {
                heartbeat_interval: reliability
                    .heartbeat_interval_ms
                    .map(|ms| Duration::from_millis(ms.max(1)))
                    .unwrap_or(fallback.reliability.heartbeat_interval),
                max_reconnect_attempts: reliability
                    .max_reconnect_attempts
                    .unwrap_or(fallback.reliability.max_reconnect_attempts),
                base_reconnect_delay: reliability
                    .base_reconnect_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(fallback.reliability.base_reconnect_delay),
                backoff_multiplier: reliability
                    .backoff_multiplier
                    .filter(|m| m.is_finite() && *m >= 1.0)
                    .unwrap_or(fallback.reliability.backoff_multiplier),
                max_reconnect_delay: reliability
                    .max_reconnect_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(fallback.reliability.max_reconnect_delay),
            },
            queue: QueueConfig {
                max_queue_len: self
                    .file
                    .queue
                    .max_queue_len
                    .unwrap_or(fallback.queue.max_queue_len)
                    .max(1),
            },
        }
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pianosync").join("config.toml"))
}

fn merge(base: &mut ConfigFile, user: ConfigFile) {
    if user.server.bind.is_some() {
        base.server.bind = user.server.bind;
    }
    merge_batching(&mut base.batching, user.batching);
    merge_rate_limit(&mut base.rate_limit, user.rate_limit);
    merge_reliability(&mut base.reliability, user.reliability);
    if user.queue.max_queue_len.is_some() {
        base.queue.max_queue_len = user.queue.max_queue_len;
    }
}

fn merge_batching(base: &mut BatchingSection, user: BatchingSection) {
    if user.max_batch_size.is_some() {
        base.max_batch_size = user.max_batch_size;
    }
    if user.max_batch_delay_ms.is_some() {
        base.max_batch_delay_ms = user.max_batch_delay_ms;
    }
    if user.priority_threshold.is_some() {
        base.priority_threshold = user.priority_threshold;
    }
}

fn merge_rate_limit(base: &mut RateLimitSection, user: RateLimitSection) {
    if user.max_messages_per_second.is_some() {
        base.max_messages_per_second = user.max_messages_per_second;
    }
    if user.max_burst_size.is_some() {
        base.max_burst_size = user.max_burst_size;
    }
}

fn merge_reliability(base: &mut ReliabilitySection, user: ReliabilitySection) {
    if user.heartbeat_interval_ms.is_some() {
        base.heartbeat_interval_ms = user.heartbeat_interval_ms;
    }
    if user.max_reconnect_attempts.is_some() {
        base.max_reconnect_attempts = user.max_reconnect_attempts;
    }
    if user.base_reconnect_delay_ms.is_some() {
        base.base_reconnect_delay_ms = user.base_reconnect_delay_ms;
    }
    if user.backoff_multiplier.is_some() {
        base.backoff_multiplier = user.backoff_multiplier;
    }
    if user.max_reconnect_delay_ms.is_some() {
        base.max_reconnect_delay_ms = user.max_reconnect_delay_ms;
    }
}
