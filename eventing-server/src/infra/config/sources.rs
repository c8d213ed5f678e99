use std::path::PathBuf;

use eventing_core::query::QuotingPolicy;
use serde::{Deserialize, Serialize};

use super::models::BackendKind;

/// Raw configuration as written in `eventing.toml`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub backend: FileBackendConfig,
    #[serde(default)]
    pub buckets: FileBucketsConfig,
    #[serde(default)]
    pub queues: FileQueuesConfig,
    #[serde(default)]
    pub dispatcher: FileDispatcherConfig,
    #[serde(default)]
    pub timers: FileTimersConfig,
    #[serde(default)]
    pub query: FileQueryConfig,
    #[serde(default)]
    pub stats: FileStatsConfig,
    #[serde(default)]
    pub feed: FileFeedConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBackendConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBucketsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub travel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileQueuesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerts: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDispatcherConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_capacity: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileTimersConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileQueryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoting: Option<QuotingPolicy>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStatsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_failures: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFeedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<PathBuf>,
}

/// Environment-derived configuration values.
///
/// Values that are present but fail to parse are recorded in `rejected` so
/// the loader can warn about them instead of silently falling back.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub backend: Option<BackendKind>,
    pub redis_url: Option<String>,
    pub source_bucket: Option<String>,
    pub queue_prefix: Option<String>,
    pub max_in_flight: Option<usize>,
    pub timer_tick_ms: Option<u64>,
    pub quoting: Option<QuotingPolicy>,
    pub stats_interval_secs: Option<u64>,
    pub replay: Option<PathBuf>,
    pub rejected: Vec<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the environment view from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = Self::default();
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        env.config_path = var("EVENTING_CONFIG_PATH").map(PathBuf::from);
        env.server_host = var("EVENTING_HOST");
        env.server_port = env.parsed(&var, "EVENTING_PORT", |raw| raw.parse().ok());
        env.backend = env.parsed(&var, "EVENTING_BACKEND", |raw| raw.parse().ok());
        env.redis_url = var("EVENTING_REDIS_URL");
        env.source_bucket = var("EVENTING_SOURCE_BUCKET");
        env.queue_prefix = var("EVENTING_QUEUE_PREFIX");
        env.max_in_flight = env.parsed(&var, "EVENTING_MAX_IN_FLIGHT", |raw| raw.parse().ok());
        env.timer_tick_ms = env.parsed(&var, "EVENTING_TIMER_TICK_MS", |raw| raw.parse().ok());
        env.quoting = env.parsed(&var, "EVENTING_QUOTING", parse_quoting);
        env.stats_interval_secs =
            env.parsed(&var, "EVENTING_STATS_INTERVAL_SECS", |raw| raw.parse().ok());
        env.replay = var("EVENTING_REPLAY").map(PathBuf::from);

        env
    }

    fn parsed<T>(
        &mut self,
        var: &impl Fn(&str) -> Option<String>,
        name: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        let raw = var(name)?;
        let value = parse(raw.trim());
        if value.is_none() {
            self.rejected.push(name.to_string());
        }
        value
    }
}

fn parse_quoting(raw: &str) -> Option<QuotingPolicy> {
    match raw.to_ascii_lowercase().as_str() {
        "hyphen-heuristic" | "hyphen_heuristic" | "heuristic" => {
            Some(QuotingPolicy::HyphenHeuristic)
        }
        "strict" => Some(QuotingPolicy::Strict),
        _ => None,
    }
}
