use std::{
    fmt,
    net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use eventing_core::dispatch::DispatcherConfig;
use eventing_core::query::QuotingPolicy;
use serde::{Deserialize, Serialize};

/// Effective configuration after env, file and defaults are merged.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub buckets: BucketsConfig,
    pub queues: QueuesConfig,
    pub dispatcher: DispatcherConfig,
    pub timers: TimersConfig,
    pub query: QueryConfig,
    pub stats: StatsConfig,
    pub feed: FeedConfig,
    #[serde(skip)]
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Defaults with no file and no environment: in-memory backends on
    /// `0.0.0.0:8096`.
    pub fn in_memory() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::Memory,
            buckets: BucketsConfig::default(),
            queues: QueuesConfig::default(),
            dispatcher: DispatcherConfig::default(),
            timers: TimersConfig::default(),
            query: QueryConfig::default(),
            stats: StatsConfig::default(),
            feed: FeedConfig::default(),
            metadata: ConfigMetadata::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Socket address to bind. The host must be an IP literal (IPv6 with or
    /// without brackets) or `localhost`.
    pub fn listen_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let host = self.host.trim();
        let ip = if host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            host.trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()?
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
        })
    }
}

/// Where buckets and queues live.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory,
    Redis { url: String },
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Memory => BackendKind::Memory,
            BackendConfig::Redis { .. } => BackendKind::Redis,
        }
    }
}

// The redis URL may carry credentials.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Memory => f.write_str("Memory"),
            BackendConfig::Redis { .. } => f.debug_struct("Redis").finish_non_exhaustive(),
        }
    }
}

/// Bucket bindings. Every name here is created up front on the in-memory
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketsConfig {
    /// Bucket whose changes feed the handlers.
    pub source: String,
    pub beer: String,
    pub travel: String,
    pub credit: String,
    pub audit: String,
}

impl Default for BucketsConfig {
    fn default() -> Self {
        Self {
            source: "src_bucket".to_string(),
            beer: "beer-sample".to_string(),
            travel: "travel-sample".to_string(),
            credit: "credit".to_string(),
            audit: "audit".to_string(),
        }
    }
}

impl BucketsConfig {
    pub fn named(&self) -> [(&'static str, &str); 5] {
        [
            ("source", self.source.as_str()),
            ("beer", self.beer.as_str()),
            ("travel", self.travel.as_str()),
            ("credit", self.credit.as_str()),
            ("audit", self.audit.as_str()),
        ]
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .named()
            .iter()
            .map(|(_, name)| name.to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuesConfig {
    pub prefix: String,
    /// Receives high-risk credit profiles.
    pub alerts: String,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            prefix: "eventing".to_string(),
            alerts: "credit-alerts".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimersConfig {
    pub tick_ms: u64,
    pub audit_delay_secs: u64,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            audit_delay_secs: 60,
        }
    }
}

impl TimersConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Delay between scoring a profile and auditing it, saturating at the
    /// largest representable delta.
    pub fn audit_delay(&self) -> chrono::Duration {
        chrono::Duration::from_std(Duration::from_secs(self.audit_delay_secs))
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryConfig {
    pub quoting: QuotingPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsConfig {
    /// Zero disables the periodic stats line.
    pub interval_secs: u64,
    pub recent_failures: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            recent_failures: 32,
        }
    }
}

impl StatsConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedConfig {
    /// JSON-lines file replayed into the dispatcher at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn server(host: &str) -> ServerConfig {
        ServerConfig {
            host: host.to_string(),
            port: 8096,
        }
    }

    #[test]
    fn listen_addr_accepts_ipv4_ipv6_and_localhost() {
        assert_eq!(
            server("0.0.0.0").listen_addr().unwrap(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8096)
        );
        let loopback6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 8096);
        assert_eq!(server("::1").listen_addr().unwrap(), loopback6);
        assert_eq!(server("[::1]").listen_addr().unwrap(), loopback6);
        assert_eq!(
            server("localhost").listen_addr().unwrap().ip(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert!(server("eventing.internal").listen_addr().is_err());
    }

    #[test]
    fn audit_delay_saturates() {
        let timers = TimersConfig {
            audit_delay_secs: u64::MAX,
            ..TimersConfig::default()
        };
        assert_eq!(timers.audit_delay(), chrono::Duration::MAX);
    }
}
