use eventing_core::query::QuotingPolicy;
use thiserror::Error;

use super::models::{BackendConfig, Config};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("dispatcher.max_in_flight must be at least 1")]
    ZeroInFlight,
    #[error("dispatcher.outcome_capacity must be at least 1")]
    ZeroOutcomeCapacity,
    #[error("timers.tick_ms must be at least 1")]
    ZeroTick,
    #[error("bucket name for `{field}` must not be empty")]
    EmptyBucketName { field: &'static str },
    #[error("queue name for `{field}` must not be empty")]
    EmptyQueueName { field: &'static str },
    #[error("redis backend selected but no redis URL configured")]
    MissingRedisUrl,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.items.iter().any(|item| item.message.contains(needle))
    }
}

/// Hard errors for settings the runtime cannot start with, warnings for
/// settings it can start with but probably should not.
pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigValidationError> {
    let mut warnings = ConfigWarnings::default();

    if config.dispatcher.max_in_flight == 0 {
        return Err(ConfigValidationError::ZeroInFlight);
    }
    if config.dispatcher.outcome_capacity == 0 {
        return Err(ConfigValidationError::ZeroOutcomeCapacity);
    }
    if config.timers.tick_ms == 0 {
        return Err(ConfigValidationError::ZeroTick);
    }
    for (field, name) in config.buckets.named() {
        if name.trim().is_empty() {
            return Err(ConfigValidationError::EmptyBucketName { field });
        }
    }
    if config.queues.alerts.trim().is_empty() {
        return Err(ConfigValidationError::EmptyQueueName { field: "alerts" });
    }
    if let BackendConfig::Redis { url } = &config.backend
        && url.trim().is_empty()
    {
        return Err(ConfigValidationError::MissingRedisUrl);
    }

    if config.backend == BackendConfig::Memory {
        warnings.push_with_hint(
            "in-memory backend selected; buckets, queues and timers are lost on restart",
            "Set EVENTING_REDIS_URL or backend.redis_url to persist documents and queues",
        );
    }

    if config.query.quoting == QuotingPolicy::HyphenHeuristic {
        warnings.push_with_hint(
            "query substitutions are emitted verbatim; values containing quotes can alter a query",
            "Set query.quoting = \"strict\" to reject such values",
        );
    }

    if config.stats.interval().is_none() {
        warnings.push("stats.interval_secs is 0; periodic dispatcher stats are disabled");
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_with_warnings() {
        let warnings = apply_guard_rails(&Config::in_memory()).unwrap();
        assert!(warnings.contains("in-memory backend"));
        assert!(warnings.contains("verbatim"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = Config::in_memory();
        config.dispatcher.max_in_flight = 0;
        assert_eq!(
            apply_guard_rails(&config).unwrap_err(),
            ConfigValidationError::ZeroInFlight
        );

        let mut config = Config::in_memory();
        config.timers.tick_ms = 0;
        assert_eq!(
            apply_guard_rails(&config).unwrap_err(),
            ConfigValidationError::ZeroTick
        );
    }

    #[test]
    fn blank_bucket_names_are_rejected() {
        let mut config = Config::in_memory();
        config.buckets.travel = " ".into();
        assert_eq!(
            apply_guard_rails(&config).unwrap_err(),
            ConfigValidationError::EmptyBucketName { field: "travel" }
        );
    }

    #[test]
    fn strict_quoting_on_redis_is_quiet() {
        let mut config = Config::in_memory();
        config.backend = BackendConfig::Redis {
            url: "redis://127.0.0.1:6379".into(),
        };
        config.query.quoting = QuotingPolicy::Strict;
        assert!(apply_guard_rails(&config).unwrap().is_empty());
    }
}
