use std::{fs, path::PathBuf};

use eventing_core::dispatch::DispatcherConfig;
use thiserror::Error;

use super::{
    models::{
        BackendConfig, BackendKind, BucketsConfig, Config, ConfigMetadata, FeedConfig,
        QueryConfig, QueuesConfig, ServerConfig, StatsConfig, TimersConfig,
    },
    sources::{EnvConfig, FileBackendConfig, FileConfig},
    validation::{self, ConfigValidationError, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["eventing.toml", "config/eventing.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Replaces the process environment, mostly for tests.
    pub env: Option<EnvConfig>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.options.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let env_config = self.options.env.clone().unwrap_or_else(EnvConfig::gather);

        let (file_config, config_path) = self.load_file_config(&env_config)?;

        let (config, warnings) =
            self.compose_config(file_config, env_config, config_path, env_file_loaded)?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        } else {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists());
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
            path: path.clone(),
            source: err,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
        env_file_loaded: bool,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No eventing.toml detected; using environment variables and defaults",
                "Pass --config or set EVENTING_CONFIG_PATH to load a configuration file",
            );
        }

        for name in &env.rejected {
            warnings.push(format!("ignoring {name}: value could not be parsed"));
        }

        let FileConfig {
            server: file_server,
            backend: file_backend,
            buckets: file_buckets,
            queues: file_queues,
            dispatcher: file_dispatcher,
            timers: file_timers,
            query: file_query,
            stats: file_stats,
            feed: file_feed,
        } = file_config.unwrap_or_default();

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: env
                .server_host
                .clone()
                .or(file_server.host)
                .unwrap_or(server_defaults.host),
            port: env
                .server_port
                .or(file_server.port)
                .unwrap_or(server_defaults.port),
        };

        let backend = resolve_backend(&env, file_backend, &mut warnings)?;

        let bucket_defaults = BucketsConfig::default();
        let buckets = BucketsConfig {
            source: env
                .source_bucket
                .clone()
                .or(file_buckets.source)
                .unwrap_or(bucket_defaults.source),
            beer: file_buckets.beer.unwrap_or(bucket_defaults.beer),
            travel: file_buckets.travel.unwrap_or(bucket_defaults.travel),
            credit: file_buckets.credit.unwrap_or(bucket_defaults.credit),
            audit: file_buckets.audit.unwrap_or(bucket_defaults.audit),
        };

        let queue_defaults = QueuesConfig::default();
        let queues = QueuesConfig {
            prefix: env
                .queue_prefix
                .clone()
                .or(file_queues.prefix)
                .unwrap_or(queue_defaults.prefix),
            alerts: file_queues.alerts.unwrap_or(queue_defaults.alerts),
        };

        let dispatcher_defaults = DispatcherConfig::default();
        let dispatcher = DispatcherConfig {
            max_in_flight: env
                .max_in_flight
                .or(file_dispatcher.max_in_flight)
                .unwrap_or(dispatcher_defaults.max_in_flight),
            outcome_capacity: file_dispatcher
                .outcome_capacity
                .unwrap_or(dispatcher_defaults.outcome_capacity),
        };

        let timer_defaults = TimersConfig::default();
        let timers = TimersConfig {
            tick_ms: env
                .timer_tick_ms
                .or(file_timers.tick_ms)
                .unwrap_or(timer_defaults.tick_ms),
            audit_delay_secs: file_timers
                .audit_delay_secs
                .unwrap_or(timer_defaults.audit_delay_secs),
        };

        let query = QueryConfig {
            quoting: env.quoting.or(file_query.quoting).unwrap_or_default(),
        };

        let stats_defaults = StatsConfig::default();
        let stats = StatsConfig {
            interval_secs: env
                .stats_interval_secs
                .or(file_stats.interval_secs)
                .unwrap_or(stats_defaults.interval_secs),
            recent_failures: file_stats
                .recent_failures
                .unwrap_or(stats_defaults.recent_failures),
        };

        let feed = FeedConfig {
            replay: env.replay.clone().or(file_feed.replay),
        };

        let config = Config {
            server,
            backend,
            buckets,
            queues,
            dispatcher,
            timers,
            query,
            stats,
            feed,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok((config, warnings))
    }
}

/// An explicit `kind` wins; otherwise a configured URL selects redis.
fn resolve_backend(
    env: &EnvConfig,
    file: FileBackendConfig,
    warnings: &mut ConfigWarnings,
) -> Result<BackendConfig, ConfigLoadError> {
    let url = env.redis_url.clone().or(file.redis_url);
    let kind = env.backend.or(file.kind).unwrap_or(match url {
        Some(_) => BackendKind::Redis,
        None => BackendKind::Memory,
    });

    match (kind, url) {
        (BackendKind::Memory, Some(_)) => {
            warnings.push("redis URL configured but backend is `memory`; the URL is ignored");
            Ok(BackendConfig::Memory)
        }
        (BackendKind::Memory, None) => Ok(BackendConfig::Memory),
        (BackendKind::Redis, Some(url)) => Ok(BackendConfig::Redis { url }),
        (BackendKind::Redis, None) => Err(ConfigValidationError::MissingRedisUrl.into()),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(self, ConfigPathProvenance::Explicit | ConfigPathProvenance::Env)
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
