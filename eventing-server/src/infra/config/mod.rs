pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    BackendConfig, BackendKind, BucketsConfig, Config, ConfigMetadata, FeedConfig, QueryConfig,
    QueuesConfig, ServerConfig, StatsConfig, TimersConfig,
};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigValidationError, ConfigWarning, ConfigWarnings};
