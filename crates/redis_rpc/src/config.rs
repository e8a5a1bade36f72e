use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::channels::DEFAULT_CHANNEL_PREFIX;

/// Tunables shared by clients and servers.
///
/// Defaults match the wire contract: `localhost:6379`, a 30 s per-request
/// deadline, 100 server permits, the `redis-rpc` channel namespace, no
/// stack traces in failure responses, database 0.
#[derive(Clone, Debug)]
pub struct RpcOptions {
    /// Redis endpoint as `host:port`.
    pub connection_string: String,
    /// Deadline applied when a call does not specify its own.
    pub default_timeout: Duration,
    /// Server permit-pool size.
    pub max_concurrent_requests: usize,
    /// Channel namespace.
    pub channel_prefix: String,
    /// Whether failure responses carry a stack trace.
    pub include_stack_trace_in_errors: bool,
    /// Redis logical database index.
    pub database: i64,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            connection_string: "localhost:6379".to_string(),
            default_timeout: Duration::from_millis(30_000),
            max_concurrent_requests: 100,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            include_stack_trace_in_errors: false,
            database: 0,
        }
    }
}

impl RpcOptions {
    /// Starts from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Redis endpoint (`host:port`).
    pub fn connection_string(mut self, value: impl Into<String>) -> Self {
        self.connection_string = value.into();
        self
    }

    /// Sets the default per-request deadline.
    pub fn default_timeout(mut self, value: Duration) -> Self {
        self.default_timeout = value;
        self
    }

    /// Sets the server permit-pool size.
    pub fn max_concurrent_requests(mut self, value: usize) -> Self {
        self.max_concurrent_requests = value;
        self
    }

    /// Sets the channel namespace.
    pub fn channel_prefix(mut self, value: impl Into<String>) -> Self {
        self.channel_prefix = value.into();
        self
    }

    /// Enables or disables stack traces in failure responses.
    pub fn include_stack_trace_in_errors(mut self, value: bool) -> Self {
        self.include_stack_trace_in_errors = value;
        self
    }

    /// Sets the Redis logical database index.
    pub fn database(mut self, value: i64) -> Self {
        self.database = value;
        self
    }

    /// Redis connection URL for this endpoint and database.
    pub fn redis_url(&self) -> String {
        format!("redis://{}/{}", self.connection_string, self.database)
    }

    /// Loads options from a TOML file's `[rpc]` table, merged over the
    /// defaults. A missing file yields the defaults unchanged.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self::default().merge(file.rpc.unwrap_or_default()))
    }

    fn merge(mut self, overlay: OptionsOverlay) -> Self {
        if let Some(value) = overlay.connection_string {
            self.connection_string = value;
        }
        if let Some(value) = overlay.default_timeout_ms {
            self.default_timeout = Duration::from_millis(value);
        }
        if let Some(value) = overlay.max_concurrent_requests {
            self.max_concurrent_requests = value;
        }
        if let Some(value) = overlay.channel_prefix {
            self.channel_prefix = value;
        }
        if let Some(value) = overlay.include_stack_trace_in_errors {
            self.include_stack_trace_in_errors = value;
        }
        if let Some(value) = overlay.database {
            self.database = value;
        }
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    rpc: Option<OptionsOverlay>,
}

/// Partial options as they appear on disk.
#[derive(Debug, Default, Deserialize)]
struct OptionsOverlay {
    connection_string: Option<String>,
    default_timeout_ms: Option<u64>,
    max_concurrent_requests: Option<usize>,
    channel_prefix: Option<String>,
    include_stack_trace_in_errors: Option<bool>,
    database: Option<i64>,
}

/// Errors surfaced while loading options from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
