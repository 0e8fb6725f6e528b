//! Configuration for the benchmark binary.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags of the `run` command
//! 2. Environment variables (prefixed with `OBJBENCH__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `OBJBENCH__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `OBJBENCH__THREADS=16` sets the number of workers
//! - `OBJBENCH__STORAGE__TYPE=s3` selects the S3 backend
//! - `OBJBENCH__STORAGE__BUCKET=bench` sets the bucket
//!
//! # YAML Configuration File
//!
//! ```yaml
//! threads: 16
//! duration: 30s
//! object_size: 4MiB
//!
//! storage:
//!   type: s3
//!   endpoint: http://localhost:9000
//!   bucket: bench
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use objbench_engine::multipart::DEFAULT_MULTIPART_CONCURRENCY;
use objbench_engine::{ConfigError, PayloadMode, RunConfig};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "OBJBENCH__";

/// Newtype around `String` that keeps secrets out of debug output.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

/// Storage backend configuration.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// In-process storage (type `"memory"`), useful for dry runs.
    Memory {
        /// Artificial latency added to every call.
        #[serde(default, with = "humantime_serde")]
        latency: Duration,
    },

    /// Local filesystem storage (type `"filesystem"`).
    FileSystem {
        /// Directory path for storing objects. Created if it doesn't exist.
        path: PathBuf,
    },

    /// S3-compatible storage (type `"s3"`).
    ///
    /// Without static keys, credentials are taken from the AWS environment.
    S3 {
        /// Optional endpoint URL for S3-compatible services.
        #[serde(default)]
        endpoint: Option<String>,
        /// The name of the bucket to use.
        #[serde(default)]
        bucket: String,
        /// The signing region.
        #[serde(default)]
        region: Option<String>,
        /// Static access key.
        #[serde(default)]
        access_key: Option<String>,
        /// Static secret key.
        #[serde(default)]
        secret_key: Option<ConfigSecret>,
        /// Use path-style bucket addressing.
        #[serde(default)]
        path_style: bool,
    },

    /// Google Cloud Storage (type `"gcs"`).
    ///
    /// Authenticates with Application Default Credentials unless a custom endpoint is set.
    Gcs {
        /// Optional endpoint URL, such as an emulator.
        #[serde(default)]
        endpoint: Option<String>,
        /// The name of the bucket to use.
        #[serde(default)]
        bucket: String,
    },
}

impl Storage {
    /// The protocol name as used in configuration.
    pub fn protocol(&self) -> &'static str {
        match self {
            Storage::Memory { .. } => "memory",
            Storage::FileSystem { .. } => "filesystem",
            Storage::S3 { .. } => "s3",
            Storage::Gcs { .. } => "gcs",
        }
    }

    /// The endpoint requests are sent to, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Storage::S3 { endpoint, .. } | Storage::Gcs { endpoint, .. } => endpoint.as_deref(),
            Storage::Memory { .. } | Storage::FileSystem { .. } => None,
        }
    }

    /// The bucket or directory objects are written to.
    pub fn container(&self) -> String {
        match self {
            Storage::S3 { bucket, .. } | Storage::Gcs { bucket, .. } => bucket.clone(),
            Storage::FileSystem { path } => path.display().to_string(),
            Storage::Memory { .. } => "-".into(),
        }
    }

    /// The region, for storage types that have one.
    pub fn region(&self) -> Option<&str> {
        match self {
            Storage::S3 { region, .. } => region.as_deref(),
            _ => None,
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Storage::Memory {
            latency: Duration::ZERO,
        }
    }
}

/// Multipart upload configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Multipart {
    /// Upload objects in parts.
    pub enabled: bool,
    /// Size of every part except possibly the last one.
    pub part_size: ByteSize,
    /// Parts in flight within one upload.
    pub concurrency: usize,
}

impl Default for Multipart {
    fn default() -> Self {
        Self {
            enabled: false,
            part_size: ByteSize::mib(5),
            concurrency: DEFAULT_MULTIPART_CONCURRENCY,
        }
    }
}

/// How upload contents are produced.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    /// One shared buffer generated at startup.
    #[default]
    Materialized,
    /// Contents generated on demand for every upload.
    Streamed,
}

impl From<Payload> for PayloadMode {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Materialized => PayloadMode::Materialized,
            Payload::Streamed => PayloadMode::Streamed,
        }
    }
}

/// Format of log lines written to stderr.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// [`LogFormat::Pretty`] on a terminal, [`LogFormat::Simplified`] otherwise.
    #[default]
    Auto,
    /// Colored multi-field output.
    Pretty,
    /// Compact plain text.
    Simplified,
    /// One JSON object per line.
    Json,
}

/// (De)serializes a [`LevelFilter`] through its textual form, such as `"debug"` or `"off"`.
mod level_filter {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use tracing::level_filters::LevelFilter;

    pub fn serialize<S: Serializer>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(level)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = String::deserialize(deserializer)?;
        level.parse().map_err(de::Error::custom)
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum level of logged events. `RUST_LOG` takes precedence if set.
    #[serde(with = "level_filter")]
    pub level: LevelFilter,

    /// Format of log lines.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::default(),
        }
    }
}

/// Benchmark configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The storage to benchmark.
    pub storage: Storage,

    /// Wall-clock budget of every upload and download phase.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Number of parallel workers.
    pub threads: usize,

    /// Number of upload, download and delete cycles.
    pub loops: u32,

    /// Size of every object.
    pub object_size: ByteSize,

    /// Multipart upload settings.
    pub multipart: Multipart,

    /// Objects are stored under `<prefix>-<number>`.
    pub prefix: String,

    /// Retries performed by the storage client for every request. Only used by S3.
    pub max_retries: u32,

    /// Wait for confirmation between phases and loops.
    pub pause: bool,

    /// How upload contents are produced.
    pub payload: Payload,

    /// Logging settings.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: Storage::default(),
            duration: Duration::from_secs(60),
            threads: 1,
            loops: 1,
            object_size: ByteSize::mib(1),
            multipart: Multipart::default(),
            prefix: "Object".into(),
            max_retries: 0,
            pause: false,
            payload: Payload::default(),
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided sources.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if `path` is given)
    /// 3. Environment variables (prefixed with `OBJBENCH__`)
    /// 4. Command line overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, or if any source contains an
    /// invalid value.
    pub fn load<T: Serialize>(path: Option<&Path>, overrides: &T) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        Ok(config)
    }

    /// Validates the benchmark settings and converts them into a [`RunConfig`].
    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        RunConfig::builder()
            .object_size(self.object_size.as_u64())
            .multipart(self.multipart.enabled, self.multipart.part_size.as_u64())
            .multipart_concurrency(self.multipart.concurrency)
            .threads(self.threads)
            .duration(self.duration)
            .loops(self.loops)
            .prefix(self.prefix.as_str())
            .pause_between_phases(self.pause)
            .payload_mode(self.payload.into())
            .build()
    }
}
