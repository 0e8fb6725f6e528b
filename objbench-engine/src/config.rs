//! Immutable configuration of a benchmark run.

use std::time::Duration;

use crate::error::ConfigError;
use crate::multipart::{DEFAULT_MULTIPART_CONCURRENCY, MultipartConfig};
use crate::payload::PayloadSource;

/// How upload contents are produced.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PayloadMode {
    /// Generate one buffer per run and share it between all uploads.
    #[default]
    Materialized,
    /// Generate contents per upload while sending them.
    Streamed,
}

/// A builder for creating a [`RunConfig`].
#[derive(Debug)]
pub struct RunConfigBuilder {
    object_size: u64,
    part_size: u64,
    use_multipart: bool,
    multipart_concurrency: usize,
    threads: usize,
    duration: Duration,
    loops: u32,
    prefix: String,
    pause_between_phases: bool,
    payload_mode: PayloadMode,
}

impl RunConfigBuilder {
    /// The size of every benchmark object in bytes.
    pub fn object_size(mut self, object_size: u64) -> Self {
        self.object_size = object_size;
        self
    }

    /// Uploads objects in parts of the given size.
    pub fn multipart(mut self, enabled: bool, part_size: u64) -> Self {
        self.use_multipart = enabled;
        self.part_size = part_size;
        self
    }

    /// The maximum number of parts in flight within one multipart upload.
    pub fn multipart_concurrency(mut self, concurrency: usize) -> Self {
        self.multipart_concurrency = concurrency;
        self
    }

    /// The number of parallel workers per phase.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// The wall-clock budget of the upload and download phases.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// How often the full upload, download and delete cycle is repeated.
    pub fn loops(mut self, loops: u32) -> Self {
        self.loops = loops;
        self
    }

    /// The prefix of all object keys.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Waits for manual confirmation between phases and loops.
    pub fn pause_between_phases(mut self, pause: bool) -> Self {
        self.pause_between_phases = pause;
        self
    }

    /// How upload contents are produced.
    pub fn payload_mode(mut self, mode: PayloadMode) -> Self {
        self.payload_mode = mode;
        self
    }

    /// Validates the settings and creates the configuration.
    pub fn build(self) -> Result<RunConfig, ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if self.object_size == 0 {
            return Err(ConfigError::EmptyObjects);
        }
        if self.use_multipart && self.part_size == 0 {
            return Err(ConfigError::EmptyParts);
        }
        if self.use_multipart && self.multipart_concurrency == 0 {
            return Err(ConfigError::NoMultipartConcurrency);
        }
        if self.loops == 0 {
            return Err(ConfigError::NoLoops);
        }
        if self.duration.is_zero() {
            return Err(ConfigError::NoDuration);
        }

        Ok(RunConfig {
            object_size: self.object_size,
            part_size: self.part_size,
            use_multipart: self.use_multipart,
            multipart_concurrency: self.multipart_concurrency,
            threads: self.threads,
            duration: self.duration,
            loops: self.loops,
            prefix: self.prefix,
            pause_between_phases: self.pause_between_phases,
            payload_mode: self.payload_mode,
        })
    }
}

/// Settings of a benchmark run.
///
/// The configuration is validated once when it is built and is read-only afterwards.
#[derive(Clone, Debug)]
pub struct RunConfig {
    object_size: u64,
    part_size: u64,
    use_multipart: bool,
    multipart_concurrency: usize,
    threads: usize,
    duration: Duration,
    loops: u32,
    prefix: String,
    pause_between_phases: bool,
    payload_mode: PayloadMode,
}

impl RunConfig {
    /// Constructs a new builder with the default settings.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            object_size: 1024 * 1024,
            part_size: 5 * 1024 * 1024,
            use_multipart: false,
            multipart_concurrency: DEFAULT_MULTIPART_CONCURRENCY,
            threads: 1,
            duration: Duration::from_secs(60),
            loops: 1,
            prefix: "Object".into(),
            pause_between_phases: false,
            payload_mode: PayloadMode::default(),
        }
    }

    /// The size of every object in bytes.
    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    /// The size of multipart parts in bytes.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Whether objects are uploaded in parts.
    pub fn use_multipart(&self) -> bool {
        self.use_multipart
    }

    /// The maximum number of parts in flight within one multipart upload.
    pub fn multipart_concurrency(&self) -> usize {
        self.multipart_concurrency
    }

    /// Multipart settings for backends, if multipart uploads are enabled.
    pub fn multipart(&self) -> Option<MultipartConfig> {
        self.use_multipart.then_some(MultipartConfig {
            part_size: self.part_size,
            concurrency: self.multipart_concurrency,
        })
    }

    /// The number of workers per phase.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// The budget of every timed phase.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The number of loops to run.
    pub fn loops(&self) -> u32 {
        self.loops
    }

    /// The prefix of all object keys.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether the run waits for confirmation between phases.
    pub fn pause_between_phases(&self) -> bool {
        self.pause_between_phases
    }

    /// How upload contents are produced.
    pub fn payload_mode(&self) -> PayloadMode {
        self.payload_mode
    }

    /// Creates the payload source for a run, materializing contents if configured.
    pub fn payload_source(&self) -> PayloadSource {
        match self.payload_mode {
            PayloadMode::Materialized => PayloadSource::materialize(self.object_size),
            PayloadMode::Streamed => PayloadSource::streamed(self.object_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::builder().build().unwrap();
        assert_eq!(config.object_size(), 1024 * 1024);
        assert_eq!(config.threads(), 1);
        assert_eq!(config.prefix(), "Object");
        assert_eq!(config.multipart(), None);
    }

    #[test]
    fn multipart_settings() {
        let config = RunConfig::builder()
            .object_size(1_000_000)
            .multipart(true, 400_000)
            .multipart_concurrency(2)
            .build()
            .unwrap();

        let multipart = config.multipart().unwrap();
        assert_eq!(multipart.concurrency, 2);
        assert_eq!(multipart.plan(config.object_size()).len(), 3);
    }

    #[test]
    fn rejects_invalid_settings() {
        let err = RunConfig::builder().threads(0).build().unwrap_err();
        assert_eq!(err, ConfigError::NoThreads);

        let err = RunConfig::builder().multipart(true, 0).build().unwrap_err();
        assert_eq!(err, ConfigError::EmptyParts);

        // the part size does not matter without multipart
        assert!(RunConfig::builder().multipart(false, 0).build().is_ok());

        let err = RunConfig::builder()
            .duration(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::NoDuration);
    }

    #[test]
    fn payload_source_follows_mode() {
        let config = RunConfig::builder()
            .object_size(64)
            .payload_mode(PayloadMode::Streamed)
            .build()
            .unwrap();
        assert!(matches!(
            config.payload_source(),
            PayloadSource::Streamed { size: 64 }
        ));
    }
}
