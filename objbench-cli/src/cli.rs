use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use serde::Serialize;

use crate::config::Config;
use crate::{bench, observability};

/// Object storage benchmark.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Version(VersionCommand),
}

/// run the benchmark against the configured storage
///
/// All options override the configuration file and environment.
#[derive(Debug, Default, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// storage type: memory, filesystem, s3 or gcs
    #[argh(option)]
    protocol: Option<String>,

    /// URL of the storage endpoint
    #[argh(option, short = 'u')]
    endpoint: Option<String>,

    /// bucket for testing
    #[argh(option, short = 'b')]
    bucket: Option<String>,

    /// region for testing
    #[argh(option, short = 'r')]
    region: Option<String>,

    /// access key
    #[argh(option, short = 'a')]
    access_key: Option<String>,

    /// secret key
    #[argh(option, short = 's')]
    secret_key: Option<String>,

    /// directory for filesystem storage
    #[argh(option)]
    path: Option<PathBuf>,

    /// size of objects with unit suffix, e.g. 1MiB or 500KB
    #[argh(option, short = 'z')]
    size: Option<String>,

    /// size of multipart parts with unit suffix
    #[argh(option)]
    part_size: Option<String>,

    /// upload objects in parts
    #[argh(switch)]
    multipart: bool,

    /// number of parts uploaded concurrently within one upload
    #[argh(option)]
    multipart_concurrency: Option<usize>,

    /// number of parallel requests to run
    #[argh(option, short = 't')]
    threads: Option<usize>,

    /// duration of each phase in seconds
    #[argh(option, short = 'd')]
    duration: Option<u64>,

    /// number of times to repeat the test
    #[argh(option, short = 'l')]
    loops: Option<u32>,

    /// objects are created with key `<prefix>-<number>`
    #[argh(option)]
    prefix: Option<String>,

    /// number of retries on failure (S3 only)
    #[argh(option)]
    max_retries: Option<u32>,

    /// wait for confirmation between phases and loops
    #[argh(switch)]
    pause: bool,

    /// generate object contents on demand instead of sharing one buffer
    #[argh(switch)]
    streamed: bool,

    /// verbose error output
    #[argh(switch, short = 'v')]
    verbose: bool,
}

/// print the objbench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Configuration values set on the command line.
///
/// Unset values are skipped, so they don't shadow lower configuration layers.
#[derive(Debug, Default, Serialize)]
struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loops: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    object_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pause: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'static str>,
    storage: StorageOverrides,
    multipart: MultipartOverrides,
    logging: LoggingOverrides,
}

#[derive(Debug, Default, Serialize)]
struct StorageOverrides {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize)]
struct MultipartOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    part_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    concurrency: Option<usize>,
}

#[derive(Debug, Default, Serialize)]
struct LoggingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<&'static str>,
}

impl RunCommand {
    fn overrides(self) -> Overrides {
        Overrides {
            duration: self.duration.map(|secs| format!("{secs}s")),
            threads: self.threads,
            loops: self.loops,
            object_size: self.size,
            prefix: self.prefix,
            max_retries: self.max_retries,
            pause: self.pause.then_some(true),
            payload: self.streamed.then_some("streamed"),
            storage: StorageOverrides {
                protocol: self.protocol,
                endpoint: self.endpoint,
                bucket: self.bucket,
                region: self.region,
                access_key: self.access_key,
                secret_key: self.secret_key,
                path: self.path,
            },
            multipart: MultipartOverrides {
                enabled: self.multipart.then_some(true),
                part_size: self.part_size,
                concurrency: self.multipart_concurrency,
            },
            logging: LoggingOverrides {
                level: self.verbose.then_some("debug"),
            },
        }
    }
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let command = match args.command {
        Command::Version(VersionCommand {}) => {
            println!("objbench {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Run(command) => command,
    };

    let config = Config::load(args.config.as_deref(), &command.overrides())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("objbench-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    runtime.block_on(bench::run(config))
}
