use tracing_subscriber::EnvFilter;

/// Log targets of the benchmark crates, logged at all levels during tests.
const BENCH_TARGETS: &str = "ERROR,objbench=TRACE,objbench_engine=TRACE";

/// Initialize the logger for testing.
///
/// Logs go to the output captured by the Rust test runner. `RUST_LOG` replaces the default filter,
/// which only lets through errors from dependencies. Calling this more than once is harmless.
///
/// # Example
///
/// ```
/// objbench_test::tracing::init();
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(BENCH_TARGETS));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
