//! Command line interface of the object storage benchmark.
//!
//! The `run` command uploads, downloads and deletes objects against the configured storage for a
//! fixed time per phase and prints throughput figures for every loop.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod bench;
mod cli;
mod config;
mod observability;
mod report;
mod storage;

fn main() -> anyhow::Result<()> {
    cli::execute()
}
