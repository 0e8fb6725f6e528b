//! Test utilities for the objbench workspace.
//!
//! See the modules for all available utilities.

pub mod tracing;
