//! Command-line interface for keyword-forge.
//!
//! Provides commands for seeding domains, running the research pipeline and
//! inspecting checkpoints and generated phrases.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, SeedFile, SeedKeyword};
