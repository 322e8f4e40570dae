//! Tally CLI library.
//!
//! This crate provides the command-line interface over the tally record store.

mod cli;
pub mod commands;
mod config;

pub use cli::{AddArgs, Cli, Commands, RangeArgs};
pub use config::Config;
