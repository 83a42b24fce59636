//! Command-line interface

pub mod args;
pub mod commands;
mod driver;
mod ui;

pub use args::{Cli, Commands};
pub use driver::{Driver, RECORD_FILE};
