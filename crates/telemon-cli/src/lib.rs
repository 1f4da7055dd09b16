//! telemon CLI library
//!
//! Argument parsing, configuration layering and the stdin console used by
//! the `telemon` binary.

pub mod cli;
pub mod config;
pub mod console;
pub mod error;

pub use cli::{Cli, PeerAddress};
pub use config::load_configuration;
pub use console::Console;
pub use error::{CliError, Result};
