//! Command-line interface module.

mod args;
pub mod check;
pub mod watch;

pub use args::{Cli, Commands};
