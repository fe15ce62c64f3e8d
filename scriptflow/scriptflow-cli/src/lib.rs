//! Library for Scriptflow CLI commands and output formatting.

pub mod commands;
pub mod output;

pub use commands::Session;
pub use output::OutputFormat;
