//! CLI command handlers, one per file.

mod completions;
mod config;
mod run;

pub use completions::run_completions;
pub use config::run_show_config;
pub use run::run_batch;
