use std::path::PathBuf;

use clap::Parser;

/// Report card sidecar: JSON requests on stdin, one JSON response per line on
/// stdout.
#[derive(Parser, Debug)]
#[command(name = "reportcardd", version, about)]
pub struct Cli {
    /// Workspace directory to open at startup.
    #[arg(long, env = "REPORTCARDD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Tracing filter, e.g. `info` or `reportcardd=debug`.
    #[arg(long, env = "REPORTCARDD_LOG", default_value = "info")]
    pub log: String,
}
