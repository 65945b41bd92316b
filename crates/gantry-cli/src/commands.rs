//! CLI command definitions.

use clap::{Subcommand, ValueEnum};

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new workflow
    Init,

    /// Validate a workflow definition
    Validate {
        /// Path to workflow file; searched in standard locations when omitted
        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// Run a workflow for a simulated repository event
    Run {
        /// Path to workflow file; searched in standard locations when omitted
        #[arg(short, long)]
        workflow: Option<String>,

        /// Event kind driving the run
        #[arg(short, long, value_enum, default_value_t = EventKind::Push)]
        event: EventKind,

        /// Fully qualified ref, e.g. refs/heads/main or refs/tags/v1.0.0
        #[arg(short = 'r', long = "ref", default_value = "refs/heads/main")]
        git_ref: String,

        /// Commit sha the event points at
        #[arg(long, default_value = "0000000")]
        sha: String,

        /// Changed paths, consulted for pull request events
        #[arg(long = "changed")]
        changed_paths: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum EventKind {
    Push,
    PullRequest,
    Tag,
}
