//! Gantry CLI entrypoint.

use clap::Parser;

mod commands;
mod handlers;

use commands::Commands;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Gantry pipeline orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => handlers::init().await?,
        Commands::Validate { workflow } => handlers::validate(workflow.as_deref()).await?,
        Commands::Run {
            workflow,
            event,
            git_ref,
            sha,
            changed_paths,
        } => handlers::run(workflow.as_deref(), event, git_ref, sha, changed_paths).await?,
    }

    Ok(())
}
