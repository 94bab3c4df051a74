//! Convoy — repository orchestration CLI.
//!
//! # Usage
//!
//! ```text
//! convoy initialize [--repo-path <path>]
//! convoy check-all [--repo-path <path>]
//! convoy test-app --app-path <path>
//! convoy create-followup-tasks --app-name <name> --deployment-id <id> [--environment <env>]
//! convoy monitor --config-file <path>
//! ```
//!
//! Exit codes report the orchestration engine only: a monitored app failing
//! its tests is a successful run that reported failure data.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check_all::CheckAllArgs, create_followup_tasks::CreateFollowupTasksArgs,
    initialize::InitializeArgs, monitor::MonitorArgs, test_app::TestAppArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "convoy",
    version,
    about = "Discover, validate, and monitor a repository of example applications",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the repository, write the app registry, create default config.
    Initialize(InitializeArgs),

    /// Validate every discovered app through the bounded dispatcher.
    CheckAll(CheckAllArgs),

    /// Validate a single app directory.
    TestApp(TestAppArgs),

    /// Expand a deployment event into its follow-up task batch.
    CreateFollowupTasks(CreateFollowupTasksArgs),

    /// Run recurring health checks and drain tasks until interrupted.
    Monitor(MonitorArgs),
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Initialize(args) => args.run().await,
        Commands::CheckAll(args) => args.run().await,
        Commands::TestApp(args) => args.run().await,
        Commands::CreateFollowupTasks(args) => args.run().await,
        Commands::Monitor(args) => args.run().await,
    }
}
