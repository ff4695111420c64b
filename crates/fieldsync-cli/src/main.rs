//! fieldsync CLI - inspect and drive the offline write queue
//!
//! Works against SQLite-backed local and remote stores under the data directory.

mod cli;
mod commands;
mod error;


use clap::Parser;
use fieldsync_core::OfflineService;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConflictCommands, RemoteCommands, TestCommands};
use crate::commands::common::{open_service, resolve_paths};
use crate::commands::completions::run_completions;
use crate::commands::conflicts::{
    run_conflicts_clear, run_conflicts_history, run_conflicts_list, run_conflicts_resolve,
};
use crate::commands::queue::{
    run_clear_failed, run_enqueue, run_queue, run_remove, run_status, run_sync, EnqueueArgs,
};
use crate::commands::remote::{run_remote_delete, run_remote_get, run_remote_list, run_remote_put};
use crate::commands::tester::{
    run_test_conflict, run_test_force_sync, run_test_inspect, run_test_queue, run_test_reset,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive: Directive = "fieldsync=info"
        .parse()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let paths = resolve_paths(cli.data_dir, cli.config)?;
    let service = open_service(&paths, cli.offline).await?;
    dispatch(&service, cli.command).await
}

async fn dispatch(service: &OfflineService, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Enqueue {
            op,
            collection,
            doc_id,
            data,
            priority,
            entity_type,
        } => {
            let args = EnqueueArgs {
                op,
                collection: &collection,
                doc_id: &doc_id,
                data: data.as_deref(),
                priority,
                entity_type: &entity_type,
            };
            run_enqueue(service, &args).await
        }
        Commands::Status { json } => run_status(service, json).await,
        Commands::Queue { json } => run_queue(service, json).await,
        Commands::Sync { mode, json } => run_sync(service, mode, json).await,
        Commands::ClearFailed => run_clear_failed(service).await,
        Commands::Remove { id } => run_remove(service, &id).await,
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { json } => run_conflicts_list(service, json).await,
            ConflictCommands::History { limit, json } => {
                run_conflicts_history(service, limit, json).await
            }
            ConflictCommands::Resolve {
                id,
                strategy,
                transaction,
            } => run_conflicts_resolve(service, &id, strategy, transaction).await,
            ConflictCommands::Clear => run_conflicts_clear(service).await,
        },
        Commands::Remote { command } => match command {
            RemoteCommands::Get { collection, doc_id } => {
                run_remote_get(service, &collection, &doc_id).await
            }
            RemoteCommands::Put {
                collection,
                doc_id,
                data,
                merge,
            } => run_remote_put(service, &collection, &doc_id, &data, merge).await,
            RemoteCommands::List { collection, limit } => {
                run_remote_list(service, &collection, limit).await
            }
            RemoteCommands::Delete { collection, doc_id } => {
                run_remote_delete(service, &collection, &doc_id).await
            }
        },
        Commands::Test { command } => match command {
            TestCommands::Queue { kind } => run_test_queue(service, kind).await,
            TestCommands::Conflict => run_test_conflict(service).await,
            TestCommands::Inspect => run_test_inspect(service).await,
            TestCommands::ForceSync { mode } => run_test_force_sync(service, mode).await,
            TestCommands::Reset => run_test_reset(service).await,
        },
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref()),
    }
}
