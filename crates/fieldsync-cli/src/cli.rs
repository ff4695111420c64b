use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use fieldsync_core::models::ResolutionStrategy;
use fieldsync_core::tester::TestOperationKind;
use fieldsync_core::{Priority, SyncMode};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Queue offline writes and reconcile them with the server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the local and remote databases
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Path to the JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Treat the device as offline for this invocation
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a write for the remote store
    Enqueue {
        /// Operation kind
        #[arg(long, value_enum, default_value_t = OperationKind::Set)]
        op: OperationKind,
        /// Target collection
        #[arg(long)]
        collection: String,
        /// Target document id
        #[arg(long)]
        doc_id: String,
        /// Document body as a JSON object (set/update)
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
        /// Priority tier (P0..P3)
        #[arg(short, long, default_value = "P2")]
        priority: Priority,
        /// Reporting tag
        #[arg(long, default_value = "other")]
        entity_type: String,
    },
    /// Show queue status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued items
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drain the queue to the remote store
    Sync {
        /// Which items to drain (auto, critical, full)
        #[arg(short, long, default_value = "auto")]
        mode: SyncMode,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop items that exhausted their retry budget
    ClearFailed,
    /// Drop a single queued item
    Remove {
        /// Queue item id
        id: String,
    },
    /// Inspect and resolve conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Read and write the remote store directly
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },
    /// Offline diagnostics
    Test {
        #[command(subcommand)]
        command: TestCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OperationKind {
    Set,
    Update,
    Delete,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List conflicts awaiting manual resolution
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recently resolved conflicts
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a pending conflict
    Resolve {
        /// Conflict id
        id: String,
        /// Strategy override (server-wins, client-wins, timestamp-wins, merge)
        #[arg(short, long)]
        strategy: Option<ResolutionStrategy>,
        /// Merge inside a transaction against the current server copy
        #[arg(long, conflicts_with = "strategy")]
        transaction: bool,
    },
    /// Drop every pending conflict without resolving it
    Clear,
}

#[derive(Subcommand)]
pub enum RemoteCommands {
    /// Print one document
    Get { collection: String, doc_id: String },
    /// Write a document
    Put {
        collection: String,
        doc_id: String,
        /// Document body as a JSON object
        data: String,
        /// Overwrite only the supplied fields
        #[arg(long)]
        merge: bool,
    },
    /// List recently written documents of a collection
    List {
        collection: String,
        /// Number of documents to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Delete a document
    Delete { collection: String, doc_id: String },
}

#[derive(Subcommand)]
pub enum TestCommands {
    /// Queue a sample write (write, update, delete)
    Queue { kind: TestOperationKind },
    /// Stage and detect a conflict on the test collection
    Conflict,
    /// Show queue contents with a priority histogram
    Inspect,
    /// Drain the queue, failing when offline
    ForceSync {
        #[arg(short, long, default_value = "full")]
        mode: SyncMode,
    },
    /// Remove every piece of offline state
    Reset,
}
