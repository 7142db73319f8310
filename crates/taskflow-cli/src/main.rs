//! Taskflow CLI: queue tasks and run them through YAML-defined workflows.
//!
//! Every command works on the same SQLite database, so `add` in one
//! terminal and `run --watch` in another cooperate without extra setup.

use clap::{Parser, Subcommand};

use taskflow_cli::commands;
use taskflow_core::state::AppState;

/// Taskflow: persistent task queue with YAML-defined workflows
#[derive(Parser)]
#[command(name = "taskflow", version, about = "Taskflow: persistent task queue with YAML-defined workflows")]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "TASKFLOW_CONFIG", default_value = "taskflow.yaml")]
    config: String,

    /// Path to the SQLite database file (overrides `db_path` in the config)
    #[arg(long, env = "TASKFLOW_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config and workflow files
    Init,

    /// Add every task from a batch file (`{type} key=value :: content`)
    AddFile {
        /// Path to the batch file
        path: String,
    },

    /// Add a single task
    Add {
        /// Task type, e.g. search, process, create, code
        #[arg(long = "type", short = 't')]
        task_type: String,
        /// Metadata as key=value (repeatable)
        #[arg(long = "meta", short = 'm')]
        meta: Vec<String>,
        /// Task content
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        content: Vec<String>,
    },

    /// Process queued tasks
    Run {
        /// Keep running and wait for new tasks until Ctrl-C
        #[arg(long)]
        watch: bool,
    },

    /// Show task counts per status
    Status,

    /// List tasks, oldest first
    List {
        /// Only tasks with this status (pending, running, completed, failed)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one task with its step results
    Get {
        /// Task ID
        id: String,
    },

    /// Put a completed or failed task back in the queue
    Requeue {
        /// Task ID
        id: String,
        /// Also discard successful step results and start from scratch
        #[arg(long)]
        reset: bool,
    },

    /// Put every failed task back in the queue
    RequeueFailed,

    /// Delete a task
    Delete {
        /// Task ID
        id: String,
    },

    /// Remove tasks from the queue (pending only, unless told otherwise)
    Clear {
        /// Remove every task regardless of status
        #[arg(long, conflicts_with = "completed")]
        all: bool,
        /// Remove completed tasks only
        #[arg(long)]
        completed: bool,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Inspect workflow definitions
    Workflows {
        #[command(subcommand)]
        action: WorkflowsAction,
    },
}

#[derive(Subcommand)]
enum WorkflowsAction {
    /// List the loaded workflow definitions
    List,
    /// Validate a workflow YAML file without loading it
    Validate {
        /// Path to the workflow YAML file
        file: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskflow_core=info,taskflow_cli=info".into()),
        )
        .init();

    taskflow_core::config::load_dotenv();

    let result = match cli.command {
        Commands::Init => commands::init::run(&cli.config),
        command => match commands::init_state(&cli.config, cli.db.as_deref()) {
            Ok(state) => dispatch(&state, &cli.config, command).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn dispatch(state: &AppState, config_path: &str, command: Commands) -> Result<(), String> {
    match command {
        Commands::Init => commands::init::run(config_path),
        Commands::AddFile { path } => commands::task::add_file(state, &path).await,
        Commands::Add {
            task_type,
            meta,
            content,
        } => commands::task::add(state, &task_type, &meta, &content.join(" ")).await,
        Commands::Run { watch } => commands::run::run(state, watch).await,
        Commands::Status => commands::task::status(state).await,
        Commands::List { status } => commands::task::list(state, status.as_deref()).await,
        Commands::Get { id } => commands::task::get(state, &id).await,
        Commands::Requeue { id, reset } => commands::task::requeue(state, &id, reset).await,
        Commands::RequeueFailed => commands::task::requeue_failed(state).await,
        Commands::Delete { id } => commands::task::delete(state, &id).await,
        Commands::Clear {
            all,
            completed,
            yes,
        } => commands::task::clear(state, all, completed, yes).await,
        Commands::Workflows { action } => match action {
            WorkflowsAction::List => commands::workflows::list(state),
            WorkflowsAction::Validate { file } => commands::workflows::validate(state, &file),
        },
    }
}
