//! pgpq - inspect and operate a pgpq queue from the shell.
//!
//! Settings come from the same layered configuration as the exporter
//! (`pgpq.toml`, `PGPQ__*` environment variables); flags override them.
//! Command output goes to stdout as JSON, logs go to stderr.

mod commands;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pgpq_server::{config::Config, logging};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "pgpq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (overrides database.url)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Namespace to operate on (overrides queue.namespace)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push a new task
    Push(PushArgs),

    /// Show one task without claiming it
    Get { id: Uuid },

    /// List tasks in selection order, delayed ones included
    List {
        #[arg(long)]
        limit: Option<i64>,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Count visible tasks
    Len,

    /// Creation time of the oldest visible task
    Oldest,

    /// Claim a task by id and resolve it
    Claim {
        id: Uuid,

        #[command(flatten)]
        resolve: ResolveArgs,
    },

    /// Claim the next eligible task and resolve it
    Shift {
        #[command(flatten)]
        resolve: ResolveArgs,
    },

    /// Delete every task in the namespace
    Truncate {
        /// Required, the deletion cannot be undone
        #[arg(long)]
        yes: bool,
    },

    /// Print the stored schema version
    SchemaVersion,
}

#[derive(Args, Debug)]
struct PushArgs {
    /// JSON payload
    #[arg(long, default_value = "{}")]
    payload: String,

    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    priority: i16,

    /// Explicit task id, generated when omitted
    #[arg(long)]
    id: Option<Uuid>,

    /// Keep the task invisible for this many seconds
    #[arg(long)]
    delay: Option<i64>,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// How to resolve the claim
    #[arg(long, value_enum, default_value_t = Resolution::Release)]
    resolve: Resolution,

    /// New priority (update only)
    #[arg(long, allow_hyphen_values = true)]
    set_priority: Option<i16>,

    /// New JSON payload (update only)
    #[arg(long)]
    set_payload: Option<String>,

    /// Move the task to this namespace (update only)
    #[arg(long)]
    set_namespace: Option<String>,

    /// Delay the task by this many seconds from now (update only)
    #[arg(long)]
    set_delay: Option<i64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Resolution {
    /// Give the task back untouched
    Release,
    /// Write back edits and give the task back
    Update,
    /// Delete the task
    Done,
    /// Count a failed attempt and give the task back
    Nack,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    if let Some(namespace) = &cli.namespace {
        config.queue.namespace = namespace.clone();
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    logging::init_stderr_logging(&config.logging).context("Failed to initialize logging")?;

    let queue = pgpq::Queue::connect_with(
        &config.database.url,
        &config.pool_settings(),
        config.queue_options(),
    )
    .await
    .context("Failed to connect to queue")?;

    let result = commands::run(&queue, cli.command).await;
    queue.close().await;

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
