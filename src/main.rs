use docsync::config::Config;
use docsync::db::Database;
use docsync::index::{
    LanceIndex, MemoryIndex, SchemaAction, SchemaManager, SearchIndex, SearchQuery,
};
use docsync::models::UserId;
use docsync::tasks::{Task, TaskMessage, TaskRunner};
use docsync::{ReindexMode, Synchronizer};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "docsync", version, about = "Search index synchronization worker")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index the given nodes, or every node when none are given.
    Index {
        node_ids: Vec<String>,
        /// Print the entities instead of writing them.
        #[arg(long)]
        dry_run: bool,
        /// Remove everything from the index first.
        #[arg(long, conflicts_with = "dry_run")]
        rebuild: bool,
    },
    /// Search the index on behalf of a user.
    Search {
        query: String,
        user_id: String,
        #[arg(long, default_value_t = 1)]
        page_number: usize,
        #[arg(long, default_value_t = 10)]
        page_size: usize,
    },
    /// Print the effective configuration.
    Config,
    /// Manage the index table.
    Schema {
        #[arg(value_enum)]
        action: SchemaCommand,
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply the bundled schema to the database.
    Migrate,
    /// Run one named task, e.g. `task index_update <add-ver> <remove-ver>`.
    Task { name: String, args: Vec<String> },
    /// Run tasks read as JSON lines from stdin.
    Worker,
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaCommand {
    Apply,
    Create,
    Delete,
}

impl From<SchemaCommand> for SchemaAction {
    fn from(command: SchemaCommand) -> Self {
        match command {
            SchemaCommand::Apply => SchemaAction::Apply,
            SchemaCommand::Create => SchemaAction::Create,
            SchemaCommand::Delete => SchemaAction::Delete,
        }
    }
}

/// Install the global subscriber. The returned guard flushes the log file on drop.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "docsync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

async fn synchronizer(config: &Config) -> anyhow::Result<Synchronizer> {
    let db = Database::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    let index = LanceIndex::open(&config.search)
        .await
        .context("failed to open search index")?;
    Ok(Synchronizer::new(db, Arc::new(index)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _guard = init_tracing(&config);

    match cli.command {
        Command::Index {
            node_ids,
            dry_run,
            rebuild,
        } => {
            let mode = if dry_run {
                ReindexMode::DryRun
            } else if rebuild {
                ReindexMode::Rebuild
            } else {
                ReindexMode::Update
            };
            let sync = if mode == ReindexMode::DryRun {
                // Projection only: nothing may touch the real index.
                let db = Database::connect(&config.database).await?;
                Synchronizer::new(db, Arc::new(MemoryIndex::new()))
            } else {
                synchronizer(&config).await?
            };
            let (entities, report) = sync.reindex(&node_ids, mode).await?;

            if mode == ReindexMode::DryRun {
                println!("{}", serde_json::to_string_pretty(&entities)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Command::Search {
            query,
            user_id,
            page_number,
            page_size,
        } => {
            let user_id = UserId::parse(&user_id)?;
            let index = LanceIndex::open(&config.search).await?;
            let query = SearchQuery::new(query, user_id.to_string()).page(page_number, page_size);
            let results = index.search(&query).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Schema { action, dry_run } => {
            let action = SchemaAction::from(action);
            let manager = SchemaManager::connect(&config.search).await?;
            if dry_run {
                println!("{}", serde_json::to_string_pretty(&manager.describe(action))?);
            } else {
                manager.run(action).await?;
            }
        }
        Command::Migrate => {
            let db = Database::connect(&config.database).await?;
            db.migrate().await?;
            tracing::info!(url = %config.database.url, "database schema applied");
        }
        Command::Task { name, args } => {
            let message = TaskMessage {
                name,
                args: args.into_iter().map(serde_json::Value::from).collect(),
            };
            let task = Task::from_message(&message)?;
            let runner = TaskRunner::new(synchronizer(&config).await?, config.retry);
            let report = runner.run(&task).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Worker => {
            let runner = TaskRunner::new(synchronizer(&config).await?, config.retry);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let stats = runner.run_lines(stdin).await?;
            if stats.failed > 0 || stats.rejected > 0 {
                anyhow::bail!(
                    "{} task(s) failed and {} were rejected",
                    stats.failed,
                    stats.rejected
                );
            }
        }
    }

    Ok(())
}
