use anyhow::{Context, Result};
use asset_consolidation::application::*;
use asset_consolidation::models::{ConsolidationMode, FieldFilter, RunOptions};
use asset_consolidation::Config;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "asset-consolidation")]
#[command(about = "Find duplicate assets, repoint every reference to one copy, delete the rest")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print reports as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Report what would change without writing or deleting anything
    #[arg(long)]
    dry_run: bool,

    /// Only touch references stored in this table (requires --field)
    #[arg(long, requires = "field")]
    table: Option<String>,

    /// Only touch references stored in this field (requires --table)
    #[arg(long, requires = "table")]
    field: Option<String>,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        let restrict = match (&self.table, &self.field) {
            (Some(table), Some(field)) => Some(FieldFilter::new(table, field)),
            _ => None,
        };
        RunOptions {
            dry_run: self.dry_run,
            restrict,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the asset and reference tables if missing
    InitDb,
    /// Report bytes held by duplicate copies
    Stats,
    /// Consolidate duplicates among staged assets
    Internal {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Consolidate staged assets onto copies outside the staging area
    External {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Rewrite embedded file links in text fields only
    UpdateFields {
        #[arg(long)]
        mode: ConsolidationMode,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Repoint structured references only
    MigrateReferences {
        #[arg(long)]
        mode: ConsolidationMode,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Delete duplicates nothing references any more
    Delete {
        #[arg(long)]
        mode: ConsolidationMode,
        /// Confirm that fields and references were migrated first
        #[arg(long)]
        yes_delete: bool,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Consolidate, then delete, in one run
    All {
        #[arg(long)]
        mode: ConsolidationMode,
        #[arg(long)]
        yes_delete: bool,
        #[command(flatten)]
        run: RunArgs,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // logs go to stderr so --json output stays parseable
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.operational.log_level, cli.json_logs);

    let app = Application::new(config).await?;

    match cli.command {
        Commands::InitDb => {
            DatabaseCommandHandler::new(app.container.clone())
                .init_db(cli.json)
                .await
        }
        Commands::Stats => {
            DatabaseCommandHandler::new(app.container.clone())
                .stats(cli.json)
                .await
        }
        Commands::Internal { run } => {
            run_workflow(&app, Workflow::Consolidate, ConsolidationMode::Internal, &run, cli.json).await
        }
        Commands::External { run } => {
            run_workflow(&app, Workflow::Consolidate, ConsolidationMode::External, &run, cli.json).await
        }
        Commands::UpdateFields { mode, run } => {
            run_workflow(&app, Workflow::UpdateFields, mode, &run, cli.json).await
        }
        Commands::MigrateReferences { mode, run } => {
            run_workflow(&app, Workflow::MigrateReferences, mode, &run, cli.json).await
        }
        Commands::Delete {
            mode,
            yes_delete,
            run,
        } => {
            let workflow = Workflow::Delete {
                acknowledged: yes_delete,
            };
            run_workflow(&app, workflow, mode, &run, cli.json).await
        }
        Commands::All {
            mode,
            yes_delete,
            run,
        } => {
            let workflow = Workflow::All {
                acknowledged: yes_delete,
            };
            run_workflow(&app, workflow, mode, &run, cli.json).await
        }
    }
}

async fn run_workflow(
    app: &Application,
    workflow: Workflow,
    mode: ConsolidationMode,
    run: &RunArgs,
    json: bool,
) -> Result<()> {
    ConsolidationCommandHandler::new(app.container.clone())
        .run(workflow, mode, &run.options(), json)
        .await
}
