mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strata_config::{AppConfig, ConfigLoader};
use strata_db::{Direction, Ledger, MigrationSource, Migrator, Store, status};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Apply, roll back and inspect SQL schema migrations"
)]
struct Cli {
    /// Config file (defaults to strata.toml / strata.yml in the working directory)
    #[arg(long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database to migrate
    #[arg(long, global = true, env = "STRATA_DATABASE")]
    database: Option<PathBuf>,

    /// Directory containing <version>_<name>.sql files
    #[arg(long, global = true, env = "STRATA_MIGRATIONS_DIR")]
    migrations_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations, up to and including TARGET if given
    Up { target: Option<i64> },
    /// Roll back applied migrations newer than TARGET, or all of them
    Down { target: Option<i64> },
    /// Show applied and pending migrations
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = resolve_config(&cli)?;
    debug!(
        "database {}, migrations {}",
        config.database.path.display(),
        config.migrations.directory.display()
    );

    match cli.command {
        Command::Up { target } => run_migrations(&config, Direction::Up, target),
        Command::Down { target } => run_migrations(&config, Direction::Down, target),
        Command::Status { json } => show_status(&config, json),
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = ConfigLoader::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }
    if let Some(dir) = &cli.migrations_dir {
        config.migrations.directory = dir.clone();
    }
    Ok(config)
}

fn run_migrations(config: &AppConfig, direction: Direction, target: Option<i64>) -> Result<()> {
    let ledger = Ledger::new(config.migrations.table.clone())?;
    let source = MigrationSource::new(&config.migrations.directory);
    let mut store = Store::open(&config.database.path, config.database.busy_timeout())
        .with_context(|| format!("failed to open {}", config.database.path.display()))?;

    let mut migrator =
        Migrator::new(&mut store, source, ledger).transactional(config.migrations.transactional);
    let report = match direction {
        Direction::Up => migrator.up(target),
        Direction::Down => migrator.down(target),
    }
    .with_context(|| format!("migration {direction} aborted"))?;

    print!("{}", render::format_run(&report));
    report.into_result()?;
    info!("migration {direction} finished");
    Ok(())
}

fn show_status(config: &AppConfig, json: bool) -> Result<()> {
    let ledger = Ledger::new(config.migrations.table.clone())?;
    let source = MigrationSource::new(&config.migrations.directory);

    let db_path = &config.database.path;
    let store = if db_path.exists() {
        Store::open_read_only(db_path)?
    } else {
        debug!("{} does not exist yet, reporting an empty ledger", db_path.display());
        Store::in_memory()?
    };

    let report = status(store.connection(), &source, &ledger)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render::format_status(&report, config));
    }
    Ok(())
}
