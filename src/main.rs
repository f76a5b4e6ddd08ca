use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use bulk_loader::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_WORKERS, DatabaseConfig, IdentityMode, ImportConfig,
    load_env_file, parse_delimiter,
};
use bulk_loader::db;
use bulk_loader::import::pg_config::PgConfig;
use bulk_loader::import::{Catalog, ImportStatus, ImportSummary, Importer, LogProgress};

/// Exit code for an import that finished but lost batches or rows.
const EXIT_COMPLETED_WITH_ERRORS: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "bulk-loader",
    version,
    about = "Load delimited files into PostgreSQL tables"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import one CSV or TSV file into a table.
    Import(ImportArgs),
    /// List the base tables of the target database.
    Tables(ConnectionArgs),
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Named target; reads `<TARGET>_DATABASE_URL` instead of `DATABASE_URL`.
    #[arg(long)]
    target: Option<String>,

    /// Env file loaded before reading connection settings.
    #[arg(long = "env", default_value = ".env")]
    env_file: PathBuf,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Source file; `.tsv` files default to tab separated.
    #[arg(long)]
    file: PathBuf,

    /// Destination as `schema.table` (schema defaults to `public`).
    #[arg(long)]
    table: String,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Merge key column; repeat for composite keys. Defaults to the primary key.
    #[arg(long = "key")]
    keys: Vec<String>,

    #[arg(long, value_enum, default_value_t = IdentityMode::Auto)]
    identity: IdentityMode,

    /// Per-batch timeout in seconds.
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    #[arg(long, value_parser = parse_delimiter)]
    delimiter: Option<u8>,

    /// Commit batches without waiting for the WAL flush.
    #[arg(long)]
    async_commit: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    status: ImportStatus,
    #[serde(flatten)]
    summary: &'a ImportSummary,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bulk_loader::init_logger();

    let cli = Cli::parse();
    match cli.command {
        Command::Import(args) => {
            let status = run_import(args).await?;
            if status == ImportStatus::CompletedWithErrors {
                std::process::exit(EXIT_COMPLETED_WITH_ERRORS);
            }
        }
        Command::Tables(args) => list_tables(args).await?,
    }

    Ok(())
}

async fn connect(
    args: &ConnectionArgs,
    workers: usize,
) -> Result<sqlx::PgPool, Box<dyn std::error::Error>> {
    if load_env_file(&args.env_file)? {
        log::debug!("loaded environment from {}", args.env_file.display());
    }

    let config = DatabaseConfig::from_env(args.target.as_deref())?.sized_for_workers(workers);
    let pool = db::connect(&config).await?;

    match PgConfig::check_config(&pool).await {
        Ok(snapshot) => {
            log::info!("{}", snapshot);
            if !snapshot.fits_connections(config.max_connections) {
                log::warn!(
                    "pool size {} exceeds server max_connections {}",
                    config.max_connections,
                    snapshot.max_connections
                );
            }
        }
        Err(err) => log::warn!("could not read server configuration: {}", err),
    }

    Ok(pool)
}

async fn run_import(args: ImportArgs) -> Result<ImportStatus, Box<dyn std::error::Error>> {
    let config = ImportConfig {
        table: args.table,
        batch_size: args.batch_size,
        workers: args.workers,
        key_columns: (!args.keys.is_empty()).then_some(args.keys),
        identity: args.identity,
        batch_timeout: Duration::from_secs(args.timeout_secs),
        delimiter: args.delimiter,
        synchronous_commit: !args.async_commit,
    };
    config.validate()?;

    let pool = connect(&args.connection, config.workers).await?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, finishing in-flight batches");
            signal_cancel.cancel();
        }
    });

    let progress = Arc::new(LogProgress::new(
        args.file.display().to_string(),
        Duration::from_secs(5),
    ));

    let importer = Importer::new(pool.clone());
    let summary = importer
        .import_file(&args.file, &config, progress, cancel)
        .await;
    pool.close().await;

    let summary = summary?;
    let status = summary.status();

    let mut stdout = io::stdout().lock();
    match args.output {
        OutputFormat::Text => write!(stdout, "{}", summary)?,
        OutputFormat::Json => {
            let report = JsonReport {
                status,
                summary: &summary,
            };
            writeln!(stdout, "{}", serde_json::to_string_pretty(&report)?)?;
        }
    }

    Ok(status)
}

async fn list_tables(args: ConnectionArgs) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect(&args, 1).await?;
    let tables = Catalog::new(pool.clone()).list_tables().await;
    pool.close().await;

    let mut stdout = io::stdout().lock();
    for table in tables? {
        writeln!(stdout, "{}", table)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn import_flags_parse() {
        let cli = Cli::try_parse_from([
            "bulk-loader",
            "import",
            "--file",
            "orders.tsv",
            "--table",
            "sales.orders",
            "--key",
            "region",
            "--key",
            "order_no",
            "--identity",
            "off",
            "--delimiter",
            "tab",
            "--output",
            "json",
        ])
        .unwrap();

        let Command::Import(args) = cli.command else {
            panic!("expected import command");
        };
        assert_eq!(args.keys, vec!["region", "order_no"]);
        assert_eq!(args.identity, IdentityMode::Off);
        assert_eq!(args.delimiter, Some(b'\t'));
        assert_eq!(args.batch_size, DEFAULT_BATCH_SIZE);
        assert!(!args.async_commit);
        assert!(matches!(args.output, OutputFormat::Json));
        assert_eq!(args.connection.env_file, PathBuf::from(".env"));
    }
}
