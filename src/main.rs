use chrono::Utc;
use clap::{Parser, ValueEnum};
use groupbuy::config::EngineConfig;
use groupbuy::domain::clock::ManualClock;
use groupbuy::domain::ports::{GatewayHandle, StoreHandle};
use groupbuy::infrastructure::gateway::{SimulatedGateway, TimeoutGateway};
use groupbuy::infrastructure::in_memory::InMemoryStore;
use groupbuy::interfaces::batch::{BatchRunner, Catalog};
use groupbuy::interfaces::csv::command_reader::CommandReader;
use groupbuy::interfaces::csv::report_writer::ReportWriter;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum Report {
    #[default]
    Orders,
    Groups,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Catalog JSON file with products and users
    catalog: PathBuf,

    /// Command script CSV file
    commands: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Which report to print when the script is done
    #[arg(long, value_enum, default_value_t = Report::Orders)]
    report: Report,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<StoreHandle> {
    use groupbuy::infrastructure::rocksdb::RocksDBStore;
    match db_path {
        Some(path) => Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<StoreHandle> {
    if db_path.is_some() {
        miette::bail!("--db-path needs a build with the `storage-rocksdb` feature");
    }
    Ok(Arc::new(InMemoryStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let config = Arc::new(EngineConfig::from_env_or_default());

    let store = open_store(cli.db_path)?;
    let gateway: GatewayHandle = Arc::new(TimeoutGateway::new(SimulatedGateway::new(), config.gateway_timeout));
    let runner = BatchRunner::new(store, gateway, ManualClock::new(Utc::now()), config);

    let catalog: Catalog = serde_json::from_reader(File::open(cli.catalog).into_diagnostic()?).into_diagnostic()?;
    runner.load_catalog(catalog).await.into_diagnostic()?;

    let file = File::open(cli.commands).into_diagnostic()?;
    for (line, command) in CommandReader::new(file).commands().enumerate() {
        // Header is line 1
        let line = line + 2;
        match command {
            Ok(command) => match runner.execute(&command).await {
                Ok(summary) => log::info!("📜️ Line {line}: {summary}"),
                Err(e) => eprintln!("Line {line}: {:?} rejected: {e}", command.op),
            },
            Err(e) => eprintln!("Line {line}: error reading command: {e}"),
        }
    }

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    match cli.report {
        Report::Orders => writer.write_rows(runner.order_rows().await.into_diagnostic()?),
        Report::Groups => writer.write_rows(runner.group_rows().await.into_diagnostic()?),
    }
    .into_diagnostic()?;

    Ok(())
}
