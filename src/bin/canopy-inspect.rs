//! Read-only inspector for canopy record stores.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};

use canopy::storage::schema;
use canopy::storage::{NodeRow, TableTransformer};
use canopy::{Backend, Record, RowId, SqliteBackend};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "canopy-inspect",
    version,
    about = "Inspect a canopy record store without modifying it",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the stored record tree.
    Dump {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },
    /// Check the stored rows form a single rooted tree.
    Verify {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct VerifyReport {
    rows: usize,
    orphans: Vec<RowId>,
    nodes: usize,
    error: Option<String>,
}

impl VerifyReport {
    fn is_clean(&self) -> bool {
        self.orphans.is_empty() && self.error.is_none()
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<bool, Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Dump { db_path } => {
            let rows = read_rows(&db_path)?;
            let root = TableTransformer::new(rows).root()?;
            emit(cli.format, &root, || print_tree(root.as_ref()))?;
            Ok(true)
        }
        Command::Verify { db_path } => {
            let report = verify(read_rows(&db_path)?);
            emit(cli.format, &report, || print_verify_text(&report))?;
            Ok(report.is_clean())
        }
    }
}

fn read_rows(path: &Path) -> Result<Vec<NodeRow>, Box<dyn Error>> {
    if !path.exists() {
        return Err(format!("{} does not exist", path.display()).into());
    }
    let mut backend = SqliteBackend::new(path).read_only();
    backend.open()?;
    let rows = schema::read_rows(&mut backend)?;
    backend.close();
    Ok(rows)
}

fn verify(rows: Vec<NodeRow>) -> VerifyReport {
    let count = rows.len();
    let transformer = TableTransformer::new(rows);
    let orphans = transformer.orphans();
    let (nodes, error) = match transformer.root() {
        Ok(root) => (root.as_ref().map_or(0, Record::node_count), None),
        Err(err) => (0, Some(err.to_string())),
    };
    VerifyReport {
        rows: count,
        orphans,
        nodes,
        error,
    }
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_tree(root: Option<&Record>) {
    match root {
        Some(root) => print!("{root}"),
        None => println!("(empty store)"),
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!("rows={} nodes={}", report.rows, report.nodes);
    if report.orphans.is_empty() {
        println!("orphans: none");
    } else {
        let ids: Vec<String> = report.orphans.iter().map(RowId::to_string).collect();
        println!("orphans: {}", ids.join(", "));
    }
    match &report.error {
        Some(err) => println!("structure: {err}"),
        None => println!("structure: ok"),
    }
}
