/*!
tabdb command-line interface

Offline access to the import pipeline: load one delimited file into a
fresh in-memory engine and print what the coordinator would report.
*/

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};

use tabdb::engine::{self, Engine};
use tabdb::ingest::{self, ImportRequest};
use tabdb::protocol::{Position, TableDescriptor};
use tabdb::VERSION;

#[derive(Parser)]
#[command(name = "tabdb")]
#[command(about = "Load CSV files into an in-memory SQL engine")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import a file and print the resulting table descriptor
    Import {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Import a file, then run SQL against it
    Query {
        #[command(flatten)]
        source: SourceArgs,

        /// SQL to execute after the import
        sql: String,

        /// Maximum rows printed (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_rows: usize,
    },
}

#[derive(Args)]
pub struct SourceArgs {
    /// Delimited text file to import
    file: PathBuf,

    /// Table name (derived from the file name when omitted)
    #[arg(long)]
    table: Option<String>,

    /// Field separator; empty to detect
    #[arg(long, default_value = ",")]
    separator: String,

    /// Treat the first line as data and name columns Column_1..Column_N
    #[arg(long)]
    no_headers: bool,

    /// Engine connection string
    #[arg(long, default_value = "sqlite://memory")]
    engine: String,
}

fn table_name_for(source: &SourceArgs) -> String {
    match &source.table {
        Some(name) => name.clone(),
        None => {
            let file_name = source
                .file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            ingest::table_name_from_file(&file_name)
        }
    }
}

fn load(source: &SourceArgs) -> anyhow::Result<(Box<dyn Engine>, TableDescriptor)> {
    let bytes = read_file(&source.file)?;
    let table_name = table_name_for(source);

    let mut engine = engine::from_connection_string(&source.engine)?;
    let table = ingest::import_csv(
        engine.as_mut(),
        ImportRequest {
            bytes: &bytes,
            table_name: &table_name,
            separator: &source.separator,
            has_headers: !source.no_headers,
            position: Position::default(),
        },
    )
    .with_context(|| format!("Failed to import {}", source.file.display()))?;

    Ok((engine, table))
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Import { source } => {
            let (_engine, table) = load(&source)?;
            for warning in &table.warnings {
                eprintln!("warning: {}", warning);
            }
            println!("{}", serde_json::to_string_pretty(&table)?);
        }

        Commands::Query {
            source,
            sql,
            max_rows,
        } => {
            let (engine, table) = load(&source)?;
            let result = engine.execute_sql(&sql)?;

            let row_count = result.rows.len();
            let mut data = result.rows;
            let truncated = max_rows > 0 && row_count > max_rows;
            if truncated {
                data.truncate(max_rows);
            }

            let output = json!({
                "table": table.table_name,
                "query": sql,
                "columns": result.columns,
                "data": data,
                "rowCount": row_count,
                "truncated": truncated,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
