//! pgkit: run SQL against PostgreSQL from the command line
//!
//! # Usage
//!
//! ```bash
//! # Execute a query
//! pgkit "SELECT id, name FROM users WHERE active = \$1 AND city = \$2" --bind true --bind "Paris, TX"
//!
//! # Dry run (show SQL only)
//! pgkit "DELETE FROM users WHERE id = \$1" --bind 42 --dry-run
//!
//! # Insert records with different fields in one statement
//! pgkit insert users '[{"id": 1, "name": "a"}, {"id": 2}]'
//! ```

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use pgkit::params::{Binding, normalize};
use pgkit::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgkit")]
#[command(version)]
#[command(about = "Run SQL against PostgreSQL with records in and records out", long_about = None)]
#[command(after_help = "EXAMPLES:
    pgkit 'SELECT * FROM users WHERE active = $1' --bind true
    pgkit 'UPDATE users SET verified = true WHERE id = $1' --bind 7 --dry-run
    pgkit insert users '[{\"id\": 1, \"name\": \"a\"}, {\"id\": 2}]'")]
struct Cli {
    /// The SQL statement to execute
    query: Option<String>,

    /// Don't execute, just show the SQL and bound values
    #[arg(short, long)]
    dry_run: bool,

    /// Parameter binding for $1, $2, etc.; repeat once per parameter
    #[arg(short, long)]
    bind: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Database connection URL
    #[arg(long, env = "PGKIT_DATABASE_URL")]
    database_url: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a JSON object or array of objects into a table
    Insert {
        /// Target table, optionally schema-qualified
        table: String,
        /// JSON records; fields may differ between records
        records: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Some(Commands::Insert { table, records }) => insert_records(table, records, &cli).await,
        None => match &cli.query {
            Some(query) => execute_query(query, &cli).await,
            None => {
                println!("{}", "pgkit: records in, records out".cyan().bold());
                println!();
                println!("Usage: pgkit <QUERY> [OPTIONS]");
                println!();
                println!("Try: pgkit --help");
                Ok(())
            }
        },
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "pgkit=debug" } else { "pgkit=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn execute_query(query: &str, cli: &Cli) -> anyhow::Result<()> {
    if cli.verbose {
        println!("{} {}", "Input:".dimmed(), query.yellow());
    }

    let params = Params::Tuple(cli.bind.iter().map(|b| parse_binding(b)).collect());
    let query = Query::from(query);

    if cli.dry_run {
        show_statement(&query, &params)?;
        return Ok(());
    }

    let db = connect(cli)?;
    let outcome = db.run(query, params).await;
    db.close().await;
    print_outcome(&outcome?, &cli.format);
    Ok(())
}

async fn insert_records(table: &str, records: &str, cli: &Cli) -> anyhow::Result<()> {
    let json: serde_json::Value = serde_json::from_str(records).context("records must be valid JSON")?;
    let items = match json {
        serde_json::Value::Array(items) => items,
        object @ serde_json::Value::Object(_) => vec![object],
        _ => bail!("records must be a JSON object or an array of objects"),
    };
    let values = ValueSet::from_serialize(&items)?;

    if cli.dry_run {
        show_statement(&pgkit::insert::table_prefix(table), &Params::Values(values))?;
        return Ok(());
    }

    let db = connect(cli)?;
    let inserted = db.insert(table, values).await;
    db.close().await;
    println!("{} {} rows affected", "✓".green(), inserted?);
    Ok(())
}

fn connect(cli: &Cli) -> anyhow::Result<Postgres> {
    let config = if let Some(url) = &cli.database_url {
        PostgresConfig::from_url(url)?
    } else if let Some(path) = &cli.config {
        PostgresConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .with_env()?
    } else {
        match PostgresConfig::default_path().filter(|p| p.exists()) {
            Some(path) => PostgresConfig::load(&path)?.with_env()?,
            None => PostgresConfig::from_env().context(
                "no database configured; use --database-url, --config or PGKIT_* variables",
            )?,
        }
    };

    if cli.verbose {
        println!("{} {:?}", "Connecting with:".dimmed(), config);
    }
    Ok(Postgres::new(&config))
}

fn show_statement(query: &Query, params: &Params) -> anyhow::Result<()> {
    let statement = normalize(query, params)?;
    println!("{}", "SQL:".green().bold());
    println!("{}", statement.query.to_sql().white());

    if let Binding::Single(values) = &statement.binding {
        if !values.is_empty() {
            println!();
            println!("{}", "Bindings:".cyan());
            for (i, value) in values.iter().enumerate() {
                println!("  ${} = {}", i + 1, value.to_string().yellow());
            }
        }
    }
    Ok(())
}

/// Numbers, booleans and `null` bind as themselves; anything else binds as text.
/// `nan` and `inf` stay text.
fn parse_binding(binding: &str) -> Value {
    if let Ok(n) = binding.parse::<i64>() {
        Value::Int(n)
    } else if let Some(f) = binding.parse::<f64>().ok().filter(|f| f.is_finite()) {
        Value::Float(f)
    } else if binding == "true" {
        Value::Bool(true)
    } else if binding == "false" {
        Value::Bool(false)
    } else if binding == "null" {
        Value::Null
    } else {
        Value::Text(binding.to_string())
    }
}

fn print_outcome(outcome: &Outcome, format: &OutputFormat) {
    let rows = match outcome {
        Outcome::RowCount(n) => {
            println!("{} {} rows affected", "✓".green(), n);
            return;
        }
        Outcome::Rows(rows) => rows,
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows).unwrap_or_default());
        }
        OutputFormat::Table => {
            let Some(first) = rows.first() else {
                println!("{}", "(no results)".dimmed());
                return;
            };
            let columns: Vec<&str> = first.field_names().collect();

            // Calculate column widths
            let mut widths: HashMap<&str, usize> = columns.iter().map(|c| (*c, c.len())).collect();
            for row in rows {
                for (col, val) in row.iter() {
                    if let Some(w) = widths.get_mut(col) {
                        *w = (*w).max(val.to_string().len());
                    }
                }
            }

            let header: Vec<String> = columns
                .iter()
                .map(|c| format!("{:width$}", c, width = widths[c]))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = columns.iter().map(|c| "─".repeat(widths[c])).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in rows {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        let val = row.get(c).map(|v| v.to_string()).unwrap_or_default();
                        format!("{:width$}", val, width = widths[c])
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", rows.len().to_string().cyan());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binding() {
        assert_eq!(parse_binding("42"), Value::Int(42));
        assert_eq!(parse_binding("-1.5"), Value::Float(-1.5));
        assert_eq!(parse_binding("true"), Value::Bool(true));
        assert_eq!(parse_binding("null"), Value::Null);
        for text in ["nan", "NaN", "inf", "-infinity", "a,b"] {
            assert_eq!(parse_binding(text), Value::Text(text.into()), "{text}");
        }
    }

    #[test]
    fn test_bind_is_repeated_not_split() {
        let cli = Cli::try_parse_from([
            "pgkit",
            "SELECT $1, $2",
            "--bind",
            "Paris, TX",
            "-b",
            "7",
        ])
        .unwrap();
        assert_eq!(cli.bind, ["Paris, TX", "7"]);
    }
}
