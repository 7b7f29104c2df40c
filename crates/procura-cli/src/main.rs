mod display;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, bail};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use procura_core::{
    AggregateView, DateRange, Dimension, FieldName, FixEntry, LedgerStore, RawRow, RecordId,
};
use procura_pipeline::{NormalizationError, Pipeline, PipelineConfig, RunOutput};
use procura_store::{DuckStore, JsonLedgerStore};
use procura_sync::{REGISTRY_FIELDS, RegistryClient, RegistryConfig};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "procura")]
#[command(about = "Normalize, review and aggregate public procurement contracts")]
#[command(version)]
struct Cli {
    /// Pipeline configuration (TOML). Built-in defaults apply when omitted.
    #[arg(long, short = 'c', global = true, env = "PROCURA_CONFIG")]
    config: Option<PathBuf>,

    /// Fix ledger snapshot. The append-only history log sits next to it.
    #[arg(long, global = true, env = "PROCURA_LEDGER", default_value = "fix.json")]
    ledger: PathBuf,

    /// Log more (-v debug, -vv trace).
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull listings granted within a date window into a raw Parquet file
    Fetch {
        /// First grant date (inclusive)
        #[arg(long)]
        from: NaiveDate,

        /// Last grant date (inclusive)
        #[arg(long)]
        to: NaiveDate,

        #[arg(long, short = 'o')]
        output: PathBuf,

        #[arg(long, env = "PROCURA_REGISTRY_URL", default_value = procura_sync::http::DEFAULT_BASE_URL)]
        base_url: String,

        /// Anti-forgery token copied from a browser session
        #[arg(long, env = "PROCURA_CSRF_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Cookie header copied from the same browser session
        #[arg(long, env = "PROCURA_COOKIE", hide_env_values = true)]
        cookie: Option<String>,

        #[arg(long, default_value_t = 10_000)]
        page_length: usize,
    },

    /// Normalize raw rows and report per-row failures
    Normalize {
        #[command(flatten)]
        input: InputArgs,

        /// Write canonical records here (Parquet); with --db they are also
        /// loaded into its `contracts` table
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Write every failure here (CSV)
        #[arg(long)]
        failures: Option<PathBuf>,
    },

    /// Detect anomalies and list them for review
    Flag {
        #[command(flatten)]
        input: InputArgs,

        /// Write flags here (.csv or .parquet)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Aggregate reconciled spend over a period
    Aggregate {
        #[command(flatten)]
        input: InputArgs,

        #[arg(long, value_enum, default_value = "all")]
        by: By,

        #[command(flatten)]
        window: WindowArgs,

        /// Write buckets here (.csv or .parquet)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Rows shown per view (0 = all)
        #[arg(long, default_value_t = 20)]
        top: usize,
    },

    /// Author or inspect fix ledger entries
    Fix {
        #[command(subcommand)]
        action: FixCommand,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Raw registry rows (Parquet)
    #[arg(long, short = 'i', env = "PROCURA_INPUT")]
    input: PathBuf,

    /// Persistent DuckDB database that caches the raw table between runs
    #[arg(long, env = "PROCURA_DB")]
    db: Option<PathBuf>,

    /// Re-import the input into the database even if it is already loaded
    #[arg(long, requires = "db")]
    reload: bool,
}

#[derive(Args)]
struct WindowArgs {
    /// First start date (inclusive)
    #[arg(long, requires = "to", conflicts_with = "period")]
    from: Option<NaiveDate>,

    /// Last start date (inclusive)
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,

    /// Named period from the configuration
    #[arg(long)]
    period: Option<String>,
}

#[derive(Subcommand)]
enum FixCommand {
    /// Exclude a record from all aggregation
    Drop {
        record_id: String,

        #[arg(long, short = 'r')]
        rationale: String,
    },

    /// Replace named fields of a record
    #[command(after_help = "\
Examples:
  procura fix override 2023-000123 --set amount=1,000.00 -r 'registry typo'
  procura fix override 2023-000123 --set end_date=null -r 'open-ended'")]
    Override {
        record_id: String,

        /// FIELD=VALUE; `null` clears an optional field
        #[arg(long = "set", value_name = "FIELD=VALUE", required = true)]
        set: Vec<String>,

        #[arg(long, short = 'r')]
        rationale: String,
    },

    /// Show the history of one record, or every active entry
    Show { record_id: Option<String> },
}

#[derive(Clone, Copy, ValueEnum)]
enum By {
    Entity,
    Contractor,
    Service,
    All,
}

impl By {
    fn dimensions(self) -> Vec<Dimension> {
        match self {
            Self::Entity => vec![Dimension::Entity],
            Self::Contractor => vec![Dimension::Contractor],
            Self::Service => vec![Dimension::Service],
            Self::All => Dimension::ALL.to_vec(),
        }
    }
}

#[derive(Serialize)]
struct FailureRow<'a> {
    record_id: &'a str,
    field: &'a str,
    kind: &'a str,
    detail: &'a str,
}

impl<'a> From<&'a NormalizationError> for FailureRow<'a> {
    fn from(e: &'a NormalizationError) -> Self {
        Self {
            record_id: e.record_id.as_str(),
            field: &e.field,
            kind: e.kind.as_str(),
            detail: &e.detail,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .init();
    info!("procura v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Fetch {
            from,
            to,
            output,
            base_url,
            token,
            cookie,
            page_length,
        } => {
            let config = RegistryConfig {
                base_url: base_url.clone(),
                page_length: *page_length,
                token: token.clone(),
                cookie: cookie.clone(),
                ..RegistryConfig::default()
            };
            let client = RegistryClient::new(config)?;
            let rows = client
                .fetch_window(*from, *to)
                .await
                .context("registry pull failed")?;
            let batch = procura_store::raw_rows_to_batch(&rows, &REGISTRY_FIELDS)?;
            procura_store::write_parquet(output, &[batch])
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Fetched {} listings into {}", rows.len(), output.display());
        }

        Commands::Normalize {
            input,
            output,
            failures,
        } => {
            let pipeline = Pipeline::new(&load_config(&cli)?);
            let rows = load_rows(input)?;
            let outcome = pipeline.normalizer().normalize_all(&rows);
            display::print_normalize_summary(rows.len(), &outcome);
            display::print_failures(&outcome, 10);

            if let Some(path) = failures {
                let file = create(path)?;
                procura_store::write_rows(file, outcome.failures.iter().map(FailureRow::from))?;
                println!("Wrote failures to {}", path.display());
            }
            if let Some(path) = output {
                let batch = procura_store::records_to_batch(&outcome.records)?;
                procura_store::write_parquet(path, &[batch])
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Wrote {} records to {}", outcome.records.len(), path.display());
                if let Some(db) = &input.db {
                    let store = DuckStore::open_persistent(db)
                        .with_context(|| format!("opening {}", db.display()))?;
                    store.load_contracts(path)?;
                    println!("Loaded {} contracts into {}", store.contract_count()?, db.display());
                }
            }
        }

        Commands::Flag { input, output } => {
            let (_, run) = run_pipeline(&cli, input)?;
            display::print_flags(&run.flags)?;
            if let Some(path) = output {
                if is_parquet(path) {
                    procura_store::write_parquet(path, &[procura_store::flags_to_batch(&run.flags)?])?;
                } else {
                    procura_store::write_flags_csv(create(path)?, &run.flags)?;
                }
                println!("Wrote {} flags to {}", run.flags.len(), path.display());
            }
        }

        Commands::Aggregate {
            input,
            by,
            window,
            output,
            top,
        } => {
            let (pipeline, run) = run_pipeline(&cli, input)?;
            let period = resolve_window(pipeline.config(), window)?;
            display::print_reconcile_summary(&run.reconciled.report);

            let mut views = Vec::new();
            for dimension in by.dimensions() {
                let view = run.aggregate(period, dimension)?;
                display::print_view(&view, *top);
                views.push(view);
            }
            if let Some(path) = output {
                write_views(path, &views)?;
                println!("Wrote aggregates to {}", path.display());
            }
        }

        Commands::Fix { action } => run_fix(&cli.ledger, action)?,
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn load_rows(args: &InputArgs) -> anyhow::Result<Vec<RawRow>> {
    if let Some(db) = &args.db {
        let store = DuckStore::open_persistent(db)
            .with_context(|| format!("opening {}", db.display()))?;
        if args.reload || !store.has_raw_contracts() {
            store
                .load_raw_contracts(&args.input)
                .with_context(|| format!("importing {}", args.input.display()))?;
        }
        return Ok(store.raw_rows()?);
    }
    let batches = procura_store::read_parquet(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    Ok(procura_store::batches_to_raw_rows(&batches)?)
}

/// Normalize, detect and reconcile against one ledger snapshot.
fn run_pipeline(cli: &Cli, input: &InputArgs) -> anyhow::Result<(Pipeline, RunOutput)> {
    let pipeline = Pipeline::new(&load_config(cli)?);
    let ledger = JsonLedgerStore::new(&cli.ledger)
        .load()
        .with_context(|| format!("loading ledger {}", cli.ledger.display()))?;
    let rows = load_rows(input)?;
    let run = pipeline.run(&rows, &ledger.snapshot(), Utc::now())?;
    if !run.normalized.failures.is_empty() {
        warn!(
            failures = run.normalized.failures.len(),
            "some rows failed normalization; run `procura normalize` for details"
        );
    }
    Ok((pipeline, run))
}

fn resolve_window(config: &PipelineConfig, window: &WindowArgs) -> anyhow::Result<DateRange> {
    match (&window.period, window.from, window.to) {
        (Some(name), _, _) => Ok(config.period(name)?),
        (None, Some(from), Some(to)) => Ok(DateRange::new(from, to)?),
        _ => bail!("give either --period NAME or both --from and --to"),
    }
}

fn write_views(path: &Path, views: &[AggregateView]) -> anyhow::Result<()> {
    if is_parquet(path) {
        let batches = views
            .iter()
            .map(|v| procura_store::buckets_to_batch(v.dimension, &v.buckets))
            .collect::<Result<Vec<_>, _>>()?;
        procura_store::write_parquet(path, &batches)?;
    } else {
        let refs: Vec<&AggregateView> = views.iter().collect();
        procura_store::write_views_csv(create(path)?, &refs)?;
    }
    Ok(())
}

fn run_fix(ledger_path: &Path, action: &FixCommand) -> anyhow::Result<()> {
    let store = JsonLedgerStore::new(ledger_path);
    let entry = match action {
        FixCommand::Drop {
            record_id,
            rationale,
        } => FixEntry::drop(record_id.as_str(), rationale.as_str(), Utc::now()),
        FixCommand::Override {
            record_id,
            set,
            rationale,
        } => FixEntry::override_fields(
            record_id.as_str(),
            parse_overrides(set)?,
            rationale.as_str(),
            Utc::now(),
        ),
        FixCommand::Show { record_id } => {
            let ledger = store.load()?;
            match record_id {
                Some(id) => {
                    let history = ledger.history(&RecordId::new(id.as_str()));
                    if history.is_empty() {
                        println!("No fix entries for {id}");
                    }
                    for entry in history {
                        display::print_fix_entry(entry);
                    }
                }
                None => {
                    for entry in ledger.all_active().values() {
                        display::print_fix_entry(entry);
                    }
                    println!("{} active entries, {} total", ledger.all_active().len(), ledger.len());
                }
            }
            return Ok(());
        }
    };
    store
        .append(&entry)
        .with_context(|| format!("appending to {}", ledger_path.display()))?;
    display::print_fix_entry(&entry);
    Ok(())
}

/// Parse `FIELD=VALUE` pairs, rejecting fields an override may not touch.
fn parse_overrides(pairs: &[String]) -> anyhow::Result<BTreeMap<String, serde_json::Value>> {
    let mut overrides = BTreeMap::new();
    for pair in pairs {
        let Some((field, value)) = pair.split_once('=') else {
            bail!("expected FIELD=VALUE, got '{pair}'");
        };
        let field = field.trim();
        FieldName::from_str(field).with_context(|| format!("cannot override '{field}'"))?;
        let value = match value.trim() {
            "null" => serde_json::Value::Null,
            v => serde_json::Value::String(v.to_string()),
        };
        if overrides.insert(field.to_string(), value).is_some() {
            bail!("field '{field}' given twice");
        }
    }
    Ok(overrides)
}

fn is_parquet(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("parquet"))
}

fn create(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}
