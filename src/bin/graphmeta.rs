use std::path::PathBuf;
use std::process;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use graphmeta::{
    CountsAggregator, GraphMetaError, MetadataStore, PropertyAggregator, SharedGraph,
    cache::SnapshotCache, config::DEFAULT_RECORD_LABEL, drift::check_drift,
    scheduler::full_recompute,
};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "graphmeta",
    version,
    about = "Inspect and rebuild label-set metadata of a graph database",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, env = "GRAPHMETA_DB", value_name = "PATH", help = "SQLite graph file")]
    db: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = DEFAULT_RECORD_LABEL,
        help = "Reserved label of the metadata record"
    )]
    label: String,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Entity count and size of the persisted record.
    Status,
    /// Recompute counts and property keys from the live graph.
    Recount {
        #[arg(long, value_name = "DIR", help = "Also write the cold-start snapshot here")]
        cache_dir: Option<PathBuf>,
    },
    /// Print the persisted record.
    Show,
    /// Compare the persisted record with the live graph; exits 1 on drift.
    Verify,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    install_tracing_subscriber();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("command failed: {err}");
            process::exit(2);
        }
    }
}

fn install_tracing_subscriber() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

fn run(cli: &Cli) -> Result<i32, GraphMetaError> {
    let graph = Arc::new(SharedGraph::open(&cli.db)?);
    let store = Arc::new(MetadataStore::new(Arc::clone(&graph), cli.label.clone()));
    let counts = CountsAggregator::new(Arc::clone(&store));

    match &cli.command {
        Command::Status => {
            let entities = graph.lock().entity_count()?;
            let record_id = store.record_id()?;
            let record = store.load()?;
            match cli.format {
                OutputFormat::Text => {
                    let record_id = record_id.map_or_else(|| "none".to_string(), |id| id.to_string());
                    println!(
                        "entities={entities} record={record_id} label_sets={} labels={}",
                        record.counts.len(),
                        record.properties.len()
                    );
                }
                OutputFormat::Json => print_json(&json!({
                    "entities": entities,
                    "record": record_id,
                    "label_sets": record.counts.len(),
                    "labels": record.properties.len(),
                }))?,
            }
            Ok(0)
        }
        Command::Recount { cache_dir } => {
            let properties = PropertyAggregator::new(Arc::clone(&store), Duration::ZERO);
            let cache = cache_dir.as_ref().map(SnapshotCache::new);
            let record = full_recompute(&counts, &properties, cache.as_ref())?;
            match cli.format {
                OutputFormat::Text => println!(
                    "recounted label_sets={} labels={}",
                    record.counts.len(),
                    record.properties.len()
                ),
                OutputFormat::Json => print_json(&record)?,
            }
            Ok(0)
        }
        Command::Show => {
            let record = store.load()?;
            match cli.format {
                OutputFormat::Text => {
                    for entry in record.counts.values() {
                        println!(
                            "{} count={} relations={}",
                            entry.labels, entry.count, entry.relations
                        );
                    }
                    for (label, props) in &record.properties {
                        let names: Vec<&str> = props.keys().map(String::as_str).collect();
                        println!("{label}: {}", names.join(","));
                    }
                }
                OutputFormat::Json => print_json(&record)?,
            }
            Ok(0)
        }
        Command::Verify => {
            let report = check_drift(&counts)?;
            match cli.format {
                OutputFormat::Text => {
                    for drift in &report.counts {
                        println!(
                            "drift {} persisted={:?} live={:?}",
                            drift.labels, drift.persisted, drift.live
                        );
                    }
                    for (label, keys) in &report.missing_property_keys {
                        println!("missing properties {label}: {}", keys.join(","));
                    }
                    if !report.has_drift() {
                        println!("ok label_sets={}", report.live_entries);
                    }
                }
                OutputFormat::Json => print_json(&report)?,
            }
            Ok(if report.has_drift() { 1 } else { 0 })
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), GraphMetaError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| GraphMetaError::encode(e.to_string()))?;
    println!("{text}");
    Ok(())
}
