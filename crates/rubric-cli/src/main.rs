//! `rubric`: inspect datasets, schema expansions and round snapshots.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use rubric_core::graph::level_count;
use rubric_core::schema::parse_structured;
use rubric_core::{dependency_levels, Constraint, Dataset, RoundStats};
use rubric_runtime::{load_snapshot, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "rubric", version, about = "Constraint-based evaluation of model responses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate a dataset, then print constraint counts per dependency level
    Check {
        /// Dataset file (.json, .yaml or .yml)
        dataset: PathBuf,
    },

    /// Recompute statistics from a round snapshot
    Stats {
        /// Snapshot file written by a run (round_<n>.json)
        snapshot: PathBuf,

        /// Round number to report
        #[arg(long, default_value_t = 1)]
        round: usize,

        /// Engine config supplying the capability tree
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Expand a schema against one response and print the field constraints
    Expand {
        /// JSON schema file
        #[arg(long)]
        schema: PathBuf,

        /// Response text file
        #[arg(long)]
        response: PathBuf,
    },
}

#[derive(Serialize)]
struct CheckSummary {
    items: usize,
    constraints: usize,
    levels: BTreeMap<usize, usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rubric=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Check { dataset } => check(dataset),
        Command::Stats { snapshot, round, config } => stats(snapshot, round, config),
        Command::Expand { schema, response } => expand_schema(schema, response),
    }
}

fn check(path: PathBuf) -> Result<()> {
    let dataset = Dataset::from_file(&path).with_context(|| format!("loading {}", path.display()))?;

    let mut summary = CheckSummary { items: dataset.len(), constraints: 0, levels: BTreeMap::new() };
    let mut deepest = 0;
    for item in &dataset.items {
        let levels = dependency_levels(&item.constraints)?;
        deepest = deepest.max(level_count(&levels));
        summary.constraints += levels.len();
        for level in levels {
            *summary.levels.entry(level).or_default() += 1;
        }
    }

    tracing::info!(items = summary.items, levels = deepest, "Dataset valid");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn stats(path: PathBuf, round: usize, config: Option<PathBuf>) -> Result<()> {
    let items = load_snapshot(&path).with_context(|| format!("loading {}", path.display()))?;
    let config = match config {
        Some(config_path) => EngineConfig::from_yaml_file(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?,
        None => EngineConfig::default(),
    };

    let stats = RoundStats::from_items(round, &items, &config.tree());
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn expand_schema(schema_path: PathBuf, response_path: PathBuf) -> Result<()> {
    let schema_text = fs::read_to_string(&schema_path)
        .with_context(|| format!("reading {}", schema_path.display()))?;
    let schema = parse_structured(&schema_text).with_context(|| format!("parsing {}", schema_path.display()))?;
    let response = fs::read_to_string(&response_path)
        .with_context(|| format!("reading {}", response_path.display()))?;

    let constraints: Vec<Constraint> = rubric_core::schema::expand(&schema, &response);
    let failed = constraints.iter().filter(|c| c.failed()).count();
    tracing::info!(fields = constraints.len(), failed, "Schema expanded");
    println!("{}", serde_json::to_string_pretty(&constraints)?);
    Ok(())
}
