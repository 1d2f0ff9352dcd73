//! `sluice`: run scatter-gather queries against a simulated cluster.
//!
//! # Usage
//!
//! ```text
//! sluice run                                # query the default 4-node cluster
//! sluice -c sluice.toml run                 # with a config file
//! sluice run -n 16 -k 8 -q 256              # 16 nodes, 8 at a time, small queue
//! sluice run --fail-node 3 --no-bins        # one failing node, digests only
//! sluice run --fail-on-cluster-change --migrate-after-ms 20
//! sluice bench -i 20                        # repeated queries, records/s
//! ```

mod config;
mod sim;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sluice_query::{QueryExecutor, QueryOutcome};
use sluice_types::{NodeId, QueryDescriptor};
use tracing::{info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "sluice",
    version,
    about = "Cluster query scatter-gather engine demo"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the `[cluster]` and `[query]` config sections.
#[derive(clap::Args)]
struct QueryArgs {
    /// Number of simulated nodes.
    #[arg(short = 'n', long)]
    nodes: Option<usize>,

    /// Records stored on each node.
    #[arg(short = 'r', long)]
    records_per_node: Option<usize>,

    /// Maximum nodes queried at once (0 = all).
    #[arg(short = 'k', long)]
    max_concurrent_nodes: Option<usize>,

    /// Record queue capacity.
    #[arg(short = 'q', long)]
    queue_size: Option<usize>,

    /// Return digests and keys only.
    #[arg(long)]
    no_bins: bool,

    /// Abort if the cluster generation changes mid-query.
    #[arg(long)]
    fail_on_cluster_change: bool,

    /// Overall query deadline in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Make the given node (1-based) fail. Can be repeated.
    #[arg(long = "fail-node")]
    fail_nodes: Vec<usize>,

    /// Start a partition migration this many ms into the query.
    #[arg(long)]
    migrate_after_ms: Option<u64>,
}

impl QueryArgs {
    fn apply(self, config: &mut CliConfig) {
        if let Some(n) = self.nodes {
            config.cluster.nodes = n;
        }
        if let Some(r) = self.records_per_node {
            config.cluster.records_per_node = r;
        }
        if let Some(k) = self.max_concurrent_nodes {
            config.query.max_concurrent_nodes = k;
        }
        if let Some(q) = self.queue_size {
            config.query.record_queue_size = q;
        }
        if self.no_bins {
            config.query.include_bin_data = false;
        }
        if self.fail_on_cluster_change {
            config.query.fail_on_cluster_change = true;
        }
        if let Some(t) = self.timeout_ms {
            config.query.total_timeout_ms = t;
        }
        if !self.fail_nodes.is_empty() {
            config.cluster.failing_nodes = self.fail_nodes;
        }
        if self.migrate_after_ms.is_some() {
            config.cluster.migrate_after_ms = self.migrate_after_ms;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one query and print per-node record counts.
    Run {
        #[command(flatten)]
        args: QueryArgs,

        /// Print the first N records.
        #[arg(long, default_value = "0")]
        print: usize,
    },

    /// Run repeated queries and report throughput.
    Bench {
        #[command(flatten)]
        args: QueryArgs,

        /// Number of queries to run.
        #[arg(short, long, default_value = "10")]
        iterations: usize,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Run { args, print } => {
            args.apply(&mut config);
            config.validate()?;
            cmd_run(&config, print).await
        }
        Commands::Bench { args, iterations } => {
            args.apply(&mut config);
            config.validate()?;
            cmd_bench(&config, iterations).await
        }
    }
}

fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// sluice run
// -----------------------------------------------------------------------

async fn cmd_run(config: &CliConfig, print: usize) -> Result<()> {
    let sim = sim::build(&config.cluster).await;
    let executor = QueryExecutor::new(sim.view.clone(), sim.session.clone());

    info!(
        nodes = sim.nodes.len(),
        records_per_node = config.cluster.records_per_node,
        max_concurrent_nodes = config.query.max_concurrent_nodes,
        record_queue_size = config.query.record_queue_size,
        "running query"
    );

    let descriptor = QueryDescriptor::new(&config.cluster.namespace, &config.cluster.set);
    let mut cursor = executor
        .execute(descriptor, &config.query)
        .await
        .context("query rejected")?;
    if let Some(ms) = config.cluster.migrate_after_ms {
        sim::schedule_migration(sim.view.clone(), Duration::from_millis(ms));
    }

    let start = Instant::now();
    let mut per_node: BTreeMap<NodeId, u64> = BTreeMap::new();
    let mut total = 0u64;
    let result = loop {
        match cursor.next_from().await {
            Ok(Some((node, record))) => {
                if (total as usize) < print {
                    println!("{node:?} {:?} {:?}", record.key.user_key, record.bins);
                }
                *per_node.entry(node).or_default() += 1;
                total += 1;
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    let elapsed = start.elapsed();

    println!("Sluice query");
    println!("  nodes:       {}", sim.nodes.len());
    println!("  concurrency: {}", config.query.concurrency_for(sim.nodes.len()));
    println!("  queue size:  {}", config.query.record_queue_size);
    println!();
    for (index, node) in sim.nodes.iter().enumerate() {
        let count = per_node.get(node).copied().unwrap_or(0);
        println!("  node {:>3} {node:?}: {count} records", index + 1);
    }
    println!();
    println!("  records:     {total}");
    println!("  elapsed:     {:.3}s", elapsed.as_secs_f64());
    println!("  peak slots:  {}", cursor.admission_gate().high_water());
    println!("  outcome:     {}", describe(cursor.outcome()));

    result.context("query did not complete")
}

fn describe(outcome: Option<QueryOutcome>) -> String {
    match outcome {
        Some(QueryOutcome::Completed) => "completed".to_string(),
        Some(QueryOutcome::PartialFailure(errors)) => {
            let nodes: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            format!("partial failure ({})", nodes.join("; "))
        }
        Some(QueryOutcome::Aborted(reason)) => format!("aborted: {reason:?}"),
        None => "unknown".to_string(),
    }
}

// -----------------------------------------------------------------------
// sluice bench
// -----------------------------------------------------------------------

async fn cmd_bench(config: &CliConfig, iterations: usize) -> Result<()> {
    let sim = sim::build(&config.cluster).await;
    let executor = QueryExecutor::new(sim.view.clone(), sim.session.clone());

    println!("Sluice Benchmark");
    println!("  nodes:       {}", sim.nodes.len());
    println!("  records:     {} per node", config.cluster.records_per_node);
    println!("  concurrency: {}", config.query.concurrency_for(sim.nodes.len()));
    println!("  queue size:  {}", config.query.record_queue_size);
    println!("  iterations:  {iterations}");
    println!();

    let mut total_records = 0u64;
    let mut failed = 0usize;
    let start = Instant::now();
    for i in 0..iterations {
        let descriptor = QueryDescriptor::new(&config.cluster.namespace, &config.cluster.set);
        let mut cursor = executor.execute(descriptor, &config.query).await?;
        let (records, result) = cursor.collect_all().await;
        total_records += records.len() as u64;
        if let Err(e) = result {
            warn!(iteration = i, error = %e, "query did not complete");
            failed += 1;
        }
    }
    let elapsed = start.elapsed();
    let rate = total_records as f64 / elapsed.as_secs_f64();

    println!("Summary:");
    println!("  Records:    {total_records}");
    println!("  Failed:     {failed}/{iterations}");
    println!("  Elapsed:    {:.3}s", elapsed.as_secs_f64());
    println!("  Throughput: {rate:.0} records/s");

    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
