//! Skyhop Simulation Engine CLI
//!
//! Runs scheduling policies over per-region spot availability (trace files
//! or synthetic) and compares cost and deadline outcomes.
//!
//! ```bash
//! # Synthetic traces, three regions
//! skyhop-sim --regions 3 --seed 7
//!
//! # Recorded traces as predictions, separate files as ground truth
//! skyhop-sim --traces us-east.csv,us-west.json.lz4 --live-traces east-live.csv,west-live.csv
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skyhop_core::{EpochGrid, Task};
use skyhop_simulation_engine::{
    policies::{GreedySpotPolicy, OnDemandOnlyPolicy, SchedulingPolicy},
    spot_data::AvailabilityGenerator,
    trace::TraceIngestor,
    AvailabilityIndex, DecisionEngine, Polarity, PolicyConfig, SimulatedEnvironment,
    SimulationResult, Simulator, TraceSpec,
};

#[derive(Parser, Debug)]
#[command(name = "skyhop-sim")]
#[command(about = "Simulate deadline-aware spot scheduling across regions", long_about = None)]
struct Args {
    /// Task compute time (seconds)
    #[arg(short, long, default_value_t = 36_000.0)]
    duration: f64,

    /// Task deadline (seconds from start)
    #[arg(long, default_value_t = 54_000.0)]
    deadline: f64,

    /// Restart overhead paid after every (re)start (seconds)
    #[arg(long, default_value_t = 600.0)]
    restart_overhead: f64,

    /// Epoch length (seconds)
    #[arg(short, long, default_value_t = 300.0)]
    gap: f64,

    /// Per-region predicted availability traces (comma-separated)
    #[arg(long, value_delimiter = ',')]
    traces: Vec<PathBuf>,

    /// Per-region ground-truth traces; defaults to the predicted traces
    #[arg(long, value_delimiter = ',')]
    live_traces: Vec<PathBuf>,

    /// Native sample period of the trace files (seconds); defaults to the epoch length
    #[arg(long)]
    trace_sample_seconds: Option<f64>,

    /// Trace samples mark unavailability instead of availability
    #[arg(long)]
    inverted_polarity: bool,

    /// Do not give the deadline-aware policy any predictions
    #[arg(long)]
    no_predictions: bool,

    /// Let policies query live availability in every region
    #[arg(long)]
    multi_region_query: bool,

    /// Number of synthetic regions (used without --traces)
    #[arg(short, long, default_value_t = 3)]
    regions: usize,

    /// Seed for synthetic traces
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Mean available run length of synthetic traces (epochs)
    #[arg(long, default_value_t = 12.0)]
    mean_up: f64,

    /// Mean outage length of synthetic traces (epochs)
    #[arg(long, default_value_t = 6.0)]
    mean_down: f64,

    /// Policy configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Policies to compare (comma-separated: deadline,greedy,ondemand)
    #[arg(short, long, default_value = "deadline,greedy,ondemand")]
    policies: String,

    /// On-demand instance price ($/hr)
    #[arg(long, default_value_t = 1.00)]
    on_demand_price: f64,

    /// Spot instance price ($/hr)
    #[arg(long, default_value_t = 0.30)]
    spot_price: f64,

    /// Output JSON file path (optional)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    fn trace_specs(&self, paths: &[PathBuf]) -> Vec<TraceSpec> {
        let polarity = if self.inverted_polarity {
            Polarity::AvailableIsFalse
        } else {
            Polarity::AvailableIsTrue
        };
        paths
            .iter()
            .map(|path| {
                let spec = TraceSpec::from_path(path).with_polarity(polarity);
                match self.trace_sample_seconds {
                    Some(seconds) => spec.with_sample_seconds(seconds),
                    None => spec,
                }
            })
            .collect()
    }
}

/// Predicted and ground-truth availability, one array per region
struct Availability {
    predicted: Vec<Vec<bool>>,
    truth: Vec<Vec<bool>>,
}

fn load_availability(args: &Args, grid: EpochGrid, horizon: usize) -> Availability {
    if args.traces.is_empty() {
        let generator = AvailabilityGenerator::new(args.mean_up, args.mean_down);
        let truth = generator.generate_regions(args.seed, args.regions.max(1), horizon);
        info!(
            regions = truth.len(),
            seed = args.seed,
            expected_availability = generator.expected_availability(),
            "Generated synthetic availability"
        );
        return Availability {
            predicted: truth.clone(),
            truth,
        };
    }

    let ingestor = TraceIngestor::new(grid, horizon);
    let (predicted, reports) = ingestor.ingest_all(&args.trace_specs(&args.traces));
    for report in &reports {
        info!(
            region = report.region,
            status = ?report.status,
            available_epochs = report.available_epochs,
            "Loaded predicted trace"
        );
    }

    let truth = if args.live_traces.is_empty() {
        predicted.clone()
    } else {
        if args.live_traces.len() != args.traces.len() {
            warn!(
                predicted = args.traces.len(),
                live = args.live_traces.len(),
                "Live and predicted trace counts differ"
            );
        }
        ingestor.ingest_all(&args.trace_specs(&args.live_traces)).0
    };

    Availability { predicted, truth }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skyhop=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PolicyConfig::from_json_file(path)
            .with_context(|| format!("loading policy config {}", path.display()))?,
        None => PolicyConfig::default(),
    };
    let task = Task::new(args.duration, args.deadline, args.restart_overhead);
    let grid = EpochGrid::new(args.gap).context("invalid epoch length")?;
    let horizon = grid.horizon(task.deadline, config.horizon_margin_epochs);

    println!("Configuration:");
    println!(
        "  Duration: {:.0}s  Deadline: {:.0}s  Slack: {:.0}s",
        task.duration,
        task.deadline,
        task.slack()
    );
    println!(
        "  Restart overhead: {:.0}s  Epoch: {:.0}s  Horizon: {} epochs",
        task.restart_overhead, grid.gap_seconds, horizon
    );
    println!("  On-demand price: ${:.2}/hr", args.on_demand_price);
    println!("  Spot price: ${:.2}/hr\n", args.spot_price);

    let availability = load_availability(&args, grid, horizon);
    let index = (!args.no_predictions).then(|| {
        Arc::new(AvailabilityIndex::build(
            availability.predicted.clone(),
            horizon,
        ))
    });

    let policy_names: Vec<&str> = args.policies.split(',').map(|s| s.trim()).collect();
    let simulator = Simulator::new(task, args.spot_price, args.on_demand_price);
    let mut results: Vec<SimulationResult> = Vec::new();

    for policy_name in &policy_names {
        let mut env = SimulatedEnvironment::new(
            availability.truth.clone(),
            grid.gap_seconds,
            task.restart_overhead,
        )
        .with_multi_region_query(args.multi_region_query);

        let mut policy: Box<dyn SchedulingPolicy> = match *policy_name {
            "deadline" => Box::new(DecisionEngine::for_environment(
                &env,
                task,
                config.clone(),
                index.clone(),
            )?),
            "greedy" => Box::new(GreedySpotPolicy::new()),
            "ondemand" => Box::new(OnDemandOnlyPolicy::new(task.duration)),
            _ => {
                warn!(policy = %policy_name, "Unknown policy, skipping");
                continue;
            }
        };

        print!("Running simulation with {} policy... ", policy_name);
        let result = simulator.run(policy.as_mut(), &mut env);
        println!("Done");
        results.push(result);
    }

    println!("\nSimulation Results\n");
    println!(
        "{:<14} {:>10} {:>10} {:>12} {:>10} {:>10} {:>10} {:>8} {:>10}",
        "Policy",
        "Cost ($)",
        "Deadline",
        "Finish (s)",
        "Spot (s)",
        "OD (s)",
        "Idle (s)",
        "Preempt",
        "Switches"
    );
    println!("{}", "-".repeat(102));

    for result in &results {
        let finish = result
            .finish_time
            .map_or_else(|| "-".to_string(), |t| format!("{t:.0}"));
        println!(
            "{:<14} {:>10.2} {:>10} {:>12} {:>10.0} {:>10.0} {:>10.0} {:>8} {:>10}",
            result.policy_name,
            result.total_cost,
            if result.deadline_met { "met" } else { "MISSED" },
            finish,
            result.spot_seconds,
            result.on_demand_seconds,
            result.idle_seconds,
            result.preemptions,
            result.region_switches,
        );
    }

    let baseline = results
        .iter()
        .find(|r| r.policy_name == "OnDemandOnly")
        .or_else(|| results.iter().max_by(|a, b| a.total_cost.total_cmp(&b.total_cost)));

    if let Some(baseline) = baseline.filter(|b| results.len() > 1 && b.total_cost > 0.0) {
        println!("\n{}", "-".repeat(102));
        println!("Cost Savings vs {} baseline:", baseline.policy_name);

        for result in results.iter().filter(|r| r.policy_name != baseline.policy_name) {
            let savings = baseline.total_cost - result.total_cost;
            let savings_pct = savings / baseline.total_cost * 100.0;
            println!(
                "  {:<18} ${:>8.2} ({:>5.1}%)",
                result.policy_name, savings, savings_pct
            );
        }
    }

    if let Some(output_path) = &args.output {
        println!("\nWriting results to {}...", output_path.display());
        let json = serde_json::to_string_pretty(&results)?;
        fs::write(output_path, json)
            .with_context(|| format!("writing results to {}", output_path.display()))?;
        println!("  Results saved");
    }

    Ok(())
}
