use clap::{Parser, ValueEnum};
use log::info;

use junction_sim::simulation::{SimOptions, SimWorld, SimulationAccuracy};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Accuracy {
    Low,
    High,
}

impl From<Accuracy> for SimulationAccuracy {
    fn from(accuracy: Accuracy) -> Self {
        match accuracy {
            Accuracy::Low => SimulationAccuracy::Low,
            Accuracy::High => SimulationAccuracy::High,
        }
    }
}

#[derive(Parser)]
#[command(name = "junction_sim")]
#[command(about = "Junction lane routing and right-of-way simulation")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value = "1000")]
    ticks: u32,

    /// Time delta per tick in seconds
    #[arg(long, default_value = "0.1")]
    delta: f32,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Drive on the left
    #[arg(long)]
    left_hand_traffic: bool,

    /// Disable relaxed lane discipline at highway junctions
    #[arg(long)]
    no_highway_rules: bool,

    /// Arbitration accuracy
    #[arg(long, value_enum, default_value = "high")]
    accuracy: Accuracy,

    /// Ticks a vehicle waits at a sign before it is let through regardless
    #[arg(long)]
    max_wait_ticks: Option<u32>,

    /// Vehicles spawned per simulated second
    #[arg(long, default_value = "1.0")]
    spawn_rate: f32,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    run_headless(&cli);
}

/// Run the simulation on the test world without graphics
fn run_headless(cli: &Cli) {
    info!("Running junction simulation in headless mode...");
    info!("Ticks: {}, Delta: {}s", cli.ticks, cli.delta);

    let mut options = SimOptions::default();
    options.routing.highway_rules = !cli.no_highway_rules;
    options.priority.accuracy = cli.accuracy.into();
    if let Some(max_wait) = cli.max_wait_ticks {
        options.priority.max_wait_ticks = max_wait;
    }

    let mut world = SimWorld::build_test_world(SimWorld::with_options(
        options,
        cli.left_hand_traffic,
        cli.seed,
    ));
    world.spawn_rate = cli.spawn_rate;

    // Calculate how many ticks equal 1 second of simulation time
    let ticks_per_second = (1.0 / cli.delta).ceil().max(1.0) as u32;

    for tick in 1..=cli.ticks {
        world.tick(cli.delta);
        if tick % (ticks_per_second * 10) == 0 {
            world.log_progress();
        }
    }

    world.log_summary();
}
