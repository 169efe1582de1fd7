use std::env;
use std::time::Instant;

use horde::sim::{NullSink, UnitSnapshot};
use horde::{ExecutionMode, SimConfig, Simulation};

fn parse_arg<T: std::str::FromStr>(args: &[String], idx: usize, default: T) -> T {
    args.get(idx).and_then(|a| a.parse().ok()).unwrap_or(default)
}

fn run(config: SimConfig, ticks: usize) -> Result<Vec<UnitSnapshot>, Box<dyn std::error::Error>> {
    let mut sim = Simulation::new(config)?;
    let start = Instant::now();
    let stats = sim.run(ticks, &mut NullSink)?;
    let elapsed = start.elapsed();

    log::info!("{:?}: {:?}", config.mode, stats);
    println!(
        "{:>10}: {} ticks in {:.2?} ({:.2?}/tick), {} killed, {} respawned, {} hits",
        format!("{:?}", config.mode), ticks, elapsed, elapsed / ticks.max(1) as u32,
        stats.killed, stats.respawned, stats.hits_landed,
    );

    Ok(sim.snapshot())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = env::args().collect::<Vec<_>>();
    let entity_count = parse_arg(&args, 1, 10_000u32);
    let ticks = parse_arg(&args, 2, 500usize);
    let config = SimConfig::default()
        .with_entity_count(entity_count)
        .with_bounds(1000, 1000);

    let mut snapshots = Vec::new();
    for mode in ExecutionMode::ALL.iter().copied() {
        snapshots.push(run(config.with_mode(mode), ticks)?);
    }

    let agree = snapshots.windows(2).all(|w| w[0] == w[1]);
    println!("modes agree: {}", agree);
    if !agree {
        log::error!("execution modes diverged");
        std::process::exit(1);
    }

    Ok(())
}
