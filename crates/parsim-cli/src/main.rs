//! # parsim-cli
//!
//! The parsim binary: parses the core's command-line fragment, sets up
//! tracing, and drives a demo wiring or a checkpoint restart through
//! the full lifecycle.

#![forbid(unsafe_code)]

use crate::args::{Cli, Command, RestartOpts, RunOpts};
use anyhow::{Context, Result};
use clap::Parser;
use parsim_engine::prelude::*;
use parsim_types::config::RunConfig;
use tracing_subscriber::EnvFilter;

mod args;
mod wiring;

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli.command {
        Command::Run(opts) => run(opts),
        Command::Restart(opts) => restart(opts),
        Command::ListDemos => {
            for (name, what) in wiring::DEMOS {
                println!("{name:>10}  {what}");
            }
            Ok(())
        }
    }
}

fn load_config(opts: &RunOpts) -> Result<RunConfig> {
    let base = match &opts.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            RunConfig::from_toml(&text)?
        }
        None => RunConfig::default(),
    };
    Ok(opts.core.apply(base))
}

fn run(opts: RunOpts) -> Result<()> {
    let config = load_config(&opts)?;
    let sims = wiring::build_demo(&opts.demo, config, opts.threads.max(1))?;
    let finished = run_process(sims)?;
    report(&finished);
    Ok(())
}

fn restart(opts: RestartOpts) -> Result<()> {
    let config = opts.core.apply(RunConfig::default());
    let factory = wiring::demo_factory()?;
    let mut sims = restart_process(&opts.registry, &config, factory, None)?;
    if sims.len() == 1 {
        sims[0].execute_from_restart()?;
        report(&sims);
        return Ok(());
    }
    // Multi-thread restart: each partition resumes on its own thread.
    let handles: Vec<_> = sims
        .into_iter()
        .map(|mut sim| {
            std::thread::spawn(move || -> std::result::Result<Sim, SimError> {
                sim.execute_from_restart()?;
                Ok(sim)
            })
        })
        .collect();
    let mut finished = Vec::new();
    for handle in handles {
        match handle.join() {
            Ok(result) => finished.push(result?),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
    report(&finished);
    Ok(())
}

fn report(sims: &[Sim]) {
    for sim in sims {
        let stats = sim.stats();
        tracing::info!(
            partition = %sim.my_rank(),
            sim_time = %sim.timelord().format_time(sim.end_sim_cycle()),
            activities = stats.activities_popped,
            events = stats.events_delivered,
            max_depth = sim.vortex().max_depth(),
            "simulation summary"
        );
    }
}
