//! # parsim-cli::args
//!
//! Command-line argument structure. The `run` options mirror the
//! `RunConfig` fields one to one; an optional TOML file supplies
//! defaults and the flags override it.

use clap::{Args, Parser, Subcommand};
use parsim_types::config::RunConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Tracing filter, e.g. `info` or `parsim_engine=debug`.
    #[arg(long, global = true, default_value = "info")]
    pub log: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one of the built-in demo wirings.
    Run(RunOpts),
    /// Resume a run from a checkpoint registry.
    Restart(RestartOpts),
    /// List the demo wirings and registered component libraries.
    ListDemos,
}

#[derive(Args, Debug)]
pub struct RunOpts {
    /// Demo wiring to run (see `list-demos`).
    #[arg(short, long, default_value = "pingpong")]
    pub demo: String,

    /// Number of partition threads.
    #[arg(long, default_value_t = 1)]
    pub threads: u32,

    /// Optional TOML run-config file; flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub core: CoreOpts,
}

#[derive(Args, Debug)]
pub struct RestartOpts {
    /// Path to the checkpoint registry file.
    #[arg(value_name = "REGISTRY")]
    pub registry: PathBuf,

    #[command(flatten)]
    pub core: CoreOpts,
}

/// The core option fragment, shared by run and restart.
#[derive(Args, Debug)]
pub struct CoreOpts {
    /// Schedule a Stop activity at this simulated time (e.g. `100ns`).
    #[arg(long)]
    pub stop_at: Option<String>,

    /// Wall-clock limit after which the run exits cleanly.
    #[arg(long)]
    pub exit_after: Option<String>,

    /// Checkpoint every this much simulated time.
    #[arg(long)]
    pub checkpoint_sim_period: Option<String>,

    /// Checkpoint every this much wall time.
    #[arg(long)]
    pub checkpoint_wall_period: Option<String>,

    /// Checkpoint filename prefix.
    #[arg(long)]
    pub checkpoint_prefix: Option<String>,

    /// Heartbeat every this much simulated time.
    #[arg(long)]
    pub heartbeat_sim_period: Option<String>,

    /// Heartbeat every this much wall time.
    #[arg(long)]
    pub heartbeat_wall_period: Option<String>,

    /// Action identifier for SIGUSR1 (`status` or `checkpoint`).
    #[arg(long)]
    pub sigusr1: Option<String>,

    /// Action identifier for SIGUSR2.
    #[arg(long)]
    pub sigusr2: Option<String>,

    /// SIGALRM action list: `action(key=val,...);...`.
    #[arg(long)]
    pub sigalrm: Option<String>,

    /// Interactive console type.
    #[arg(long)]
    pub interactive_console: Option<String>,

    /// Simulated time at which to enter the interactive console.
    #[arg(long)]
    pub interactive_start: Option<String>,

    /// Profiling spec: `name:type(k=v,...)[point,point];...`.
    #[arg(long)]
    pub enable_profiling: Option<String>,

    /// Process time base (e.g. `1ps`).
    #[arg(long)]
    pub timebase: Option<String>,

    /// Output directory for checkpoints.
    #[arg(long)]
    pub output_directory: Option<String>,
}

impl CoreOpts {
    /// Layers these flags over a base configuration.
    pub fn apply(&self, mut config: RunConfig) -> RunConfig {
        macro_rules! take {
            ($($field:ident),+) => {
                $( if let Some(v) = &self.$field { config.$field = Some(v.clone()); } )+
            };
        }
        take!(
            stop_at,
            exit_after,
            checkpoint_sim_period,
            checkpoint_wall_period,
            heartbeat_sim_period,
            heartbeat_wall_period,
            sigusr1,
            sigusr2,
            sigalrm,
            interactive_console,
            interactive_start,
            enable_profiling
        );
        if let Some(v) = &self.checkpoint_prefix {
            config.checkpoint_prefix = v.clone();
        }
        if let Some(v) = &self.timebase {
            config.timebase = v.clone();
        }
        if let Some(v) = &self.output_directory {
            config.output_directory = v.clone();
        }
        config
    }
}
