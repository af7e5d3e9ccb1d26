//! # parsim-engine::realtime
//!
//! The real-time manager: wall-clock alarms delivered out of band. A
//! background thread watches the configured wall deadlines (exit-after,
//! wall-period checkpoints and heartbeats) and raises flags in a shared
//! atomic word; the run loop checks the word after each activity and
//! reacts at the next iteration. Signal handlers installed by the
//! embedder call [`RealTimeManager::notify_action`] (or the sigusr/
//! sigalrm dispatchers) with an action identifier; the core never
//! installs handlers itself.

use parsim_types::config::{parse_signal_actions, parse_wall_time, RunConfig};
use parsim_types::errors::ConfigError;
use parsim_types::persist_fields;
use parsim_types::ser::{Persist, Serializer};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const FLAG_CLEAN_EXIT: u32 = 1 << 0;
pub const FLAG_CHECKPOINT: u32 = 1 << 1;
pub const FLAG_HEARTBEAT: u32 = 1 << 2;
pub const FLAG_STATUS: u32 = 1 << 3;
pub const FLAG_EMERGENCY: u32 = 1 << 4;
pub const FLAG_INTERACTIVE: u32 = 1 << 5;

pub struct RealTimeManager {
    flags: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    exit_after: Option<Duration>,
    checkpoint_wall: Option<Duration>,
    heartbeat_wall: Option<Duration>,
    started: Option<Instant>,
    /// Action identifiers for SIGUSR1/SIGUSR2.
    sigusr1: Option<String>,
    sigusr2: Option<String>,
    /// Parsed SIGALRM action list (identifiers with parameters).
    sigalrm: Vec<(String, Vec<(String, String)>)>,
}

impl RealTimeManager {
    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigError> {
        let parse = |v: &Option<String>| -> Result<Option<Duration>, ConfigError> {
            v.as_deref().map(parse_wall_time).transpose()
        };
        Ok(Self {
            flags: Arc::new(AtomicU32::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            exit_after: parse(&config.exit_after)?,
            checkpoint_wall: parse(&config.checkpoint_wall_period)?,
            heartbeat_wall: parse(&config.heartbeat_wall_period)?,
            started: None,
            sigusr1: config.sigusr1.clone(),
            sigusr2: config.sigusr2.clone(),
            sigalrm: config
                .sigalrm
                .as_deref()
                .map(parse_signal_actions)
                .transpose()?
                .unwrap_or_default(),
        })
    }

    /// A handle the embedder's signal handlers can poke.
    pub fn flags_handle(&self) -> Arc<AtomicU32> {
        self.flags.clone()
    }

    /// Starts the alarm thread. Idempotent; a manager with nothing to
    /// watch never spawns.
    pub fn begin(&mut self) {
        self.started = Some(Instant::now());
        if self.handle.is_some() {
            return;
        }
        if self.exit_after.is_none() && self.checkpoint_wall.is_none() && self.heartbeat_wall.is_none()
        {
            return;
        }
        let flags = self.flags.clone();
        let stop = self.stop.clone();
        let exit_after = self.exit_after;
        let checkpoint_wall = self.checkpoint_wall;
        let heartbeat_wall = self.heartbeat_wall;
        self.handle = Some(
            std::thread::Builder::new()
                .name("parsim-rt".to_string())
                .spawn(move || {
                    let started = Instant::now();
                    let mut next_checkpoint = checkpoint_wall.map(|p| started + p);
                    let mut next_heartbeat = heartbeat_wall.map(|p| started + p);
                    loop {
                        if stop.load(Ordering::Relaxed) {
                            return;
                        }
                        std::thread::sleep(Duration::from_millis(50));
                        let now = Instant::now();
                        if let Some(limit) = exit_after {
                            if now.duration_since(started) >= limit {
                                flags.fetch_or(FLAG_CLEAN_EXIT, Ordering::SeqCst);
                            }
                        }
                        if let Some(deadline) = next_checkpoint {
                            if now >= deadline {
                                flags.fetch_or(FLAG_CHECKPOINT, Ordering::SeqCst);
                                next_checkpoint =
                                    checkpoint_wall.map(|p| deadline + p);
                            }
                        }
                        if let Some(deadline) = next_heartbeat {
                            if now >= deadline {
                                flags.fetch_or(FLAG_HEARTBEAT, Ordering::SeqCst);
                                next_heartbeat = heartbeat_wall.map(|p| deadline + p);
                            }
                        }
                    }
                })
                .expect("failed to spawn real-time manager thread"),
        );
    }

    /// Drains and returns the raised flags.
    pub fn poll(&self) -> u32 {
        self.flags.swap(0, Ordering::SeqCst)
    }

    /// Raises the flag for a named action (the signal-handler entry
    /// point). Unknown identifiers are ignored with a warning.
    pub fn notify_action(flags: &AtomicU32, action: &str) {
        let bit = match action {
            "status" => FLAG_STATUS,
            "checkpoint" => FLAG_CHECKPOINT,
            "heartbeat" => FLAG_HEARTBEAT,
            "clean-exit" => FLAG_CLEAN_EXIT,
            "emergency" => FLAG_EMERGENCY,
            "interactive" => FLAG_INTERACTIVE,
            other => {
                tracing::warn!(action = other, "unknown real-time action identifier");
                return;
            }
        };
        flags.fetch_or(bit, Ordering::SeqCst);
    }

    /// Dispatches SIGUSR1 to its configured action.
    pub fn notify_sigusr1(&self) {
        if let Some(action) = &self.sigusr1 {
            Self::notify_action(&self.flags, action);
        }
    }

    pub fn notify_sigusr2(&self) {
        if let Some(action) = &self.sigusr2 {
            Self::notify_action(&self.flags, action);
        }
    }

    /// Dispatches SIGALRM to its configured action list.
    pub fn notify_sigalrm(&self) {
        for (action, _params) in &self.sigalrm {
            Self::notify_action(&self.flags, action);
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RealTimeManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Persist for RealTimeManager {
    fn persist(&mut self, ser: &mut Serializer) {
        // Only configuration travels; the alarm thread is reconstructed.
        let mut exit_after = self.exit_after.map(|d| d.as_secs());
        let mut checkpoint_wall = self.checkpoint_wall.map(|d| d.as_secs());
        let mut heartbeat_wall = self.heartbeat_wall.map(|d| d.as_secs());
        persist_fields!(
            ser,
            exit_after,
            checkpoint_wall,
            heartbeat_wall,
            self.sigusr1,
            self.sigusr2,
            self.sigalrm
        );
        self.exit_after = exit_after.map(Duration::from_secs);
        self.checkpoint_wall = checkpoint_wall.map(Duration::from_secs);
        self.heartbeat_wall = heartbeat_wall.map(Duration::from_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_drains_flags() {
        let config = RunConfig::default();
        let mgr = RealTimeManager::from_config(&config).unwrap();
        RealTimeManager::notify_action(&mgr.flags_handle(), "status");
        RealTimeManager::notify_action(&mgr.flags_handle(), "checkpoint");
        let raised = mgr.poll();
        assert_eq!(raised & FLAG_STATUS, FLAG_STATUS);
        assert_eq!(raised & FLAG_CHECKPOINT, FLAG_CHECKPOINT);
        assert_eq!(mgr.poll(), 0);
    }

    #[test]
    fn sigusr_dispatch_uses_configured_action() {
        let config = RunConfig {
            sigusr1: Some("status".to_string()),
            ..RunConfig::default()
        };
        let mgr = RealTimeManager::from_config(&config).unwrap();
        mgr.notify_sigusr1();
        assert_eq!(mgr.poll() & FLAG_STATUS, FLAG_STATUS);
        // SIGUSR2 is unconfigured: nothing raised.
        mgr.notify_sigusr2();
        assert_eq!(mgr.poll(), 0);
    }

    #[test]
    fn sigalrm_dispatches_each_configured_action() {
        let config = RunConfig {
            sigalrm: Some("checkpoint;status(verbose=1)".to_string()),
            ..RunConfig::default()
        };
        let mgr = RealTimeManager::from_config(&config).unwrap();
        mgr.notify_sigalrm();
        let raised = mgr.poll();
        assert_eq!(raised & FLAG_CHECKPOINT, FLAG_CHECKPOINT);
        assert_eq!(raised & FLAG_STATUS, FLAG_STATUS);
    }

    #[test]
    fn exit_after_raises_clean_exit() {
        let config = RunConfig {
            exit_after: Some("0s".to_string()),
            ..RunConfig::default()
        };
        let mut mgr = RealTimeManager::from_config(&config).unwrap();
        mgr.begin();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(mgr.poll() & FLAG_CLEAN_EXIT, FLAG_CLEAN_EXIT);
        mgr.shutdown();
    }
}
