//! # parsim-types::config
//!
//! The run configuration consumed by the simulation core. The CLI builds
//! one of these from flags, optionally layered over a TOML file with the
//! same field names. Only the fragment the core cares about lives here;
//! graph construction inputs are a front-end concern.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Run-level options for the simulation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Simulated time at which to schedule a Stop activity, e.g. `100ns`.
    pub stop_at: Option<String>,
    /// Wall-clock limit (`H:M:S`, `M:S`, `S`, `<N>h/m/s`) for a clean exit.
    pub exit_after: Option<String>,
    /// Checkpoint every this much simulated time, e.g. `50ns`.
    pub checkpoint_sim_period: Option<String>,
    /// Checkpoint every this much wall time.
    pub checkpoint_wall_period: Option<String>,
    /// Prefix for checkpoint file names.
    pub checkpoint_prefix: String,
    /// Heartbeat every this much simulated time.
    pub heartbeat_sim_period: Option<String>,
    /// Heartbeat every this much wall time.
    pub heartbeat_wall_period: Option<String>,
    /// Action identifier to run on SIGUSR1 (`status` or `checkpoint`).
    pub sigusr1: Option<String>,
    /// Action identifier to run on SIGUSR2.
    pub sigusr2: Option<String>,
    /// Semicolon-separated `action(key=val,...)` list for SIGALRM.
    pub sigalrm: Option<String>,
    /// Interactive console type (the console itself is an external tool).
    pub interactive_console: Option<String>,
    /// Simulated time at which to enter the interactive console.
    pub interactive_start: Option<String>,
    /// Profiling tool spec: `name:type(k=v,...)[point,point];...`.
    pub enable_profiling: Option<String>,
    /// The process-wide time base, e.g. `1ps`.
    pub timebase: String,
    /// Directory for checkpoint and other output files.
    pub output_directory: String,
    /// Opaque plugin search path, persisted verbatim into checkpoints.
    pub search_paths: String,
    /// Output verbosity.
    pub verbose: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stop_at: None,
            exit_after: None,
            checkpoint_sim_period: None,
            checkpoint_wall_period: None,
            checkpoint_prefix: "checkpoint".to_string(),
            heartbeat_sim_period: None,
            heartbeat_wall_period: None,
            sigusr1: None,
            sigusr2: None,
            sigalrm: None,
            interactive_console: None,
            interactive_start: None,
            enable_profiling: None,
            timebase: "1ps".to_string(),
            output_directory: ".".to_string(),
            search_paths: String::new(),
            verbose: 0,
        }
    }
}

impl RunConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// Parses the wall-clock syntax: `H:M:S`, `M:S`, `S`, `<N>h`, `<N>m`, `<N>s`.
pub fn parse_wall_time(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let bad = || ConfigError::BadInterval(s.to_string());
    if s.is_empty() {
        return Err(bad());
    }
    if let Some(rest) = s.strip_suffix(['h', 'm', 's']) {
        let n: u64 = rest.trim().parse().map_err(|_| bad())?;
        let secs = match s.as_bytes()[s.len() - 1] {
            b'h' => n * 3600,
            b'm' => n * 60,
            _ => n,
        };
        return Ok(Duration::from_secs(secs));
    }
    let parts: Vec<&str> = s.split(':').collect();
    let nums: Result<Vec<u64>, _> = parts.iter().map(|p| p.trim().parse::<u64>()).collect();
    let nums = nums.map_err(|_| bad())?;
    let secs = match nums.as_slice() {
        [h, m, sec] => h * 3600 + m * 60 + sec,
        [m, sec] => m * 60 + sec,
        [sec] => *sec,
        _ => return Err(bad()),
    };
    Ok(Duration::from_secs(secs))
}

/// One parsed profiling tool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingSpec {
    pub name: String,
    pub tool_type: String,
    pub params: Vec<(String, String)>,
    /// Attach points, matched against `component.port` names. Wildcards
    /// follow the link-map port rule (`%d` digit runs and `*`).
    pub points: Vec<String>,
}

/// Parses `name:type(k=v,...)[point,point];...` into specs.
pub fn parse_profiling(spec: &str) -> Result<Vec<ProfilingSpec>, ConfigError> {
    let bad = |what: &str| ConfigError::Invalid(format!("profiling spec: {what}"));
    let mut out = Vec::new();
    for entry in spec.split(';').filter(|e| !e.trim().is_empty()) {
        let entry = entry.trim();
        let colon = entry.find(':').ok_or_else(|| bad(entry))?;
        let name = entry[..colon].trim().to_string();
        let rest = &entry[colon + 1..];

        let bracket = rest.find('[').ok_or_else(|| bad(entry))?;
        let type_part = rest[..bracket].trim();
        let points_part = rest[bracket..]
            .strip_prefix('[')
            .and_then(|p| p.strip_suffix(']'))
            .ok_or_else(|| bad(entry))?;

        let (tool_type, params) = match type_part.find('(') {
            Some(paren) => {
                let inner = type_part[paren..]
                    .strip_prefix('(')
                    .and_then(|p| p.strip_suffix(')'))
                    .ok_or_else(|| bad(entry))?;
                (type_part[..paren].to_string(), parse_kv_list(inner)?)
            }
            None => (type_part.to_string(), Vec::new()),
        };

        out.push(ProfilingSpec {
            name,
            tool_type,
            params,
            points: points_part
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        });
    }
    Ok(out)
}

/// Parses the SIGALRM syntax `action(key=val,...);...` into
/// `(action, params)` pairs.
pub fn parse_signal_actions(spec: &str) -> Result<Vec<(String, Vec<(String, String)>)>, ConfigError> {
    let mut out = Vec::new();
    for entry in spec.split(';').filter(|e| !e.trim().is_empty()) {
        let entry = entry.trim();
        match entry.find('(') {
            Some(paren) => {
                let inner = entry[paren..]
                    .strip_prefix('(')
                    .and_then(|p| p.strip_suffix(')'))
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!("signal action spec: {entry}"))
                    })?;
                out.push((entry[..paren].to_string(), parse_kv_list(inner)?));
            }
            None => out.push((entry.to_string(), Vec::new())),
        }
    }
    Ok(out)
}

fn parse_kv_list(inner: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut params = Vec::new();
    for pair in inner.split(',').filter(|p| !p.trim().is_empty()) {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::Invalid(format!("expected key=val, got '{pair}'")))?;
        params.push((k.trim().to_string(), v.trim().to_string()));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_time_forms() {
        assert_eq!(parse_wall_time("1:02:03").unwrap().as_secs(), 3723);
        assert_eq!(parse_wall_time("2:30").unwrap().as_secs(), 150);
        assert_eq!(parse_wall_time("45").unwrap().as_secs(), 45);
        assert_eq!(parse_wall_time("2h").unwrap().as_secs(), 7200);
        assert_eq!(parse_wall_time("3m").unwrap().as_secs(), 180);
        assert_eq!(parse_wall_time("10s").unwrap().as_secs(), 10);
        assert!(parse_wall_time("soon").is_err());
        assert!(parse_wall_time("1:2:3:4").is_err());
    }

    #[test]
    fn profiling_spec() {
        let specs =
            parse_profiling("evcount:event_count(level=2)[cpu.port%d,*];lat:latency[north.in]")
                .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "evcount");
        assert_eq!(specs[0].tool_type, "event_count");
        assert_eq!(specs[0].params, vec![("level".into(), "2".into())]);
        assert_eq!(specs[0].points, vec!["cpu.port%d", "*"]);
        assert_eq!(specs[1].tool_type, "latency");
        assert!(specs[1].params.is_empty());
    }

    #[test]
    fn signal_actions() {
        let actions = parse_signal_actions("checkpoint;status(verbose=1)").unwrap();
        assert_eq!(actions[0].0, "checkpoint");
        assert!(actions[0].1.is_empty());
        assert_eq!(actions[1].0, "status");
        assert_eq!(actions[1].1, vec![("verbose".into(), "1".into())]);
    }

    #[test]
    fn config_from_toml() {
        let cfg = RunConfig::from_toml(
            r#"
            stop_at = "100ns"
            timebase = "1ps"
            checkpoint_prefix = "ckpt"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.stop_at.as_deref(), Some("100ns"));
        assert_eq!(cfg.checkpoint_prefix, "ckpt");
        // Defaults fill the rest.
        assert_eq!(cfg.output_directory, ".");
    }
}
