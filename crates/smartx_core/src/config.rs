//! Scheduling configuration: loaded once at startup from a small
//! key=value file, search order `$SMARTX_CFG_DIR` then a compiled-in
//! default directory located with `directories::ProjectDirs`, the same
//! way `gecko_core::settings::GeckoSettings::get_config_path` locates its
//! platform config directory. Unlike settings.rs this isn't JSON: the
//! file format is a flat key=value list with `#` comments, so the parser
//! is hand-rolled rather than handed to `serde`.

use std::env;
use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use tracing::{info, warn};

/// `scheduling.rt.sched_policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    Fifo,
    RoundRobin,
    Other,
}

impl Default for SchedPolicy {
    fn default() -> Self {
        SchedPolicy::Fifo
    }
}

/// Resolved scheduling configuration for zone worker threads. Defaults
/// match §5's documented fallback: `{FIFO, prio 20, no affinity}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingConfig {
    pub sched_policy: SchedPolicy,
    pub sched_priority: i32,
    pub cpu_affinities: Vec<usize>,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            sched_policy: SchedPolicy::Fifo,
            sched_priority: 20,
            cpu_affinities: Vec::new(),
        }
    }
}

impl SchedulingConfig {
    /// Loads from `$SMARTX_CFG_DIR/smartxbar.conf` if set, else from the
    /// platform config directory via `directories::ProjectDirs`. Returns
    /// defaults if neither is found or the file fails to parse as a
    /// whole; unrecognized individual keys warn-and-continue instead of
    /// failing the whole load.
    pub fn load() -> Self {
        let path = Self::resolve_path();
        let Some(path) = path else {
            info!("no smartxbar config file found, using defaults");
            return Self::default();
        };
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse_str(&contents) {
                Some(config) => {
                    info!(path = %path.display(), "loaded scheduling config");
                    config
                }
                None => {
                    warn!(path = %path.display(), "malformed scheduling config, using defaults");
                    Self::default()
                }
            },
            Err(err) => {
                warn!(path = %path.display(), %err, "could not read scheduling config, using defaults");
                Self::default()
            }
        }
    }

    fn resolve_path() -> Option<PathBuf> {
        if let Ok(dir) = env::var("SMARTX_CFG_DIR") {
            let path = PathBuf::from(dir).join("smartxbar.conf");
            if path.exists() {
                return Some(path);
            }
        }
        ProjectDirs::from("com", "smartxbar", "smartxbar")
            .map(|proj| proj.config_dir().join("smartxbar.conf"))
            .filter(|path| path.exists())
    }

    /// Parses config text directly, with no filesystem access, so the
    /// key=value grammar can be unit tested without `$SMARTX_CFG_DIR`.
    /// Returns `None` only when the file as a whole can't be parsed into
    /// `key=value` lines at all (the per-key recovery documented for
    /// individual bad values never triggers this).
    pub fn parse_str(contents: &str) -> Option<Self> {
        let mut config = Self::default();
        for (lineno, raw_line) in contents.lines().enumerate() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = lineno + 1, %line, "malformed config line, skipping");
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            apply_key(&mut config, key, value, lineno + 1);
        }
        Some(config)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn apply_key(config: &mut SchedulingConfig, key: &str, value: &str, lineno: usize) {
    match key {
        "scheduling.rt.sched_policy" => match value {
            "fifo" => config.sched_policy = SchedPolicy::Fifo,
            "rr" => config.sched_policy = SchedPolicy::RoundRobin,
            "other" => config.sched_policy = SchedPolicy::Other,
            _ => warn!(line = lineno, %value, "unrecognized sched_policy, keeping default"),
        },
        "scheduling.rt.sched_priority" => match value.parse::<i32>() {
            Ok(priority) if (0..=99).contains(&priority) => config.sched_priority = priority,
            _ => warn!(line = lineno, %value, "sched_priority out of range, keeping default"),
        },
        "scheduling.rt.cpu_affinities" => {
            if value.is_empty() {
                config.cpu_affinities.clear();
            } else {
                let mut cores = Vec::new();
                let mut all_valid = true;
                for token in value.split(',') {
                    match token.trim().parse::<usize>() {
                        Ok(core) => cores.push(core),
                        Err(_) => {
                            all_valid = false;
                            break;
                        }
                    }
                }
                if all_valid {
                    config.cpu_affinities = cores;
                } else {
                    warn!(line = lineno, %value, "invalid cpu_affinities list, keeping default");
                }
            }
        }
        _ if key.starts_with("runner.") && key.ends_with(".enabled") => {
            // Recognized for forward compatibility, but every base zone
            // already gets a dedicated worker thread unconditionally and a
            // derived zone always co-schedules on its base's thread, so
            // there's nothing left for this key to toggle; see SPEC_FULL.md.
            if !matches!(value, "true" | "false") {
                warn!(line = lineno, %value, "runner.*.enabled must be true/false, ignoring");
            }
        }
        _ => warn!(line = lineno, %key, "unrecognized config key, ignoring"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_yields_defaults() {
        let config = SchedulingConfig::parse_str("").unwrap();
        assert_eq!(config, SchedulingConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let text = "\
            # scheduling config\n\
            scheduling.rt.sched_policy = rr\n\
            scheduling.rt.sched_priority = 42\n\
            scheduling.rt.cpu_affinities = 0, 2, 3\n\
            runner.debug-zone.enabled = true\n\
        ";
        let config = SchedulingConfig::parse_str(text).unwrap();
        assert_eq!(config.sched_policy, SchedPolicy::RoundRobin);
        assert_eq!(config.sched_priority, 42);
        assert_eq!(config.cpu_affinities, vec![0, 2, 3]);
    }

    #[test]
    fn test_runner_enabled_key_is_recognized_but_not_malformed() {
        let config = SchedulingConfig::parse_str("runner.debug-zone.enabled = true").unwrap();
        assert_eq!(config, SchedulingConfig::default());
    }

    #[test]
    fn test_bad_priority_keeps_default() {
        let config = SchedulingConfig::parse_str("scheduling.rt.sched_priority = 150").unwrap();
        assert_eq!(config.sched_priority, 20);
    }

    #[test]
    fn test_unrecognized_key_is_ignored_not_fatal() {
        let config = SchedulingConfig::parse_str("made.up.key = 1\nscheduling.rt.sched_policy = fifo").unwrap();
        assert_eq!(config.sched_policy, SchedPolicy::Fifo);
    }

    #[test]
    fn test_empty_affinities_clears_list() {
        let config = SchedulingConfig::parse_str("scheduling.rt.cpu_affinities =").unwrap();
        assert!(config.cpu_affinities.is_empty());
    }

    #[test]
    fn test_malformed_line_without_equals_is_skipped() {
        let config = SchedulingConfig::parse_str("not a key value line at all\nscheduling.rt.sched_priority = 5").unwrap();
        assert_eq!(config.sched_priority, 5);
    }
}
