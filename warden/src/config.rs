
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use detector::suspicious::{DEFAULT_EXTENSIONS, DEFAULT_NOTE_PATTERNS};
use detector::{Suspicious, Thresholds};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Policy {
    DryRun,
    TerminateThenKill,
    QuarantineThenKill,
}

impl Display for Policy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Policy::DryRun => "DRY_RUN",
            Policy::TerminateThenKill => "TERMINATE_THEN_KILL",
            Policy::QuarantineThenKill => "QUARANTINE_THEN_KILL",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "DRY_RUN" => Ok(Policy::DryRun),
            "TERMINATE_THEN_KILL" => Ok(Policy::TerminateThenKill),
            "QUARANTINE_THEN_KILL" => Ok(Policy::QuarantineThenKill),
            _ => Err(format!("unknown policy: {}", s)),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy::DryRun
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window_secs: u64,
    pub thresholds: Thresholds,
    pub name_whitelist: BTreeSet<String>,
    pub uid_whitelist: BTreeSet<u32>,
    pub policy: Policy,
    pub quarantine_dwell_secs: f64,
    pub terminate_polls: u32,
    pub terminate_poll_secs: f64,
    pub max_actions_per_minute: usize,
    pub baseline_capacity: usize,
    pub reap_interval_secs: u64,
    pub suspicious_extensions: Vec<String>,
    pub ransom_note_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let name_whitelist = [
            "systemd",
            "init",
            "sshd",
            "bash",
            "code",
            "gnome-shell",
            "python3",
            "warden",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            window_secs: 10,
            thresholds: Thresholds::default(),
            name_whitelist,
            uid_whitelist: [0].iter().copied().collect(),
            policy: Policy::default(),
            quarantine_dwell_secs: 6.0,
            terminate_polls: 6,
            terminate_poll_secs: 0.5,
            max_actions_per_minute: 5,
            baseline_capacity: detector::baseline::DEFAULT_CAPACITY,
            reap_interval_secs: 30,
            suspicious_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            ransom_note_patterns: DEFAULT_NOTE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }

    pub fn dwell(&self) -> Duration {
        secs_f64(self.quarantine_dwell_secs)
    }

    pub fn terminate_poll(&self) -> Duration {
        secs_f64(self.terminate_poll_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn suspicious(&self) -> Result<Suspicious> {
        let suspicious = Suspicious::new(&self.suspicious_extensions, &self.ransom_note_patterns)?;
        Ok(suspicious)
    }
}

fn secs_f64(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::from_secs(0)
    }
}
