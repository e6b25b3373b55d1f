
use std::collections::{BTreeSet, HashSet};
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::window::Snapshot;
use crate::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    DistinctFiles,
    DeleteBurst,
    ByteVolume,
    HighEntropy,
    WriteRateAnomaly,
}

impl Display for Rule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use Rule::*;
        let name = match self {
            DistinctFiles => "distinct_files",
            DeleteBurst => "delete_burst",
            ByteVolume => "byte_volume",
            HighEntropy => "high_entropy",
            WriteRateAnomaly => "write_rate_anomaly",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub files: usize,
    pub deletes: usize,
    pub bytes: u64,
    pub entropy: f64,
    pub zscore: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            files: 6,
            deletes: 3,
            bytes: 200 * 1024,
            entropy: 7.5,
            zscore: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub write_count: usize,
    pub delete_count: usize,
    pub total_bytes: u64,
    pub distinct_files: usize,
    pub max_entropy: f64,
    pub recent_files: Vec<String>,
}

impl From<&Snapshot> for Evidence {
    fn from(snap: &Snapshot) -> Self {
        Self {
            write_count: snap.write_count,
            delete_count: snap.delete_count,
            total_bytes: snap.total_bytes,
            distinct_files: snap.distinct_files,
            max_entropy: snap.max_entropy,
            recent_files: snap.recent_files.clone(),
        }
    }
}

impl Display for Evidence {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub pid: u32,
    pub comm: String,
    pub reasons: BTreeSet<Rule>,
    pub evidence: Evidence,
    pub fired_at: Timestamp,
}

impl Alert {
    /// Comma separated rule names, in rule order.
    pub fn reason_list(&self) -> String {
        self.reasons
            .iter()
            .map(Rule::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub struct AlertEngine {
    thresholds: Thresholds,
    whitelist: HashSet<String>,
}

impl AlertEngine {
    pub fn new<I, S>(thresholds: Thresholds, whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            thresholds,
            whitelist: whitelist.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_whitelisted(&self, comm: &str) -> bool {
        self.whitelist.contains(comm)
    }

    /// Whitelisted names never reach the rules. This trusts `comm`, which any
    /// process can set for itself.
    pub fn evaluate(
        &self,
        pid: u32,
        comm: &str,
        snap: &Snapshot,
        write_z: f64,
        now: Timestamp,
    ) -> Option<Alert> {
        if self.is_whitelisted(comm) {
            return None;
        }

        let t = &self.thresholds;
        let mut reasons = BTreeSet::new();
        if snap.distinct_files >= t.files {
            reasons.insert(Rule::DistinctFiles);
        }
        if snap.delete_count >= t.deletes {
            reasons.insert(Rule::DeleteBurst);
        }
        if snap.total_bytes >= t.bytes {
            reasons.insert(Rule::ByteVolume);
        }
        if snap.max_entropy >= t.entropy {
            reasons.insert(Rule::HighEntropy);
        }
        if write_z > t.zscore {
            reasons.insert(Rule::WriteRateAnomaly);
        }

        if reasons.is_empty() {
            return None;
        }
        Some(Alert {
            pid,
            comm: comm.to_string(),
            reasons,
            evidence: Evidence::from(snap),
            fired_at: now,
        })
    }
}
