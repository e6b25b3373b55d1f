//! Per-process sliding windows.
//!
//! Every sequence is pruned against `now - window` before it is read, so no
//! aggregate ever sees an entry older than the window.


use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::suspicious::Suspicious;
use crate::{micros, Timestamp};

pub const RECENT_FILES: usize = 10;

/// One filesystem mutation, as recorded into a window.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity<'a> {
    Open {
        file: &'a str,
    },
    Write {
        bytes: u64,
        file: Option<&'a str>,
        entropy: Option<f64>,
    },
    Delete {
        file: &'a str,
    },
}

#[derive(Debug, Default)]
pub struct ProcessWindow {
    write_times: VecDeque<Timestamp>,
    delete_times: VecDeque<Timestamp>,
    bytes_written: VecDeque<(Timestamp, u64)>,
    files_touched: VecDeque<(Timestamp, String)>,
    entropy_scores: VecDeque<(Timestamp, f64)>,
    last_alert: Option<Timestamp>,
}

impl ProcessWindow {
    fn prune(&mut self, cutoff: Timestamp) {
        fn drop_before<T>(seq: &mut VecDeque<T>, cutoff: Timestamp, time: impl Fn(&T) -> Timestamp) {
            while seq.front().map_or(false, |e| time(e) < cutoff) {
                seq.pop_front();
            }
        }

        drop_before(&mut self.write_times, cutoff, |t| *t);
        drop_before(&mut self.delete_times, cutoff, |t| *t);
        drop_before(&mut self.bytes_written, cutoff, |(t, _)| *t);
        drop_before(&mut self.files_touched, cutoff, |(t, _)| *t);
        drop_before(&mut self.entropy_scores, cutoff, |(t, _)| *t);
    }

    pub fn is_empty(&self) -> bool {
        self.write_times.is_empty()
            && self.delete_times.is_empty()
            && self.bytes_written.is_empty()
            && self.files_touched.is_empty()
            && self.entropy_scores.is_empty()
    }

    pub fn last_alert(&self) -> Option<Timestamp> {
        self.last_alert
    }

    pub fn set_last_alert(&mut self, at: Timestamp) {
        self.last_alert = Some(at);
    }

    fn snapshot(&self) -> Snapshot {
        let mut seen = HashSet::new();
        let mut recent = Vec::new();
        for (_, name) in self.files_touched.iter().rev() {
            if seen.insert(name.as_str()) && recent.len() < RECENT_FILES {
                recent.push(name.clone());
            }
        }
        recent.reverse();

        Snapshot {
            write_count: self.write_times.len(),
            delete_count: self.delete_times.len(),
            total_bytes: self.bytes_written.iter().map(|(_, b)| *b).sum(),
            distinct_files: seen.len(),
            max_entropy: self
                .entropy_scores
                .iter()
                .map(|(_, e)| *e)
                .fold(0.0, f64::max),
            recent_files: recent,
        }
    }
}

/// Window-relative aggregates for one process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub write_count: usize,
    pub delete_count: usize,
    pub total_bytes: u64,
    pub distinct_files: usize,
    pub max_entropy: f64,
    /// Distinct names, oldest first, at most `RECENT_FILES`.
    pub recent_files: Vec<String>,
}

pub struct WindowStore {
    window: Timestamp,
    suspicious: Suspicious,
    procs: HashMap<u32, ProcessWindow>,
}

impl WindowStore {
    pub fn new(window: Duration, suspicious: Suspicious) -> Self {
        Self {
            window: micros(window),
            suspicious,
            procs: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_micros(self.window)
    }

    fn cutoff(&self, now: Timestamp) -> Timestamp {
        now.saturating_sub(self.window)
    }

    pub fn record(&mut self, pid: u32, time: Timestamp, activity: Activity<'_>) {
        let suspicious = &self.suspicious;
        let proc = self.procs.entry(pid).or_insert_with(ProcessWindow::default);
        match activity {
            Activity::Open { file } => {
                proc.files_touched.push_back((time, file.to_string()));
            }
            Activity::Delete { file } => {
                proc.delete_times.push_back(time);
                proc.files_touched.push_back((time, file.to_string()));
            }
            Activity::Write {
                bytes,
                file,
                entropy,
            } => {
                proc.write_times.push_back(time);
                proc.bytes_written.push_back((time, bytes));
                if let Some(file) = file.filter(|f| suspicious.is_match(f)) {
                    proc.files_touched.push_back((time, file.to_string()));
                }
                if let Some(entropy) = entropy {
                    proc.entropy_scores.push_back((time, entropy));
                }
            }
        }
    }

    pub fn prune(&mut self, pid: u32, now: Timestamp) {
        let cutoff = self.cutoff(now);
        if let Some(proc) = self.procs.get_mut(&pid) {
            proc.prune(cutoff);
        }
    }

    /// Prunes, then aggregates. Unknown pids yield an empty snapshot.
    pub fn snapshot(&mut self, pid: u32, now: Timestamp) -> Snapshot {
        self.prune(pid, now);
        self.procs
            .get(&pid)
            .map(ProcessWindow::snapshot)
            .unwrap_or_default()
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessWindow> {
        self.procs.get(&pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut ProcessWindow> {
        self.procs.get_mut(&pid)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Prunes every window and evicts pids whose windows are empty and which
    /// `is_alive` reports gone. Returns the evicted pids.
    pub fn reap<F>(&mut self, now: Timestamp, is_alive: F) -> Vec<u32>
    where
        F: Fn(u32) -> bool,
    {
        let cutoff = self.cutoff(now);
        let mut evicted = vec![];
        self.procs.retain(|pid, proc| {
            proc.prune(cutoff);
            if proc.is_empty() && !is_alive(*pid) {
                evicted.push(*pid);
                false
            } else {
                true
            }
        });
        evicted.sort_unstable();
        evicted
    }
}
