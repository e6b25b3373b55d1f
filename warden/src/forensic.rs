//! Process introspection for guards and forensic records.


use std::fs;
use std::path::PathBuf;

use lazy_static::lazy_static;

use regex::Regex;

use serde::Serialize;

use log::debug;

use capture::Timestamp;
use detector::Evidence;

const MAX_FDS: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub cmdline: Option<String>,
    pub cwd: Option<String>,
    pub exe_path: Option<String>,
    pub uid: Option<u32>,
    pub ppid: Option<u32>,
    pub open_file_descriptor_targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForensicRecord {
    pub timestamp: Timestamp,
    pub pid: u32,
    pub comm: String,
    pub reason: String,
    pub process_info: ProcessInfo,
    pub evidence: Evidence,
}

pub trait Inspector {
    /// False once the process is gone or only a zombie remains.
    fn exists(&self, pid: u32) -> bool;
    fn uid(&self, pid: u32) -> Option<u32>;
    /// Best effort, unreadable fields stay empty.
    fn gather(&self, pid: u32) -> ProcessInfo;
    /// Target of an open descriptor.
    fn fd_target(&self, pid: u32, fd: i32) -> Option<PathBuf>;
}

pub struct ProcfsInspector {
    root: PathBuf,
}

impl ProcfsInspector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, pid: u32, entry: &str) -> PathBuf {
        self.root.join(pid.to_string()).join(entry)
    }

    fn read(&self, pid: u32, entry: &str) -> Option<String> {
        let path = self.path(pid, entry);
        match fs::read_to_string(&path) {
            Ok(s) => Some(s),
            Err(e) => {
                debug!("cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn link(&self, pid: u32, entry: &str) -> Option<String> {
        fs::read_link(self.path(pid, entry))
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    }

    fn open_fds(&self, pid: u32) -> Vec<String> {
        let dir = match fs::read_dir(self.path(pid, "fd")) {
            Ok(dir) => dir,
            Err(e) => {
                debug!("cannot list fds of {}: {}", pid, e);
                return vec![];
            }
        };
        let mut targets: Vec<String> = dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| fs::read_link(entry.path()).ok())
            .map(|p| p.to_string_lossy().into_owned())
            .take(MAX_FDS)
            .collect();
        targets.sort();
        targets
    }
}

impl Default for ProcfsInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector for ProcfsInspector {
    fn exists(&self, pid: u32) -> bool {
        match self.read(pid, "stat") {
            Some(stat) => !matches!(stat_state(&stat), Some('Z') | Some('X') | Some('x')),
            None => false,
        }
    }

    fn uid(&self, pid: u32) -> Option<u32> {
        self.read(pid, "status").and_then(|s| status_field(&s, "Uid"))
    }

    fn gather(&self, pid: u32) -> ProcessInfo {
        let status = self.read(pid, "status");
        ProcessInfo {
            cmdline: self.read(pid, "cmdline").map(|s| cmdline(&s)),
            cwd: self.link(pid, "cwd"),
            exe_path: self.link(pid, "exe"),
            uid: status.as_deref().and_then(|s| status_field(s, "Uid")),
            ppid: status.as_deref().and_then(|s| status_field(s, "PPid")),
            open_file_descriptor_targets: self.open_fds(pid),
        }
    }

    fn fd_target(&self, pid: u32, fd: i32) -> Option<PathBuf> {
        if fd < 0 {
            return None;
        }
        fs::read_link(self.path(pid, "fd").join(fd.to_string())).ok()
    }
}

/// NUL separated argv joined with spaces.
pub(crate) fn cmdline(raw: &str) -> String {
    raw.split('\0')
        .filter(|arg| !arg.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First number of a `Name:\tvalue ...` line of `/proc/<pid>/status`.
pub(crate) fn status_field(status: &str, name: &str) -> Option<u32> {
    lazy_static! {
        static ref FIELD: Regex = Regex::new(r"(?m)^([A-Za-z]+):\s+(\d+)").unwrap();
    }
    FIELD
        .captures_iter(status)
        .find(|cap| &cap[1] == name)
        .and_then(|cap| cap[2].parse().ok())
}

// The comm in stat is parenthesised and may itself contain ')'.
pub(crate) fn stat_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next()
}
