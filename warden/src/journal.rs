//! Append-only operator journals.


use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::time::{Duration, SystemTime};

use async_std::fs::{File, OpenOptions};
use async_std::prelude::*;
use async_std::sync::Mutex;

use chrono::{DateTime, Local};

use log::{error, info, warn};

use capture::{Event, EventKind, Timestamp};
use detector::Alert;

use crate::forensic::ForensicRecord;
use crate::Result;

pub const EVENTS_LOG: &str = "events.log";
pub const ALERTS_LOG: &str = "alerts.log";
pub const ACTIONS_LOG: &str = "actions.log";
pub const FORENSIC_LOG: &str = "forensic.jsonl";

const TIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Quarantine,
    Kill,
    Miss,
    Denied,
    DryRun,
    Error,
    Whitelist,
    RateLimit,
    Skip,
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use Tag::*;
        let name = match self {
            Quarantine => "QUARANTINE",
            Kill => "KILL",
            Miss => "MISS",
            Denied => "DENIED",
            DryRun => "DRY_RUN",
            Error => "ERROR",
            Whitelist => "WHITELIST",
            RateLimit => "RATE_LIMIT",
            Skip => "SKIP",
        };
        write!(f, "{}", name)
    }
}

pub fn local_time(at: Timestamp) -> String {
    let time = SystemTime::UNIX_EPOCH + Duration::from_micros(at);
    DateTime::<Local>::from(time).format(TIME_FMT).to_string()
}

pub fn event_line(event: &Event) -> String {
    let detail = match event.kind {
        EventKind::Write if event.filename.is_empty() => {
            format!(" fd={} bytes={}", event.fd, event.bytes)
        }
        EventKind::Write => format!(
            " fd={} bytes={} file='{}'",
            event.fd, event.bytes, event.filename
        ),
        _ => format!(" file='{}'", event.filename),
    };
    format!(
        "[{}] {}  pid={} comm={}{}",
        local_time(event.observed_at),
        event.kind,
        event.pid,
        event.comm,
        detail
    )
}

pub fn alert_line(alert: &Alert) -> String {
    format!(
        "[{}] [ALERT] comm='{}' pid={} reasons={} evidence={}",
        local_time(alert.fired_at),
        alert.comm,
        alert.pid,
        alert.reason_list(),
        alert.evidence
    )
}

pub fn action_line(at: Timestamp, tag: Tag, pid: u32, comm: &str, msg: &str) -> String {
    format!(
        "[{}] [{}] pid={} comm='{}' {}",
        local_time(at),
        tag,
        pid,
        comm,
        msg
    )
}

pub struct Journal {
    events: Mutex<File>,
    alerts: Mutex<File>,
    actions: Mutex<File>,
    forensic: Mutex<File>,
}

impl Journal {
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            events: Mutex::new(append(&dir.join(EVENTS_LOG)).await?),
            alerts: Mutex::new(append(&dir.join(ALERTS_LOG)).await?),
            actions: Mutex::new(append(&dir.join(ACTIONS_LOG)).await?),
            forensic: Mutex::new(append(&dir.join(FORENSIC_LOG)).await?),
        })
    }

    pub async fn event(&self, event: &Event) {
        write_line(&self.events, EVENTS_LOG, &event_line(event)).await;
    }

    pub async fn alert(&self, alert: &Alert) {
        let line = alert_line(alert);
        warn!("{}", line);
        write_line(&self.alerts, ALERTS_LOG, &line).await;
    }

    pub async fn action(&self, tag: Tag, pid: u32, comm: &str, msg: &str) {
        let line = action_line(capture::now_micros(), tag, pid, comm, msg);
        match tag {
            Tag::Whitelist | Tag::Skip | Tag::DryRun => info!("{}", line),
            _ => warn!("{}", line),
        }
        write_line(&self.actions, ACTIONS_LOG, &line).await;
    }

    /// Losing a record is logged, never fatal.
    pub async fn forensic(&self, record: &ForensicRecord) {
        match serde_json::to_string(record) {
            Ok(json) => write_line(&self.forensic, FORENSIC_LOG, &json).await,
            Err(e) => error!("failed to serialize forensic record: {}", e),
        }
    }
}

async fn append(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(file)
}

async fn write_line(file: &Mutex<File>, name: &str, line: &str) {
    let mut file = file.lock().await;
    let res = async {
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }
    .await;
    if let Err(e) = res {
        error!("failed to append to {}: {}", name, e);
    }
}
