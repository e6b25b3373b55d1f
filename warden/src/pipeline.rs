//! Event ingestion: window update, baseline scoring and alert evaluation.
//!
//! A single task owns the window store and the baseline, so every pid has one
//! writer and the baseline has one point of mutation.

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use async_std::channel::{Receiver, Sender};
use async_std::stream;
use async_std::sync::Arc;

use futures::select;
use futures::StreamExt;

use log::{debug, info};

use capture::{Event, EventKind, Timestamp};
use detector::{entropy, Activity, Alert, AlertEngine, Baseline, WindowStore};

use crate::config::Config;
use crate::forensic::Inspector;
use crate::journal::Journal;
use crate::Result;

pub struct Ingestor<I> {
    store: WindowStore,
    baseline: Baseline,
    engine: AlertEngine,
    inspector: I,
    own_pid: u32,
}

impl<I: Inspector> Ingestor<I> {
    pub fn new(config: &Config, inspector: I) -> Result<Self> {
        Ok(Self {
            store: WindowStore::new(config.window(), config.suspicious()?),
            baseline: Baseline::new(config.baseline_capacity),
            engine: AlertEngine::new(
                config.thresholds.clone(),
                config.name_whitelist.iter().cloned(),
            ),
            inspector,
            own_pid: process::id(),
        })
    }

    /// Events of `pid` are treated as the daemon's own.
    pub fn with_own_pid(mut self, pid: u32) -> Self {
        self.own_pid = pid;
        self
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// Whether the event is journaled and ingested. Unknown kinds pass but
    /// are never recorded.
    pub fn accepts(&self, event: &Event) -> bool {
        event.pid != self.own_pid
    }

    pub fn ingest(&mut self, event: &Event) -> Option<Alert> {
        if !self.accepts(event) {
            return None;
        }

        let pid = event.pid;
        let now = event.observed_at;
        match event.kind {
            EventKind::Open => self.store.record(
                pid,
                now,
                Activity::Open {
                    file: &event.filename,
                },
            ),
            EventKind::Delete => self.store.record(
                pid,
                now,
                Activity::Delete {
                    file: &event.filename,
                },
            ),
            EventKind::Write => {
                let target = self.write_target(event);
                let entropy = target.as_ref().and_then(|path| entropy::sample_file(path));
                let file = target.as_ref().map(|path| path.to_string_lossy());
                self.store.record(
                    pid,
                    now,
                    Activity::Write {
                        bytes: event.bytes,
                        file: file.as_deref(),
                        entropy,
                    },
                );
            }
            EventKind::Unknown => return None,
        }

        let snap = self.store.snapshot(pid, now);
        let write_z = if event.kind == EventKind::Write {
            self.baseline.score_and_observe(snap.write_count, event.bytes)
        } else {
            self.baseline.write_zscore(snap.write_count)
        };

        let alert = self
            .engine
            .evaluate(pid, &event.comm, &snap, write_z, now)?;
        self.cool_down(alert)
    }

    fn write_target(&self, event: &Event) -> Option<PathBuf> {
        if !event.filename.is_empty() {
            return Some(PathBuf::from(&event.filename));
        }
        let target = self.inspector.fd_target(event.pid, event.fd);
        if target.is_none() {
            debug!("cannot resolve fd {} of pid {}", event.fd, event.pid);
        }
        target
    }

    // At most one alert per pid per window.
    fn cool_down(&mut self, alert: Alert) -> Option<Alert> {
        let window = self.store.window().as_micros() as Timestamp;
        let proc = self.store.get_mut(alert.pid)?;
        if let Some(last) = proc.last_alert() {
            if alert.fired_at.saturating_sub(last) < window {
                debug!(
                    "suppressed alert for pid {}: {}",
                    alert.pid,
                    alert.reason_list()
                );
                return None;
            }
        }
        proc.set_last_alert(alert.fired_at);
        Some(alert)
    }

    /// Evicts idle windows of exited processes.
    pub fn reap(&mut self, now: Timestamp) -> Vec<u32> {
        let inspector = &self.inspector;
        let reaped = self.store.reap(now, |pid| inspector.exists(pid));
        if !reaped.is_empty() {
            debug!("reaped {} windows, {} remain", reaped.len(), self.store.len());
        }
        reaped
    }
}

/// Runs until the event channel closes or the responder goes away.
pub async fn run<I: Inspector>(
    mut ingestor: Ingestor<I>,
    events: Receiver<Event>,
    alerts: Sender<Alert>,
    exits: Sender<u32>,
    journal: Arc<Journal>,
    reap_every: Duration,
) {
    let mut events = events.fuse();
    let mut ticks = stream::interval(reap_every).fuse();
    loop {
        select! {
            event = events.next() => {
                let event = match event {
                    Some(event) => event,
                    None => break,
                };
                if !ingestor.accepts(&event) {
                    continue;
                }
                journal.event(&event).await;
                if let Some(alert) = ingestor.ingest(&event) {
                    journal.alert(&alert).await;
                    if alerts.send(alert).await.is_err() {
                        break;
                    }
                }
            },
            _ = ticks.next() => {
                for pid in ingestor.reap(capture::now_micros()) {
                    if exits.send(pid).await.is_err() {
                        break;
                    }
                }
            },
        }
    }
    info!("Ingestion stopped");
}
