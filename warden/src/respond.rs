//! Response controller: turns alerts into quarantine and kill actions.
//!
//! Every policy passes the same guards (response table, whitelist, rate
//! limit) before any signal is sent. Waiting is done in spawned tasks, never
//! on the caller's task.


pub mod limiter;
pub mod signal;

pub use limiter::RateLimiter;
pub use signal::{NixSignaller, Signal, Signaller};

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};

use async_std::channel::Receiver;
use async_std::sync::{Arc, Mutex};
use async_std::task::{self, JoinHandle};

use futures::select;
use futures::StreamExt;

use log::{debug, info};

use lru::LruCache;

use detector::Alert;

use crate::config::{Config, Policy};
use crate::forensic::{ForensicRecord, Inspector};
use crate::journal::{Journal, Tag};
use crate::Error;

const STATE_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Running,
    Quarantined,
    Killed,
    Missing,
    Denied,
    Error,
}

impl ResponseState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResponseState::Running | ResponseState::Quarantined)
    }

    pub fn can_become(self, next: ResponseState) -> bool {
        use ResponseState::*;
        match (self, next) {
            (Running, Running) => false,
            (Running, _) => true,
            (Quarantined, Running) | (Quarantined, Quarantined) => false,
            (Quarantined, _) => true,
            _ => false,
        }
    }
}

impl Display for ResponseState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use ResponseState::*;
        let name = match self {
            Running => "RUNNING",
            Quarantined => "QUARANTINED",
            Killed => "KILLED",
            Missing => "MISSING",
            Denied => "DENIED",
            Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// What `handle` did right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The pid is already under response.
    Skipped,
    Whitelisted,
    RateLimited,
    DryRun,
    Acted(ResponseState),
}

pub struct Handled {
    pub outcome: Outcome,
    /// The remainder of the action, still pending when `handle` returned.
    pub deferred: Option<JoinHandle<ResponseState>>,
}

impl Handled {
    fn now(outcome: Outcome) -> Self {
        Self {
            outcome,
            deferred: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub policy: Policy,
    pub name_whitelist: HashSet<String>,
    pub uid_whitelist: HashSet<u32>,
    pub dwell: Duration,
    pub terminate_polls: u32,
    pub terminate_poll: Duration,
    pub max_actions_per_minute: usize,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            policy: config.policy,
            name_whitelist: config.name_whitelist.iter().cloned().collect(),
            uid_whitelist: config.uid_whitelist.iter().copied().collect(),
            dwell: config.dwell(),
            terminate_polls: config.terminate_polls,
            terminate_poll: config.terminate_poll(),
            max_actions_per_minute: config.max_actions_per_minute,
        }
    }
}

// A pid under response.
struct Tracked {
    state: ResponseState,
    comm: String,
}

pub struct Controller<S, I> {
    settings: Settings,
    signaller: S,
    inspector: I,
    journal: Arc<Journal>,
    limiter: Mutex<RateLimiter>,
    states: Mutex<LruCache<u32, Tracked>>,
}

impl<S, I> Controller<S, I>
where
    S: Signaller + Send + Sync + 'static,
    I: Inspector + Send + Sync + 'static,
{
    pub fn new(settings: Settings, signaller: S, inspector: I, journal: Arc<Journal>) -> Self {
        let limiter = RateLimiter::new(settings.max_actions_per_minute);
        Self {
            settings,
            signaller,
            inspector,
            journal,
            limiter: Mutex::new(limiter),
            states: Mutex::new(LruCache::new(STATE_CAP)),
        }
    }

    pub async fn state(&self, pid: u32) -> Option<ResponseState> {
        self.states.lock().await.peek(&pid).map(|t| t.state)
    }

    /// Pids whose action is still in flight, with their command names.
    pub async fn pending(&self) -> Vec<(u32, String, ResponseState)> {
        self.states
            .lock()
            .await
            .iter()
            .filter(|(_, t)| !t.state.is_terminal())
            .map(|(pid, t)| (*pid, t.comm.clone(), t.state))
            .collect()
    }

    pub fn is_whitelisted(&self, comm: &str, uid: Option<u32>) -> bool {
        self.settings.name_whitelist.contains(comm)
            || uid.map_or(false, |uid| self.settings.uid_whitelist.contains(&uid))
    }

    pub async fn handle(self: &Arc<Self>, alert: &Alert) -> Handled {
        let pid = alert.pid;
        let comm = alert.comm.as_str();
        let reasons = alert.reason_list();

        if let Some(state) = self.state(pid).await {
            self.journal
                .action(
                    Tag::Skip,
                    pid,
                    comm,
                    &format!("already under response ({}), reasons={}", state, reasons),
                )
                .await;
            return Handled::now(Outcome::Skipped);
        }

        let uid = self.inspector.uid(pid);
        if self.is_whitelisted(comm, uid) {
            self.journal
                .action(
                    Tag::Whitelist,
                    pid,
                    comm,
                    &format!("uid={} whitelisted, not acted on, reasons={}", show(uid), reasons),
                )
                .await;
            return Handled::now(Outcome::Whitelisted);
        }

        if !self.limiter.lock().await.try_acquire(Instant::now()) {
            self.journal
                .action(
                    Tag::RateLimit,
                    pid,
                    comm,
                    &format!(
                        "more than {} actions within a minute, skipped, reasons={}",
                        self.settings.max_actions_per_minute, reasons
                    ),
                )
                .await;
            return Handled::now(Outcome::RateLimited);
        }

        match self.settings.policy {
            Policy::DryRun => {
                self.journal
                    .action(
                        Tag::DryRun,
                        pid,
                        comm,
                        &format!(
                            "would stop and kill, uid={} reasons={}",
                            show(uid),
                            reasons
                        ),
                    )
                    .await;
                Handled::now(Outcome::DryRun)
            }
            Policy::TerminateThenKill => self.terminate_then_kill(alert).await,
            Policy::QuarantineThenKill => self.quarantine_then_kill(alert).await,
        }
    }

    async fn terminate_then_kill(self: &Arc<Self>, alert: &Alert) -> Handled {
        let pid = alert.pid;
        self.settle(pid, &alert.comm, ResponseState::Running).await;
        self.capture_forensics(alert).await;

        if let Err(e) = self.signaller.send(pid, Signal::Terminate) {
            let state = self.settle_failure(pid, &alert.comm, Signal::Terminate, e).await;
            return Handled::now(Outcome::Acted(state));
        }
        self.journal
            .action(
                Tag::Kill,
                pid,
                &alert.comm,
                &format!(
                    "{} sent, waiting up to {:?} before {}",
                    Signal::Terminate,
                    self.settings.terminate_poll * self.settings.terminate_polls,
                    Signal::Kill
                ),
            )
            .await;

        let ctl = Arc::clone(self);
        let comm = alert.comm.clone();
        let deferred = task::spawn(async move { ctl.await_exit_then_kill(pid, comm).await });
        Handled {
            outcome: Outcome::Acted(ResponseState::Running),
            deferred: Some(deferred),
        }
    }

    async fn await_exit_then_kill(&self, pid: u32, comm: String) -> ResponseState {
        for _ in 0..self.settings.terminate_polls {
            task::sleep(self.settings.terminate_poll).await;
            if let Some(state) = self.state(pid).await.filter(|s| s.is_terminal()) {
                debug!("pid {} settled as {} while polling", pid, state);
                self.forget(pid).await;
                return state;
            }
            if !self.inspector.exists(pid) {
                self.settle(pid, &comm, ResponseState::Killed).await;
                self.journal
                    .action(
                        Tag::Kill,
                        pid,
                        &comm,
                        &format!("terminated after {}", Signal::Terminate),
                    )
                    .await;
                return ResponseState::Killed;
            }
        }
        self.kill_step(pid, &comm).await
    }

    async fn quarantine_then_kill(self: &Arc<Self>, alert: &Alert) -> Handled {
        let pid = alert.pid;
        self.settle(pid, &alert.comm, ResponseState::Running).await;

        if let Err(e) = self.signaller.send(pid, Signal::Stop) {
            let state = self.settle_failure(pid, &alert.comm, Signal::Stop, e).await;
            return Handled::now(Outcome::Acted(state));
        }
        self.settle(pid, &alert.comm, ResponseState::Quarantined).await;
        self.journal
            .action(
                Tag::Quarantine,
                pid,
                &alert.comm,
                &format!(
                    "{} sent, {} in {:?}, reasons={}",
                    Signal::Stop,
                    Signal::Kill,
                    self.settings.dwell,
                    alert.reason_list()
                ),
            )
            .await;
        self.capture_forensics(alert).await;

        let ctl = Arc::clone(self);
        let comm = alert.comm.clone();
        let deferred = task::spawn(async move {
            task::sleep(ctl.settings.dwell).await;
            ctl.kill_quarantined(pid, comm).await
        });
        Handled {
            outcome: Outcome::Acted(ResponseState::Quarantined),
            deferred: Some(deferred),
        }
    }

    async fn kill_quarantined(&self, pid: u32, comm: String) -> ResponseState {
        match self.state(pid).await {
            Some(ResponseState::Quarantined) => self.kill_step(pid, &comm).await,
            state => {
                let state = state.unwrap_or(ResponseState::Running);
                if state.is_terminal() {
                    self.forget(pid).await;
                }
                self.journal
                    .action(
                        Tag::Skip,
                        pid,
                        &comm,
                        &format!("pending {} cancelled, pid is {}", Signal::Kill, state),
                    )
                    .await;
                state
            }
        }
    }

    /// Sends the final kill. An absent pid yields `Missing` however often this
    /// runs; terminal states are never left.
    pub async fn kill_step(&self, pid: u32, comm: &str) -> ResponseState {
        if !self.inspector.exists(pid) {
            self.settle(pid, comm, ResponseState::Missing).await;
            self.journal
                .action(
                    Tag::Miss,
                    pid,
                    comm,
                    &format!("gone before {}", Signal::Kill),
                )
                .await;
            return ResponseState::Missing;
        }

        match self.signaller.send(pid, Signal::Kill) {
            Ok(()) => {
                self.settle(pid, comm, ResponseState::Killed).await;
                self.journal
                    .action(Tag::Kill, pid, comm, &format!("{} sent", Signal::Kill))
                    .await;
                ResponseState::Killed
            }
            Err(e) => self.settle_failure(pid, comm, Signal::Kill, e).await,
        }
    }

    /// The process is gone for good. A pending action is cancelled and left
    /// for its task to clear; a finished one is forgotten so that a process
    /// reusing the pid starts afresh.
    pub async fn observe_exit(&self, pid: u32) {
        let (state, comm) = match self.states.lock().await.peek(&pid) {
            Some(t) => (t.state, t.comm.clone()),
            None => return,
        };
        if state.is_terminal() {
            self.forget(pid).await;
            return;
        }
        self.settle(pid, &comm, ResponseState::Missing).await;
        self.journal
            .action(
                Tag::Miss,
                pid,
                &comm,
                &format!("exited while {}", state),
            )
            .await;
    }

    /// Journals actions that will not complete because the controller stops.
    pub async fn abandon_pending(&self) {
        for (pid, comm, state) in self.pending().await {
            let (tag, msg) = match state {
                ResponseState::Quarantined => (
                    Tag::Quarantine,
                    format!("left stopped at shutdown, pending {} dropped", Signal::Kill),
                ),
                _ => (
                    Tag::Kill,
                    format!("pending {} dropped at shutdown", Signal::Kill),
                ),
            };
            self.journal.action(tag, pid, &comm, &msg).await;
        }
    }

    async fn capture_forensics(&self, alert: &Alert) {
        let record = ForensicRecord {
            timestamp: capture::now_micros(),
            pid: alert.pid,
            comm: alert.comm.clone(),
            reason: alert.reason_list(),
            process_info: self.inspector.gather(alert.pid),
            evidence: alert.evidence.clone(),
        };
        self.journal.forensic(&record).await;
    }

    async fn settle_failure(&self, pid: u32, comm: &str, signal: Signal, e: Error) -> ResponseState {
        let (state, tag, msg) = match e {
            Error::ProcessAbsent(_) => (
                ResponseState::Missing,
                Tag::Miss,
                format!("gone before {}", signal),
            ),
            Error::PermissionDenied(_) => (
                ResponseState::Denied,
                Tag::Denied,
                format!("{} not permitted", signal),
            ),
            e => (
                ResponseState::Error,
                Tag::Error,
                format!("{} failed: {}", signal, e),
            ),
        };
        self.settle(pid, comm, state).await;
        self.journal.action(tag, pid, comm, &msg).await;
        state
    }

    /// Records `next` if it is a legal transition from the current state.
    async fn settle(&self, pid: u32, comm: &str, next: ResponseState) -> bool {
        let mut states = self.states.lock().await;
        match states.peek_mut(&pid) {
            Some(t) if !t.state.can_become(next) => {
                debug!("pid {} stays {}, ignoring {}", pid, t.state, next);
                false
            }
            Some(t) => {
                t.state = next;
                true
            }
            None => {
                states.put(
                    pid,
                    Tracked {
                        state: next,
                        comm: comm.to_string(),
                    },
                );
                true
            }
        }
    }

    async fn forget(&self, pid: u32) {
        if let Some(t) = self.states.lock().await.pop(&pid) {
            debug!("pid {} forgotten as {}", pid, t.state);
        }
    }
}

fn show(uid: Option<u32>) -> String {
    uid.map_or_else(|| String::from("?"), |uid| uid.to_string())
}

/// Handles alerts one at a time; exits reported by the reaper cancel
/// pending actions. Whatever is still pending when the alerts stop is
/// journaled, not awaited.
pub async fn serve<S, I>(controller: Arc<Controller<S, I>>, alerts: Receiver<Alert>, exits: Receiver<u32>)
where
    S: Signaller + Send + Sync + 'static,
    I: Inspector + Send + Sync + 'static,
{
    let mut alerts = alerts.fuse();
    let mut exits = exits.fuse();
    loop {
        select! {
            alert = alerts.next() => match alert {
                Some(alert) => {
                    let handled = controller.handle(&alert).await;
                    debug!("pid {}: {:?}", alert.pid, handled.outcome);
                }
                None => break,
            },
            pid = exits.next() => {
                if let Some(pid) = pid {
                    controller.observe_exit(pid).await;
                }
            },
        }
    }
    controller.abandon_pending().await;
    info!("Response controller stopped");
}
