use super::*;

use std::fs;
use std::path::Path;

use mockall::predicate::*;

use pretty_assertions::assert_eq;

use detector::Rule;

use crate::journal::{ALERTS_LOG, EVENTS_LOG};
use crate::mocks::MockProcs;

const T0: Timestamp = 1_600_000_000_000_000;
const MS: Timestamp = 1_000;
const SEC: Timestamp = 1_000_000;

fn event(pid: u32, comm: &str, kind: EventKind, filename: &str, at: Timestamp) -> Event {
    Event {
        pid,
        comm: comm.to_string(),
        kind,
        filename: filename.to_string(),
        fd: -1,
        bytes: if kind == EventKind::Write { 1 } else { 0 },
        observed_at: at,
    }
}

fn ingestor(procs: MockProcs) -> Ingestor<MockProcs> {
    Ingestor::new(&Config::default(), procs)
        .unwrap()
        .with_own_pid(1)
}

fn reasons(alert: &Alert) -> Vec<Rule> {
    alert.reasons.iter().copied().collect()
}

#[test]
fn encryptor_touching_six_files_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let text = "quarterly numbers, nothing to see here\n".repeat(64);
    for fd in 3..9 {
        fs::write(dir.path().join(format!("doc{}.locked", fd)), &text).unwrap();
    }
    let root = dir.path().to_path_buf();
    let mut procs = MockProcs::new();
    procs
        .expect_fd_target()
        .with(eq(1234), always())
        .returning(move |_, fd| Some(root.join(format!("doc{}.locked", fd))));
    let mut ingestor = ingestor(procs);

    let mut alerts = vec![];
    for (i, fd) in (3..9).enumerate() {
        let mut write = event(1234, "encryptor", EventKind::Write, "", T0 + i as Timestamp * 300 * MS);
        write.fd = fd;
        write.bytes = text.len() as u64;
        alerts.extend(ingestor.ingest(&write));
    }

    assert_eq!(1, alerts.len());
    let alert = &alerts[0];
    assert_eq!(1234, alert.pid);
    assert!(alert.reasons.contains(&Rule::DistinctFiles));
    assert!(!alert.reasons.contains(&Rule::HighEntropy));
    assert_eq!(6, alert.evidence.distinct_files);
    assert_eq!(6, alert.evidence.write_count);
    assert_eq!(
        dir.path().join("doc8.locked").to_string_lossy(),
        alert.evidence.recent_files[5]
    );
}

#[test]
fn trickle_of_small_writes_is_quiet() {
    let mut ingestor = ingestor(MockProcs::new());
    for i in 0..100 {
        let write = event(5, "logger", EventKind::Write, "/nonexistent/app.log", T0 + i * 10 * MS);
        assert!(ingestor.ingest(&write).is_none(), "alert on write {}", i);
    }

    let snap = ingestor.store.snapshot(5, T0 + 990 * MS);
    assert_eq!(100, snap.write_count);
    assert_eq!(100, snap.total_bytes);
    assert_eq!(0, snap.distinct_files);
}

#[test]
fn whitelisted_name_never_alerts() {
    let mut ingestor = ingestor(MockProcs::new());
    for i in 0..20 {
        let at = T0 + i * MS;
        let mut write = event(7, "systemd", EventKind::Write, &format!("/nonexistent/f{}.enc", i), at);
        write.bytes = 1 << 20;
        assert!(ingestor.ingest(&write).is_none());
        let delete = event(7, "systemd", EventKind::Delete, &format!("/srv/f{}", i), at);
        assert!(ingestor.ingest(&delete).is_none());
    }
}

#[test]
fn high_entropy_write_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    let uniform: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
    fs::write(&path, &uniform).unwrap();

    let mut ingestor = ingestor(MockProcs::new());
    let write = event(60, "packer", EventKind::Write, &path.to_string_lossy(), T0);
    let alert = ingestor.ingest(&write).unwrap();

    assert_eq!(vec![Rule::HighEntropy], reasons(&alert));
    assert!((alert.evidence.max_entropy - 8.0).abs() < 1e-9);
    // plain names are not touched files
    assert_eq!(0, alert.evidence.distinct_files);
}

#[test]
fn write_rate_anomaly_against_population() {
    let mut ingestor = ingestor(MockProcs::new());
    let mut at = T0;
    for pid in 1000..1050 {
        let writes = if pid % 2 == 0 { 1 } else { 2 };
        for _ in 0..writes {
            at += MS;
            let write = event(pid, "worker", EventKind::Write, "/nonexistent/w.log", at);
            assert!(ingestor.ingest(&write).is_none());
        }
    }
    assert_eq!(75, ingestor.baseline().write_counts().len());

    let mut alerts = vec![];
    for _ in 0..3 {
        at += MS;
        let write = event(9, "burst", EventKind::Write, "/nonexistent/b.log", at);
        alerts.push(ingestor.ingest(&write));
    }

    assert!(alerts[0].is_none());
    assert!(alerts[1].is_none());
    let alert = alerts[2].as_ref().unwrap();
    assert_eq!(vec![Rule::WriteRateAnomaly], reasons(alert));
    assert_eq!(78, ingestor.baseline().write_counts().len());
}

#[test]
fn deletes_do_not_feed_the_baseline() {
    let mut ingestor = ingestor(MockProcs::new());
    ingestor.ingest(&event(8, "rm", EventKind::Delete, "/tmp/a", T0));
    ingestor.ingest(&event(8, "rm", EventKind::Open, "/tmp/b", T0));
    assert!(ingestor.baseline().write_counts().is_empty());
    assert!(ingestor.baseline().byte_counts().is_empty());
}

#[test]
fn one_alert_per_window() {
    let mut ingestor = ingestor(MockProcs::new());
    let mut fired = vec![];
    let times = [
        T0,
        T0 + MS,
        T0 + 2 * MS,
        T0 + 3 * MS,
        T0 + 20 * SEC,
        T0 + 20 * SEC + MS,
        T0 + 20 * SEC + 2 * MS,
    ];
    for (i, at) in times.iter().enumerate() {
        let delete = event(300, "wiper", EventKind::Delete, &format!("/data/{}", i), *at);
        if let Some(alert) = ingestor.ingest(&delete) {
            fired.push(alert.fired_at);
        }
    }

    assert_eq!(vec![T0 + 2 * MS, T0 + 20 * SEC + 2 * MS], fired);
}

#[test]
fn own_events_are_dropped_and_unknown_ones_not_recorded() {
    let mut ingestor = ingestor(MockProcs::new());
    let own = event(1, "warden", EventKind::Delete, "/var/log/x", T0);
    let unknown = event(2, "odd", EventKind::Unknown, "", T0);

    assert!(!ingestor.accepts(&own));
    assert!(ingestor.accepts(&unknown));
    assert!(ingestor.ingest(&own).is_none());
    assert!(ingestor.ingest(&unknown).is_none());
    assert!(ingestor.store().is_empty());
}

#[test]
fn unresolved_write_target_still_counts() {
    let mut procs = MockProcs::new();
    procs.expect_fd_target().returning(|_, _| None);
    let mut ingestor = ingestor(procs);

    let mut write = event(70, "tool", EventKind::Write, "", T0);
    write.fd = 4;
    write.bytes = 512;
    assert!(ingestor.ingest(&write).is_none());

    let snap = ingestor.store.snapshot(70, T0);
    assert_eq!(1, snap.write_count);
    assert_eq!(512, snap.total_bytes);
    assert_eq!(0.0, snap.max_entropy);
}

#[test]
fn reaper_evicts_idle_exited_pids() {
    let mut procs = MockProcs::new();
    procs.expect_exists().returning(|pid| pid == 2);
    let mut ingestor = ingestor(procs);

    ingestor.ingest(&event(2, "alive", EventKind::Open, "/a", T0));
    ingestor.ingest(&event(3, "gone", EventKind::Open, "/b", T0));
    ingestor.ingest(&event(4, "busy", EventKind::Open, "/c", T0 + 9 * SEC));
    assert_eq!(3, ingestor.store().len());

    // pid 4 still has in-window activity, pid 2 still runs
    assert_eq!(vec![3], ingestor.reap(T0 + 11 * SEC));
    assert_eq!(2, ingestor.store().len());
    assert!(ingestor.store().get(2).unwrap().is_empty());
    assert!(ingestor.store().get(4).is_some());
}

#[test]
fn reaped_pid_alerts_again() {
    let mut procs = MockProcs::new();
    procs.expect_exists().returning(|_| false);
    let mut ingestor = ingestor(procs);

    let burst = |ingestor: &mut Ingestor<MockProcs>, at: Timestamp| {
        (0..3)
            .filter_map(|i| {
                let delete = event(50, "wiper", EventKind::Delete, &format!("/d/{}", i), at + i * MS);
                ingestor.ingest(&delete)
            })
            .count()
    };
    assert_eq!(1, burst(&mut ingestor, T0));
    assert_eq!(vec![50], ingestor.reap(T0 + 11 * SEC));
    assert!(ingestor.store().get(50).is_none());
    assert_eq!(1, burst(&mut ingestor, T0 + 12 * SEC));
}

fn lines(dir: &Path, name: &str) -> Vec<String> {
    fs::read_to_string(dir.join(name))
        .unwrap()
        .lines()
        .map(String::from)
        .collect()
}

#[async_std::test]
async fn run_journals_and_forwards_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(Journal::open(dir.path()).await.unwrap());
    let (event_tx, event_rx) = async_std::channel::bounded(16);
    let (alert_tx, alert_rx) = async_std::channel::bounded(16);
    let (exit_tx, _exit_rx) = async_std::channel::bounded(16);
    let runner = async_std::task::spawn(run(
        ingestor(MockProcs::new()),
        event_rx,
        alert_tx,
        exit_tx,
        journal,
        Duration::from_secs(3600),
    ));

    event_tx
        .send(event(1, "warden", EventKind::Write, "/var/log/events.log", T0))
        .await
        .unwrap();
    event_tx
        .send(event(41, "odd", EventKind::Unknown, "", T0))
        .await
        .unwrap();
    for i in 0..3 {
        event_tx
            .send(event(40, "wiper", EventKind::Delete, &format!("/home/u/{}", i), T0 + i * MS))
            .await
            .unwrap();
    }
    let alert = alert_rx.recv().await.unwrap();
    drop(event_tx);
    runner.await;

    assert_eq!(40, alert.pid);
    assert_eq!(vec![Rule::DeleteBurst], reasons(&alert));
    let events = lines(dir.path(), EVENTS_LOG);
    assert_eq!(4, events.len());
    assert!(events[0].contains("UNKNOWN  pid=41 comm=odd"));
    assert!(events[1].contains("DELETE  pid=40 comm=wiper file='/home/u/0'"));
    let alerts = lines(dir.path(), ALERTS_LOG);
    assert_eq!(1, alerts.len());
    assert!(alerts[0].contains("[ALERT] comm='wiper' pid=40 reasons=delete_burst"));
}
