use std::io;
use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

use async_std::channel;
use async_std::sync::Arc;
use async_std::task;

use signal_hook::iterator::Signals;

use futures::select;
use futures::{FutureExt, StreamExt};

use log::{error, info};

use capture::Source;

use warden::config::{Config, Policy};
use warden::forensic::ProcfsInspector;
use warden::journal::Journal;
use warden::pipeline::{self, Ingestor};
use warden::respond::{self, Controller, NixSignaller, Settings};
use warden::Error;

const EVENT_CAP: usize = 4096;
const ALERT_CAP: usize = 64;

#[derive(StructOpt)]
#[structopt(name = "warden")]
struct Opt {
    /// Unix socket the capture loader connects to
    socket: PathBuf,

    #[structopt(short, long)]
    config: Option<PathBuf>,

    /// Directory for events.log, alerts.log, actions.log and forensic.jsonl
    #[structopt(short, long, default_value = ".")]
    log_dir: PathBuf,

    /// DRY_RUN, TERMINATE_THEN_KILL or QUARANTINE_THEN_KILL
    #[structopt(long)]
    policy: Option<Policy>,

    /// Never signal, whatever the policy says
    #[structopt(long)]
    dry_run: bool,
}

fn main() {
    env_logger::init();

    let code = match run() {
        Ok(()) => exitcode::OK,
        Err(e) => {
            error!("{}", e);
            exit_code(&e)
        }
    };
    process::exit(code);
}

fn exit_code(e: &Error) -> exitcode::ExitCode {
    match e {
        Error::Capture(_) => exitcode::UNAVAILABLE,
        Error::Config(_) | Error::Pattern(_) => exitcode::CONFIG,
        _ => exitcode::IOERR,
    }
}

fn load_config(opt: &Opt) -> Result<Config, Error> {
    let mut config = match &opt.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(policy) = opt.policy {
        config.policy = policy;
    }
    if opt.dry_run {
        config.policy = Policy::DryRun;
    }
    Ok(config)
}

fn run() -> Result<(), Error> {
    let opt = Opt::from_args();

    if !opt.log_dir.is_dir() {
        eprintln!("Expect a directory for the journals");
        return Err(Error::from(io::Error::from(io::ErrorKind::NotFound)));
    }

    let config = load_config(&opt)?;
    let ingestor = Ingestor::new(&config, ProcfsInspector::new())?;
    info!(
        "Starting with policy {}, window {:?}",
        config.policy,
        config.window()
    );

    task::block_on(async move {
        let journal = Arc::new(Journal::open(&opt.log_dir).await?);
        let source = Source::bind(&opt.socket).await?;
        let controller = Arc::new(Controller::new(
            Settings::from(&config),
            NixSignaller,
            ProcfsInspector::new(),
            Arc::clone(&journal),
        ));

        let (event_tx, event_rx) = channel::bounded(EVENT_CAP);
        let (alert_tx, alert_rx) = channel::bounded(ALERT_CAP);
        let (exit_tx, exit_rx) = channel::bounded(ALERT_CAP);
        let pipeline = task::spawn(pipeline::run(
            ingestor,
            event_rx,
            alert_tx,
            exit_tx,
            journal,
            config.reap_interval(),
        ));
        let responder = task::spawn(respond::serve(controller, alert_rx, exit_rx));

        let signals = Signals::new(&[signal_hook::SIGINT, signal_hook::SIGTERM])?;
        let (sig_tx, sig_rx) = channel::bounded::<()>(1);
        let waiter = signals.clone();
        let sig_handle = task::spawn_blocking(move || {
            // dropping tx yields a shutdown
            let _tx = sig_tx;
            waiter.into_iter().next();
        });

        let closer = event_tx.clone();
        let mut sig = sig_rx.fuse();
        let res = select! {
            res = source.serve(event_tx).fuse() => res.map_err(Error::from),
            _ = sig.next() => {
                info!("Shutting down");
                Ok(())
            },
        };

        // drain what was captured before stopping
        closer.close();
        signals.close();
        sig_handle.await;
        pipeline.await;
        responder.await;
        res
    })
}
