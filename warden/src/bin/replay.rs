use std::io::Error;
use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

use async_std::fs;
use async_std::os::unix::net::UnixStream;
use async_std::prelude::*;
use async_std::task;

use serde::Deserialize;

use log::{error, info};

use capture::{Event, EventKind};

/// Pushes JSON events to a running daemon as capture records.
#[derive(StructOpt)]
#[structopt(name = "warden-replay")]
struct Opt {
    socket: PathBuf,

    /// One JSON object per line
    events: PathBuf,
}

#[derive(Deserialize)]
struct Line {
    pid: u32,
    #[serde(default)]
    comm: String,
    kind: EventKind,
    #[serde(default)]
    filename: String,
    #[serde(default = "no_fd")]
    fd: i32,
    #[serde(default)]
    bytes: u64,
}

fn no_fd() -> i32 {
    -1
}

impl From<Line> for Event {
    fn from(line: Line) -> Self {
        Event {
            pid: line.pid,
            comm: line.comm,
            kind: line.kind,
            filename: line.filename,
            fd: line.fd,
            bytes: line.bytes,
            observed_at: 0,
        }
    }
}

fn main() {
    env_logger::init();

    let code = match task::block_on(run()) {
        Ok(()) => exitcode::OK,
        Err(e) => {
            error!("{}", e);
            exitcode::IOERR
        }
    };
    process::exit(code);
}

async fn run() -> Result<(), Error> {
    let opt = Opt::from_args();

    let text = fs::read_to_string(&opt.events).await?;
    let mut stream = UnixStream::connect(&opt.socket).await?;

    let mut sent = 0;
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line: Line = serde_json::from_str(line).map_err(|e| {
            error!("line {}: {}", n + 1, e);
            e
        })?;
        let record = capture::encode(&Event::from(line));
        stream.write_all(&record).await?;
        sent += 1;
    }
    stream.flush().await?;
    info!("Replayed {} events", sent);
    Ok(())
}
