
pub mod record;
pub use record::{decode, encode, RECORD_SZ};

use std::error;
use std::fmt::{self, Display, Formatter};
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_std::channel::Sender;
use async_std::io::prelude::*;
use async_std::io::BufReader;
use async_std::os::unix::net::{UnixListener, UnixStream};
use async_std::task;

use futures::StreamExt;

use log::{debug, error, info, warn};

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

/// Microseconds since the Unix epoch.
pub type Timestamp = u64;

pub const COMM_LEN: usize = 16;
pub const FILENAME_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Open,
    Write,
    Delete,
    Unknown,
}

impl EventKind {
    pub fn from_syscall(code: i32) -> Self {
        match code {
            1 => EventKind::Open,
            2 => EventKind::Write,
            3 => EventKind::Delete,
            _ => EventKind::Unknown,
        }
    }

    pub fn syscall(self) -> i32 {
        match self {
            EventKind::Open => 1,
            EventKind::Write => 2,
            EventKind::Delete => 3,
            EventKind::Unknown => 0,
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Open => "OPEN",
            EventKind::Write => "WRITE",
            EventKind::Delete => "DELETE",
            EventKind::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub pid: u32,
    pub comm: String,
    pub kind: EventKind,
    pub filename: String,
    pub fd: i32,
    pub bytes: u64,
    pub observed_at: Timestamp,
}

pub fn now_micros() -> Timestamp {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as Timestamp)
        .unwrap_or(0)
}

/// A bound capture socket the probe loader connects to.
pub struct Source {
    listener: UnixListener,
    path: PathBuf,
}

impl Source {
    pub async fn bind<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let listener = UnixListener::bind(&path)
            .await
            .map_err(|e| Error::new(ErrorKind::Attach, e))?;
        fs::set_permissions(&path, Permissions::from_mode(0o600))
            .map_err(|e| Error::new(ErrorKind::Attach, e))?;
        info!("Listening for capture connections on {}", path.display());
        Ok(Self { listener, path })
    }

    /// Accepts loader connections until the event channel closes.
    pub async fn serve(self, event_tx: Sender<Event>) -> Result<()> {
        let mut incoming = self.listener.incoming();
        while let Some(stream) = incoming.next().await {
            if event_tx.is_closed() {
                break;
            }
            match stream {
                Ok(stream) => {
                    info!("Accepted a new capture connection");
                    let tx = event_tx.clone();
                    task::spawn(async move {
                        if let Err(e) = pump(stream, tx).await {
                            error!("capture connection failed: {}", e);
                        }
                    });
                }
                Err(e) => error!("failed to accept capture connection: {}", e),
            }
        }
        Ok(())
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("could not remove {}: {}", self.path.display(), e);
        }
    }
}

async fn pump(stream: UnixStream, event_tx: Sender<Event>) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut buffer = [0u8; RECORD_SZ];
    loop {
        let filled = read_record(&mut reader, &mut buffer).await?;
        match filled {
            0 => break,
            RECORD_SZ => (),
            partial => {
                warn!("dropping truncated capture record ({} bytes)", partial);
                return Err(Error::from(ErrorKind::Truncated));
            }
        }

        let event = decode(&buffer, now_micros());
        if event_tx.send(event).await.is_err() {
            debug!("event channel closed, stopping capture connection");
            break;
        }
    }
    info!("Capture connection closed");
    Ok(())
}

// Returns how many bytes were read before EOF, RECORD_SZ for a full record.
async fn read_record(reader: &mut BufReader<UnixStream>, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// Error handling
#[derive(Debug)]
pub struct Error {
    repr: Repr,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            Repr::Simple(kind) => *kind,
            Repr::IO(_) => ErrorKind::IO,
            Repr::Custom(w) => w.kind,
        }
    }

    fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self {
            repr: Repr::Custom(Wrapper {
                kind,
                error: error.into(),
            }),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    IO,
    Attach,
    Truncated,
}

#[derive(Debug)]
enum Repr {
    IO(io::Error),
    Simple(ErrorKind),
    Custom(Wrapper),
}

#[derive(Debug)]
struct Wrapper {
    kind: ErrorKind,
    error: Box<dyn error::Error + Send + Sync>,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Simple(ref kind) => match kind {
                ErrorKind::Attach => write!(f, "cannot attach to the capture source"),
                ErrorKind::Truncated => write!(f, "truncated capture record"),
                ErrorKind::IO => write!(f, "{:?}", self),
            },
            Repr::IO(e) => write!(f, "failed to do io: {}", e),
            Repr::Custom(ref w) => match w.kind {
                ErrorKind::Attach => write!(f, "cannot attach to the capture source: {}", w.error),
                _ => write!(f, "{:?}", self),
            },
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            repr: Repr::Simple(kind),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error { repr: Repr::IO(e) }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e.repr {
            Repr::IO(e) => e,
            Repr::Simple(ErrorKind::Truncated) => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            _ => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}
