pub mod config;
pub mod forensic;
pub mod journal;
pub mod pipeline;
pub mod respond;

#[cfg(test)]
pub(crate) mod mocks;

use std::error;
use std::fmt::{self, Display, Formatter};
use std::io;

use nix::errno::Errno;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// The target pid no longer exists.
    ProcessAbsent(u32),
    PermissionDenied(u32),
    Signal(u32, Errno),
    RateLimited(u32),
    Io(io::Error),
    Capture(capture::Error),
    Config(serde_json::Error),
    Pattern(detector::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use Error::*;
        match self {
            ProcessAbsent(pid) => write!(f, "process {} is absent", pid),
            PermissionDenied(pid) => write!(f, "permission denied signalling process {}", pid),
            Signal(pid, errno) => write!(f, "failed to signal process {}: {}", pid, errno.desc()),
            RateLimited(pid) => write!(f, "action on process {} suppressed by rate limit", pid),
            Io(e) => write!(f, "failed to do io: {}", e),
            Capture(e) => write!(f, "{}", e),
            Config(e) => write!(f, "invalid configuration: {}", e),
            Pattern(e) => write!(f, "{}", e),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<capture::Error> for Error {
    fn from(e: capture::Error) -> Self {
        Error::Capture(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e)
    }
}

impl From<detector::Error> for Error {
    fn from(e: detector::Error) -> Self {
        Error::Pattern(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        use Error::*;
        match e {
            Io(e) => e,
            Capture(e) => e.into(),
            ProcessAbsent(_) => io::Error::new(io::ErrorKind::NotFound, e),
            PermissionDenied(_) => io::Error::new(io::ErrorKind::PermissionDenied, e),
            Config(_) | Pattern(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
            _ => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}
