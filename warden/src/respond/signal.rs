use std::fmt::{self, Display, Formatter};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal as NixSignal};
use nix::unistd::Pid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Freeze without terminating.
    Stop,
    Terminate,
    Kill,
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Stop => "SIGSTOP",
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        };
        write!(f, "{}", name)
    }
}

pub trait Signaller {
    /// Absent targets map to `ProcessAbsent`, missing privilege to
    /// `PermissionDenied`, anything else to `Signal`.
    fn send(&self, pid: u32, signal: Signal) -> Result<()>;
}

pub struct NixSignaller;

impl Signaller for NixSignaller {
    fn send(&self, pid: u32, signal: Signal) -> Result<()> {
        let sig = match signal {
            Signal::Stop => NixSignal::SIGSTOP,
            Signal::Terminate => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        if pid == 0 || pid > i32::max_value() as u32 {
            return Err(Error::Signal(pid, Errno::EINVAL));
        }
        kill(Pid::from_raw(pid as i32), sig).map_err(|e| to_error(pid, e))
    }
}

fn to_error(pid: u32, e: nix::Error) -> Error {
    match e {
        nix::Error::Sys(Errno::ESRCH) => Error::ProcessAbsent(pid),
        nix::Error::Sys(Errno::EPERM) => Error::PermissionDenied(pid),
        nix::Error::Sys(errno) => Error::Signal(pid, errno),
        _ => Error::Signal(pid, Errno::UnknownErrno),
    }
}
