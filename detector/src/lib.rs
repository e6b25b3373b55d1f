pub mod alert;
pub mod baseline;
pub mod entropy;
pub mod suspicious;
pub mod window;

pub use alert::{Alert, AlertEngine, Evidence, Rule, Thresholds};
pub use baseline::{Baseline, Population};
pub use suspicious::Suspicious;
pub use window::{Activity, ProcessWindow, Snapshot, WindowStore};

use std::error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Microseconds since the Unix epoch.
pub type Timestamp = u64;

pub type Result<T> = std::result::Result<T, Error>;

pub fn micros(d: Duration) -> Timestamp {
    d.as_micros() as Timestamp
}

#[derive(Debug)]
pub enum Error {
    Pattern(regex::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use Error::*;
        match self {
            Pattern(e) => write!(f, "invalid suspicious name pattern: {}", e),
        }
    }
}

impl error::Error for Error {}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::Pattern(e)
    }
}
