//! Shannon entropy of file samples.
//!
//! Entropy is a signal, not evidence: a target that cannot be read yields no
//! score at all rather than a low one.


use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::OFlag;

use log::debug;

pub const SAMPLE_SZ: usize = 4096;

/// Bits per byte over the empirical byte frequencies, in `[0, 8]`.
pub fn shannon(sample: &[u8]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }

    let mut counts = [0usize; 256];
    for b in sample {
        counts[*b as usize] += 1;
    }

    let len = sample.len() as f64;
    counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Reads the head of a regular file. Anything else is refused before it is
/// opened, and the open never blocks: a FIFO swapped in between the two checks
/// is refused by the second one.
pub fn read_sample(path: &Path) -> io::Result<Vec<u8>> {
    regular(&fs::metadata(path)?)?;
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)?;
    regular(&file.metadata()?)?;

    let mut sample = Vec::with_capacity(SAMPLE_SZ);
    file.take(SAMPLE_SZ as u64).read_to_end(&mut sample)?;
    Ok(sample)
}

fn regular(meta: &fs::Metadata) -> io::Result<()> {
    if meta.is_file() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        ))
    }
}

/// Scores the head of `path`, `None` when it cannot be read.
pub fn sample_file(path: &Path) -> Option<f64> {
    match read_sample(path) {
        Ok(sample) => Some(shannon(&sample)),
        Err(e) => {
            debug!("entropy soft miss on {}: {}", path.display(), e);
            None
        }
    }
}
