
use std::path::Path;

use regex::RegexSet;

use crate::Result;

pub const DEFAULT_EXTENSIONS: [&str; 5] = [".locked", ".enc", ".crypt", ".encrypted", ".crypted"];

pub const DEFAULT_NOTE_PATTERNS: [&str; 3] = [
    r"(?i)^read_?me.*decrypt",
    r"(?i)^how_?to_?decrypt",
    r"(?i)^your_?files_?are_?encrypted",
];

/// Names that ransomware output or ransom notes tend to carry.
pub struct Suspicious {
    extensions: RegexSet,
    notes: RegexSet,
}

impl Suspicious {
    pub fn new<E, N>(extensions: E, note_patterns: N) -> Result<Self>
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| format!(r"(?i){}$", regex::escape(ext.as_ref())));
        Ok(Self {
            extensions: RegexSet::new(extensions)?,
            notes: RegexSet::new(note_patterns)?,
        })
    }

    pub fn is_match(&self, filename: &str) -> bool {
        if self.extensions.is_match(filename) {
            return true;
        }
        let base = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(filename);
        self.notes.is_match(base)
    }
}

impl Default for Suspicious {
    fn default() -> Self {
        let extensions = DEFAULT_EXTENSIONS
            .iter()
            .map(|ext| format!(r"(?i){}$", regex::escape(ext)));
        Self {
            extensions: RegexSet::new(extensions).expect("default extensions are valid"),
            notes: RegexSet::new(&DEFAULT_NOTE_PATTERNS).expect("default patterns are valid"),
        }
    }
}
