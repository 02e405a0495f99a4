//! Ban journal: MessagePack snapshot of persisted bans.
//!
//! The whole set of persisted records is rewritten on every change using an
//! atomic write (temp file + rename), so a crash never leaves a torn file.
//! Configuration-defined bans are never written.

use super::xlines::{BanKind, BanRecord, Timestamp};
use crate::error::PersistError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const JOURNAL_VERSION: u32 = 1;

/// One persisted ban.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub kind: BanKind,
    /// Mask fields as produced by `BanPattern::fields`.
    pub fields: Vec<String>,
    pub reason: String,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

impl From<&BanRecord> for JournalEntry {
    fn from(record: &BanRecord) -> Self {
        Self {
            kind: record.kind(),
            fields: record.pattern.fields(),
            reason: record.reason.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct JournalState {
    version: u32,
    entries: Vec<JournalEntry>,
}

/// On-disk journal location.
#[derive(Debug, Clone)]
pub struct BanJournal {
    path: PathBuf,
}

impl BanJournal {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all entries. A missing file is an empty journal.
    pub fn load(&self) -> Result<Vec<JournalEntry>, PersistError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No ban journal found, starting empty");
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let state: JournalState = rmp_serde::from_read(reader)?;
        if state.version != JOURNAL_VERSION {
            return Err(PersistError::Version(state.version));
        }
        Ok(state.entries)
    }

    /// Replace the journal contents with `entries`.
    pub fn save(&self, entries: Vec<JournalEntry>) -> Result<(), PersistError> {
        let count = entries.len();
        let state = JournalState {
            version: JOURNAL_VERSION,
            entries,
        };

        let temp_path = self.path.with_extension("msgpack.tmp");
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        rmp_serde::encode::write(&mut writer, &state)?;
        writer.flush()?;
        drop(writer);

        // Atomic rename
        fs::rename(&temp_path, &self.path)?;

        debug!(path = %self.path.display(), count, "Ban journal saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::xlines::BanPattern;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = BanJournal::new(dir.path().join("bans.msgpack"));
        assert!(journal.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let journal = BanJournal::new(dir.path().join("bans.msgpack"));

        let record = BanRecord::new(
            BanPattern::kline("*", "bad*host").unwrap(),
            "spam",
            1_700_000_000,
            3600,
        );
        journal.save(vec![JournalEntry::from(&record)]).unwrap();

        let entries = journal.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, BanKind::Kline);
        assert_eq!(entries[0].fields, vec!["*".to_string(), "bad*host".to_string()]);
        assert_eq!(entries[0].expires_at, Some(1_700_003_600));
        assert!(!dir.path().join("bans.msgpack.tmp").exists());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bans.msgpack");
        fs::write(&path, b"not msgpack at all").unwrap();
        assert!(BanJournal::new(&path).load().is_err());
    }
}
