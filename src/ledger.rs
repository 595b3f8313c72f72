//! The import ledger and the per-run existence results file.
//!
//! Both are JSON-lines files. The ledger maps a conversation id to the Bear note
//! created for it; appends never deduplicate, so when the file is read back the
//! last line for a key wins while the key keeps the position of its first line.
//! Each read or write opens, uses and closes the file.

use crate::utils::MigrateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredEntry")]
pub struct LedgerEntry {
    pub conversation_id: String,
    pub note_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    /// Fields written by other tools are carried through a rewrite untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A ledger line as found on disk. Older writers used `bear_note_id` or
/// `bear_id` for the note and `exists_in_bear` for the flag, sometimes more
/// than one spelling on the same line.
#[derive(Deserialize)]
struct StoredEntry {
    conversation_id: String,
    #[serde(default)]
    note_id: Option<String>,
    #[serde(default)]
    bear_note_id: Option<String>,
    #[serde(default)]
    bear_id: Option<String>,
    #[serde(default)]
    exists: Option<bool>,
    #[serde(default)]
    exists_in_bear: Option<bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<StoredEntry> for LedgerEntry {
    fn from(stored: StoredEntry) -> Self {
        Self {
            conversation_id: stored.conversation_id,
            note_id: stored.note_id.or(stored.bear_note_id).or(stored.bear_id),
            exists: stored.exists.or(stored.exists_in_bear),
            extra: stored.extra,
        }
    }
}

impl LedgerEntry {
    pub fn new(conversation_id: impl Into<String>, note_id: Option<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            note_id,
            exists: None,
            extra: Map::new(),
        }
    }
}

/// One answer from Bear, as captured by the listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(alias = "bear_id")]
    pub note_id: String,
    #[serde(alias = "exists_in_bear")]
    pub exists: bool,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// In-memory view of the ledger: one entry per conversation id, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    index: HashMap<String, usize>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the ledger at `path`. A missing file is an empty ledger; a
    /// malformed line fails the whole load.
    pub fn load(path: &Path) -> Result<Self, MigrateError> {
        let mut ledger = Ledger::new();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "ledger not found, starting with an empty one");
                return Ok(ledger);
            }
            Err(e) => return Err(MigrateError::from_io(path, e)),
        };

        for entry in read_json_lines::<LedgerEntry>(path, file)? {
            ledger.upsert(entry);
        }
        debug!(path = %path.display(), entries = ledger.len(), "ledger loaded");
        Ok(ledger)
    }

    /// Insert or replace the entry for its conversation id. A replaced entry
    /// keeps its position.
    pub fn upsert(&mut self, entry: LedgerEntry) {
        match self.index.get(&entry.conversation_id) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index
                    .insert(entry.conversation_id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.index.contains_key(conversation_id)
    }

    pub fn get(&self, conversation_id: &str) -> Option<&LedgerEntry> {
        self.index.get(conversation_id).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LedgerEntry> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the file at `path` with one line per entry.
    ///
    /// Lines go to a temporary file in the same directory which is then
    /// renamed over `path`, so readers see either the old or the new ledger.
    pub fn rewrite(&self, path: &Path) -> Result<(), MigrateError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir).map_err(|e| MigrateError::from_io(dir, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            for entry in &self.entries {
                write_json_line(&mut writer, entry, path)?;
            }
            writer.flush().map_err(|e| MigrateError::from_io(path, e))?;
        }
        tmp.persist(path)
            .map_err(|e| MigrateError::from_io(path, e.error))?;
        Ok(())
    }
}

/// Add one line to the ledger. Existing lines for the same id are left in
/// place; [`Ledger::load`] resolves duplicates.
pub fn append(
    path: &Path,
    conversation_id: &str,
    note_id: Option<&str>,
) -> Result<(), MigrateError> {
    let entry = LedgerEntry::new(conversation_id, note_id.map(str::to_string));
    append_line(path, &entry)
}

/// Empty (or create) the results file at the start of a reconciliation run.
pub fn truncate_results(path: &Path) -> Result<(), MigrateError> {
    File::create(path).map_err(|e| MigrateError::from_io(path, e))?;
    Ok(())
}

/// Record one existence answer. The listener owns this file in production;
/// this is the same format for in-process writers.
pub fn append_result(path: &Path, result: &CheckResult) -> Result<(), MigrateError> {
    append_line(path, result)
}

/// All answers captured during the run, in arrival order. A missing file means
/// no answers arrived.
pub fn load_results(path: &Path) -> Result<Vec<CheckResult>, MigrateError> {
    match File::open(path) {
        Ok(f) => read_json_lines(path, f),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "results file not found, no answers recorded");
            Ok(Vec::new())
        }
        Err(e) => Err(MigrateError::from_io(path, e)),
    }
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<(), MigrateError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MigrateError::from_io(path, e))?;
    let mut writer = BufWriter::new(file);
    write_json_line(&mut writer, value, path)?;
    writer.flush().map_err(|e| MigrateError::from_io(path, e))
}

fn write_json_line<W: Write, T: Serialize>(
    writer: &mut W,
    value: &T,
    path: &Path,
) -> Result<(), MigrateError> {
    serde_json::to_writer(&mut *writer, value).map_err(|source| MigrateError::Parse {
        path: path.to_path_buf(),
        line: 0,
        source,
    })?;
    writer
        .write_all(b"\n")
        .map_err(|e| MigrateError::from_io(path, e))
}

fn read_json_lines<T: serde::de::DeserializeOwned>(
    path: &Path,
    file: File,
) -> Result<Vec<T>, MigrateError> {
    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| MigrateError::from_io(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = serde_json::from_str(line).map_err(|source| MigrateError::Parse {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        out.push(value);
    }
    Ok(out)
}
