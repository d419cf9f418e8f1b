//! Durable log of committed operations: `<store root>/oplog.wal`.
//!
//! Each record is a little-endian `u32` length followed by the bincode
//! envelope of one [`Operation`]. Records are appended in engine commit
//! order and fsynced before the append returns. Replaying the log into a
//! fresh engine rebuilds the replica's state, including its own counter.

use localhaven_crdt::{Operation, ReconciliationEngine};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::error::{ReplicaError, ReplicaResult};

/// File name of the operation log under the store root.
pub const JOURNAL_FILENAME: &str = "oplog.wal";

const LEN_PREFIX: usize = 4;

struct JournalWriter {
    file: File,
    len: u64,
    position: usize,
}

/// Append-only operation log of one replica.
pub struct OpJournal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Splits `bytes` into records. Returns the records and the length of the
/// intact prefix; anything past it is a torn trailing record.
fn parse_records(path: &Path, bytes: &[u8]) -> ReplicaResult<(Vec<Operation>, usize)> {
    let mut records = Vec::new();
    let mut offset = 0;
    while bytes.len() - offset >= LEN_PREFIX {
        let mut len_buf = [0u8; LEN_PREFIX];
        len_buf.copy_from_slice(&bytes[offset..offset + LEN_PREFIX]);
        let len = u32::from_le_bytes(len_buf) as usize;
        let start = offset + LEN_PREFIX;
        if bytes.len() - start < len {
            break;
        }
        let op = Operation::decode(&bytes[start..start + len]).map_err(|e| {
            error!(path = %path.display(), offset, error = %e, "operation log is corrupted");
            ReplicaError::JournalCorrupted {
                path: path.display().to_string(),
                reason: format!("record at offset {offset}: {e}"),
            }
        })?;
        records.push(op);
        offset = start + len;
    }
    Ok((records, offset))
}

impl OpJournal {
    /// Opens (creating if needed) the log under `root` and returns it with
    /// the recorded operations in commit order. A torn trailing record left
    /// by an interrupted append is cut off.
    pub fn open(root: &Path) -> ReplicaResult<(Self, Vec<Operation>)> {
        let path = root.join(JOURNAL_FILENAME);
        let (bytes, existed) = match fs::read(&path) {
            Ok(bytes) => (bytes, true),
            Err(e) if e.kind() == ErrorKind::NotFound => (Vec::new(), false),
            Err(e) => return Err(e.into()),
        };
        let (records, intact) = parse_records(&path, &bytes)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if intact < bytes.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - intact,
                "cutting torn record from operation log"
            );
            file.set_len(intact as u64)?;
            file.sync_all()?;
        }
        if !existed {
            sync_dir(root)?;
        }
        debug!(path = %path.display(), records = records.len(), "opened operation log");

        Ok((
            Self {
                path,
                writer: Mutex::new(JournalWriter {
                    file,
                    len: intact as u64,
                    position: 0,
                }),
            },
            records,
        ))
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets the engine log position the next append starts from.
    pub fn resume_at(&self, position: usize) {
        self.writer.lock().position = position;
    }

    /// Appends every operation `engine` committed since the last append.
    /// Returns how many were written. On failure the file is cut back to
    /// its previous length and the same operations are retried next time.
    pub fn append_from(&self, engine: &ReconciliationEngine) -> ReplicaResult<usize> {
        let mut writer = self.writer.lock();
        let ops = engine.operations_from(writer.position);
        if ops.is_empty() {
            return Ok(0);
        }

        let mut batch = Vec::new();
        for op in &ops {
            let encoded = op.encode()?;
            let len = u32::try_from(encoded.len()).map_err(|_| ReplicaError::JournalCorrupted {
                path: self.path.display().to_string(),
                reason: format!("operation {} too large to record", op.id),
            })?;
            batch.extend_from_slice(&len.to_le_bytes());
            batch.extend_from_slice(&encoded);
        }

        let written = writer
            .file
            .write_all(&batch)
            .and_then(|()| writer.file.sync_all());
        if let Err(e) = written {
            error!(path = %self.path.display(), error = %e, "failed to append to operation log");
            let len = writer.len;
            if let Err(cut) = writer.file.set_len(len) {
                warn!(path = %self.path.display(), error = %cut, "failed to cut back operation log");
            }
            return Err(e.into());
        }

        writer.len += batch.len() as u64;
        writer.position += ops.len();
        debug!(records = ops.len(), position = writer.position, "appended to operation log");
        Ok(ops.len())
    }
}
