//! Directory-backed record store.
//!
//! Records are files named `patch-NNNN` in one directory. A record is
//! written to `tmp-NNNN`, synced, then renamed into place; the rename is the
//! publish step. Leftover temporary files are removed on attach.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::storage::io::{PendingWrite, RecordStore, StoreError, WriterSlot, WriterToken};
use crate::storage::state::PersistentState;
use crate::types::Id;

pub const RECORD_PREFIX: &str = "patch-";
pub const TMP_PREFIX: &str = "tmp-";
/// Holds the id of the newest retired patch.
pub const BOUNDARY_FILE: &str = "retired";

/// A record store over one directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    writer: WriterSlot,
    boundary: Mutex<PersistentState>,
}

impl FileStore {
    /// Attach to `dir`, creating it if needed and clearing abandoned
    /// temporary files.
    pub fn attach(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TMP_PREFIX) {
                tracing::warn!("removing incomplete record {}", entry.path().display());
                fs::remove_file(entry.path())?;
            }
        }
        let boundary = PersistentState::open(dir.join(BOUNDARY_FILE))?;
        Ok(Self {
            dir,
            writer: WriterSlot::new(),
            boundary: Mutex::new(boundary),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{RECORD_PREFIX}{index:04}"))
    }

    fn tmp_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{TMP_PREFIX}{index:04}"))
    }

    fn begin<'a>(
        &'a self,
        index: u64,
        token: WriterToken<'a>,
    ) -> Result<Box<dyn PendingWrite + 'a>, StoreError> {
        let final_path = self.record_path(index);
        if final_path.exists() {
            return Err(StoreError::AlreadyExists(index));
        }
        let tmp_path = self.tmp_path(index);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        Ok(Box::new(FilePendingWrite {
            index,
            file: Some(file),
            tmp_path,
            final_path,
            dir: self.dir.clone(),
            completed: false,
            _token: token,
        }))
    }
}

/// Parse a record file name into its index.
fn parse_record_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(RECORD_PREFIX)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl RecordStore for FileStore {
    fn allocate_next(&self) -> Result<Box<dyn PendingWrite + '_>, StoreError> {
        let token = self.writer.acquire()?;
        let index = self.current_index()? + 1;
        self.begin(index, token)
    }

    fn allocate_at(&self, index: u64) -> Result<Box<dyn PendingWrite + '_>, StoreError> {
        if index == 0 {
            return Err(StoreError::InvalidIndex(index));
        }
        let token = self.writer.acquire()?;
        self.begin(index, token)
    }

    fn open(&self, index: u64) -> Result<Box<dyn Read + Send + '_>, StoreError> {
        match File::open(self.record_path(index)) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(index))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn indexes(&self) -> Result<Vec<u64>, StoreError> {
        let mut indexes = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(index) = parse_record_name(&entry.file_name().to_string_lossy()) {
                indexes.push(index);
            }
        }
        indexes.sort_unstable();
        Ok(indexes)
    }

    fn delete(&self, index: u64) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(index)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(index))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn retired_boundary(&self) -> Result<Option<Id>, StoreError> {
        let state = self.boundary.lock().map_err(|_| StoreError::LockPoisoned)?;
        if state.get().is_empty() {
            return Ok(None);
        }
        Ok(Some(Id::from_string(&state.get_string())))
    }

    fn set_retired_boundary(&self, id: &Id) -> Result<(), StoreError> {
        self.boundary
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .set_string(&id.as_string())
    }
}

struct FilePendingWrite<'a> {
    index: u64,
    file: Option<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    dir: PathBuf,
    completed: bool,
    _token: WriterToken<'a>,
}

impl FilePendingWrite<'_> {
    fn file(&mut self) -> std::io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("record already closed"))
    }
}

impl Write for FilePendingWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file()?.flush()
    }
}

impl PendingWrite for FilePendingWrite<'_> {
    fn index(&self) -> u64 {
        self.index
    }

    fn complete(mut self: Box<Self>) -> Result<(), StoreError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        if self.final_path.exists() {
            return Err(StoreError::AlreadyExists(self.index));
        }
        fs::rename(&self.tmp_path, &self.final_path)?;
        self.completed = true;
        // Persist the rename itself.
        #[cfg(unix)]
        if let Err(e) = File::open(&self.dir).and_then(|d| d.sync_all()) {
            tracing::warn!("failed to sync directory {}: {e}", self.dir.display());
        }
        Ok(())
    }
}

impl Drop for FilePendingWrite<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.file.take();
        if let Err(e) = fs::remove_file(&self.tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove {}: {e}", self.tmp_path.display());
            }
        }
    }
}
