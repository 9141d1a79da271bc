//! Small durable values: a byte blob and a counter built on it.
//!
//! # Write Protocol
//!
//! 1. Write the new value to `<file>.jrnl` and sync it
//! 2. Write `<file>.tmp`, sync, rename over `<file>`
//! 3. Delete the journal
//!
//! On open, a present journal is replayed before the main file is read. A
//! crash can therefore lose at most the one write whose journal was not yet
//! synced, and never leaves a torn value.
//!
//! # Record Format
//!
//! ```text
//! +--------+-----------------+----------------+
//! | 0-3    | length (u32 LE) |                |
//! | 4-N    | payload         |                |
//! | N-N+3  | CRC32 (u32 LE)  | of the payload |
//! +--------+-----------------+----------------+
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::storage::io::StoreError;

const LENGTH_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 4;

fn encode_record(payload: &[u8]) -> Result<Vec<u8>, StoreError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| {
            StoreError::Corruption(format!("state of {} bytes too large", payload.len()))
        })?;
    let mut out = Vec::with_capacity(LENGTH_SIZE + payload.len() + CHECKSUM_SIZE);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    Ok(out)
}

fn decode_record(bytes: &[u8]) -> Result<Vec<u8>, StoreError> {
    let header: [u8; LENGTH_SIZE] = bytes
        .get(..LENGTH_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StoreError::Corruption("state record shorter than its header".to_string()))?;
    let len = u32::from_le_bytes(header) as usize;
    let expected = LENGTH_SIZE + len + CHECKSUM_SIZE;
    if bytes.len() != expected {
        return Err(StoreError::Corruption(format!(
            "state record is {} bytes, expected {expected}",
            bytes.len()
        )));
    }
    let payload = &bytes[LENGTH_SIZE..LENGTH_SIZE + len];
    let stored: [u8; CHECKSUM_SIZE] = bytes[LENGTH_SIZE + len..]
        .try_into()
        .map_err(|_| StoreError::Corruption("state checksum missing".to_string()))?;
    if crc32fast::hash(payload) != u32::from_le_bytes(stored) {
        return Err(StoreError::Corruption("state checksum mismatch".to_string()));
    }
    Ok(payload.to_vec())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// A durable byte value stored in one file.
#[derive(Debug)]
pub struct PersistentState {
    path: PathBuf,
    journal: PathBuf,
    value: Vec<u8>,
}

impl PersistentState {
    /// Open the state at `path`, replaying a leftover journal. A missing
    /// file yields an empty value.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corruption` if the main file is damaged.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let journal = with_suffix(&path, ".jrnl");
        let mut state = Self {
            path,
            journal,
            value: Vec::new(),
        };

        if state.journal.exists() {
            let bytes = fs::read(&state.journal)?;
            match decode_record(&bytes) {
                Ok(value) => {
                    tracing::info!("replaying state journal {}", state.journal.display());
                    state.commit_journal(value)?;
                    return Ok(state);
                }
                Err(e) => {
                    let journal = state.journal.display();
                    tracing::warn!("discarding torn state journal {journal}: {e}");
                    fs::remove_file(&state.journal)?;
                }
            }
        }

        if state.path.exists() {
            state.value = decode_record(&fs::read(&state.path)?)?;
        }
        Ok(state)
    }

    /// Open, creating the file with `initial` if it does not exist.
    pub fn open_or_create(path: impl Into<PathBuf>, initial: &[u8]) -> Result<Self, StoreError> {
        let path = path.into();
        let fresh = !path.exists() && !with_suffix(&path, ".jrnl").exists();
        let mut state = Self::open(path)?;
        if fresh {
            state.set(initial)?;
        }
        Ok(state)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self) -> &[u8] {
        &self.value
    }

    pub fn set(&mut self, value: &[u8]) -> Result<(), StoreError> {
        self.write_journal(value)?;
        self.commit_journal(value.to_vec())
    }

    fn write_journal(&self, value: &[u8]) -> Result<(), StoreError> {
        write_synced(&self.journal, &encode_record(value)?)
    }

    fn commit_journal(&mut self, value: Vec<u8>) -> Result<(), StoreError> {
        let tmp = with_suffix(&self.path, ".tmp");
        write_synced(&tmp, &encode_record(&value)?)?;
        fs::rename(&tmp, &self.path)?;
        fs::remove_file(&self.journal)?;
        self.value = value;
        Ok(())
    }

    #[must_use]
    pub fn get_string(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }

    pub fn set_string(&mut self, value: &str) -> Result<(), StoreError> {
        self.set(value.as_bytes())
    }

    /// The value as a decimal integer.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corruption` if the value is not a number.
    pub fn get_i64(&self) -> Result<i64, StoreError> {
        let text = self.get_string();
        text.trim()
            .parse()
            .map_err(|_| StoreError::Corruption(format!("state value '{text}' is not a number")))
    }

    pub fn set_i64(&mut self, value: i64) -> Result<(), StoreError> {
        self.set_string(&value.to_string())
    }
}

/// A durable integer counter.
#[derive(Debug)]
pub struct PersistentCounter {
    state: PersistentState,
}

impl PersistentCounter {
    /// Open the counter at `path`, starting at `initial` if it is new.
    pub fn open(path: impl Into<PathBuf>, initial: i64) -> Result<Self, StoreError> {
        let state = PersistentState::open_or_create(path, initial.to_string().as_bytes())?;
        // Fail early on a damaged value.
        state.get_i64()?;
        Ok(Self { state })
    }

    /// The current value.
    pub fn get(&self) -> Result<i64, StoreError> {
        self.state.get_i64()
    }

    /// Add one and return the new value.
    pub fn inc(&mut self) -> Result<i64, StoreError> {
        let next = self.get()? + 1;
        self.state.set_i64(next)?;
        Ok(next)
    }

    pub fn set(&mut self, value: i64) -> Result<(), StoreError> {
        self.state.set_i64(value)
    }
}
