//! In-memory record store with fault injection.
//!
//! Records live in a map and vanish with the process. Faults are drawn from
//! a seeded RNG so a failing run can be replayed:
//! - read errors on `open`
//! - write errors on `complete` (the record is not published)
//! - bit flips in the bytes returned by `open`

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::sync::{Mutex, RwLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{PendingWrite, RecordStore, StoreError, WriterSlot, WriterToken};
use crate::types::Id;

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error at publish time (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a corrupted read (0.0 - 1.0).
    pub corruption_rate: f64,
}

impl FaultConfig {
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            read_error_rate: 0.05,
            write_error_rate: 0.05,
            corruption_rate: 0.05,
        }
    }
}

/// Counts of operations and injected faults.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemStoreStats {
    pub reads: u64,
    pub writes: u64,
    pub injected_read_errors: u64,
    pub injected_write_errors: u64,
    pub corrupted_reads: u64,
}

#[derive(Debug)]
struct Faults {
    config: FaultConfig,
    rng: StdRng,
    stats: MemStoreStats,
}

impl Faults {
    fn should_inject(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    /// Flip 1-8 random bits.
    fn corrupt(&mut self, bytes: &mut [u8]) {
        if bytes.is_empty() {
            return;
        }
        let flips = self.rng.random_range(1..=8);
        for _ in 0..flips {
            let offset = self.rng.random_range(0..bytes.len());
            let bit = self.rng.random_range(0..8u8);
            bytes[offset] ^= 1 << bit;
        }
    }
}

/// A process-local record store.
#[derive(Debug)]
pub struct MemStore {
    records: RwLock<BTreeMap<u64, Vec<u8>>>,
    boundary: RwLock<Option<Id>>,
    writer: WriterSlot,
    faults: Mutex<Faults>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_faults(0, FaultConfig::default())
    }

    /// A store whose faults are drawn from `seed`.
    #[must_use]
    pub fn with_faults(seed: u64, config: FaultConfig) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            boundary: RwLock::new(None),
            writer: WriterSlot::new(),
            faults: Mutex::new(Faults {
                config,
                rng: StdRng::seed_from_u64(seed),
                stats: MemStoreStats::default(),
            }),
        }
    }

    pub fn set_fault_config(&self, config: FaultConfig) -> Result<(), StoreError> {
        self.faults.lock().map_err(|_| StoreError::LockPoisoned)?.config = config;
        Ok(())
    }

    pub fn stats(&self) -> Result<MemStoreStats, StoreError> {
        Ok(self
            .faults
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .stats
            .clone())
    }

    fn begin<'a>(
        &'a self,
        index: u64,
        token: WriterToken<'a>,
    ) -> Result<Box<dyn PendingWrite + 'a>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        if records.contains_key(&index) {
            return Err(StoreError::AlreadyExists(index));
        }
        Ok(Box::new(MemPendingWrite {
            store: self,
            index,
            buf: Vec::new(),
            _token: token,
        }))
    }

    fn publish(&self, index: u64, bytes: Vec<u8>) -> Result<(), StoreError> {
        {
            let mut faults = self.faults.lock().map_err(|_| StoreError::LockPoisoned)?;
            faults.stats.writes += 1;
            let rate = faults.config.write_error_rate;
            if faults.should_inject(rate) {
                faults.stats.injected_write_errors += 1;
                return Err(StoreError::InjectedFault(format!("write of record {index}")));
            }
        }
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        if records.contains_key(&index) {
            return Err(StoreError::AlreadyExists(index));
        }
        records.insert(index, bytes);
        Ok(())
    }
}

impl RecordStore for MemStore {
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
        let mut bytes = self
            .records
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(&index)
            .cloned()
            .ok_or(StoreError::NotFound(index))?;

        let mut faults = self.faults.lock().map_err(|_| StoreError::LockPoisoned)?;
        faults.stats.reads += 1;
        let read_rate = faults.config.read_error_rate;
        if faults.should_inject(read_rate) {
            faults.stats.injected_read_errors += 1;
            return Err(StoreError::InjectedFault(format!("read of record {index}")));
        }
        let corruption_rate = faults.config.corruption_rate;
        if faults.should_inject(corruption_rate) {
            faults.stats.corrupted_reads += 1;
            faults.corrupt(&mut bytes);
        }
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn indexes(&self) -> Result<Vec<u64>, StoreError> {
        Ok(self
            .records
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .keys()
            .copied()
            .collect())
    }

    fn delete(&self, index: u64) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(&index)
            .map(|_| ())
            .ok_or(StoreError::NotFound(index))
    }

    fn retired_boundary(&self) -> Result<Option<Id>, StoreError> {
        Ok(self
            .boundary
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .clone())
    }

    fn set_retired_boundary(&self, id: &Id) -> Result<(), StoreError> {
        *self.boundary.write().map_err(|_| StoreError::LockPoisoned)? = Some(id.clone());
        Ok(())
    }
}

struct MemPendingWrite<'a> {
    store: &'a MemStore,
    index: u64,
    buf: Vec<u8>,
    _token: WriterToken<'a>,
}

impl Write for MemPendingWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl PendingWrite for MemPendingWrite<'_> {
    fn index(&self) -> u64 {
        self.index
    }

    fn complete(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.store.publish(this.index, this.buf)
    }
}
