//! Storage providers for patch logs.
//!
//! A provider knows how to create, open, find, disable and remove the
//! storage behind a data source. Providers are registered by name in a
//! `ProviderRegistry`; a data source's `log_type` names its provider.
//!
//! # Providers
//!
//! - **file**: one directory per data source under the server root:
//!   `<root>/<name>/source.cfg`, `<root>/<name>/Log/patch-NNNN`, and an
//!   optional `<root>/<name>/disabled` marker.
//! - **mem**: process-local, gone on restart.
//! - **zk**: index and head in a coordination service, bodies in a record
//!   store shared by every participant. Descriptions are published at
//!   `/delta/logs/<name>` so other instances can discover them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::coord::{CoordError, Coordinator};
use crate::log::index::{LOGS_ROOT, log_path};
use crate::log::PatchLog;
use crate::registry::{RegistryError, SourceDescription};
use crate::storage::{FileStore, MemStore, RecordStore};

pub const PROVIDER_FILE: &str = "file";
pub const PROVIDER_MEM: &str = "mem";
pub const PROVIDER_ZK: &str = "zk";

/// Per-source configuration file in a file area.
pub const SOURCE_CONFIG: &str = "source.cfg";
/// Presence marks a file area as disabled.
pub const DISABLED_MARKER: &str = "disabled";
/// Directory of patch records in a file area.
pub const LOG_DIR: &str = "Log";

pub trait PatchStoreProvider: Send + Sync {
    /// The `log_type` this provider serves.
    fn name(&self) -> &'static str;

    /// Create storage for a new data source and open its log.
    fn create(&self, desc: &SourceDescription) -> Result<PatchLog, RegistryError>;

    /// Open the log of an existing data source.
    fn open(&self, desc: &SourceDescription) -> Result<PatchLog, RegistryError>;

    /// Descriptions of the enabled data sources this provider holds.
    fn scan(&self) -> Result<Vec<SourceDescription>, RegistryError>;

    /// Mark a data source inactive, keeping its history.
    fn disable(&self, desc: &SourceDescription) -> Result<(), RegistryError>;

    /// Retire a data source's storage.
    fn remove(&self, desc: &SourceDescription) -> Result<(), RegistryError>;
}

/// Providers by name.
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn PatchStoreProvider>>,
    default: String,
}

impl ProviderRegistry {
    /// An empty registry whose default provider is `default`.
    #[must_use]
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default: default.into(),
        }
    }

    /// Add `provider`, replacing any provider with the same name.
    #[must_use]
    pub fn with(mut self, provider: Arc<dyn PatchStoreProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn PatchStoreProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    /// The provider called `name`.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn get(&self, name: &str) -> Result<Arc<dyn PatchStoreProvider>, RegistryError> {
        self.providers
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| RegistryError::UnknownProvider(name.to_string()))
    }

    /// Name of the provider used when none is given.
    #[must_use]
    pub fn default_name(&self) -> &str {
        &self.default
    }

    /// All providers, ordered by name.
    #[must_use]
    pub fn all(&self) -> Vec<&Arc<dyn PatchStoreProvider>> {
        let mut all: Vec<_> = self.providers.iter().collect();
        all.sort_by_key(|(name, _)| **name);
        all.into_iter().map(|(_, provider)| provider).collect()
    }
}

/// Directories under a server root, one per data source.
#[derive(Debug)]
pub struct FileProvider {
    root: PathBuf,
    cache_size: usize,
}

impl FileProvider {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, cache_size: usize) -> Self {
        Self {
            root: root.into(),
            cache_size,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn area(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn read_config(area: &Path) -> Result<SourceDescription, RegistryError> {
        let bytes = fs::read(area.join(SOURCE_CONFIG))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl PatchStoreProvider for FileProvider {
    fn name(&self) -> &'static str {
        PROVIDER_FILE
    }

    fn create(&self, desc: &SourceDescription) -> Result<PatchLog, RegistryError> {
        let area = self.area(&desc.name);
        if area.join(DISABLED_MARKER).exists() {
            return Err(RegistryError::Disabled(desc.name.clone()));
        }
        if area.exists() {
            return Err(RegistryError::Exists(desc.name.clone()));
        }
        fs::create_dir_all(&area)?;
        fs::write(area.join(SOURCE_CONFIG), serde_json::to_vec_pretty(desc)?)?;
        self.open(desc)
    }

    fn open(&self, desc: &SourceDescription) -> Result<PatchLog, RegistryError> {
        let store = FileStore::attach(self.area(&desc.name).join(LOG_DIR))?;
        Ok(PatchLog::attach_local(
            desc.name.clone(),
            Arc::new(store),
            self.cache_size,
        )?)
    }

    fn scan(&self) -> Result<Vec<SourceDescription>, RegistryError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut areas: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        areas.sort();

        let mut found = Vec::new();
        for area in areas {
            let dir_name = area
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !area.join(SOURCE_CONFIG).exists() {
                tracing::debug!("skipping {}: no {SOURCE_CONFIG}", area.display());
                continue;
            }
            if area.join(DISABLED_MARKER).exists() {
                tracing::info!("Datasource {dir_name} is disabled");
                continue;
            }
            let desc = match Self::read_config(&area) {
                Ok(desc) => desc,
                Err(e) => {
                    tracing::error!("bad {SOURCE_CONFIG} in {}: {e}", area.display());
                    continue;
                }
            };
            if desc.name != dir_name {
                tracing::error!(
                    "{}: configured name '{}' does not match directory name",
                    area.display(),
                    desc.name
                );
                continue;
            }
            found.push(desc);
        }
        Ok(found)
    }

    fn disable(&self, desc: &SourceDescription) -> Result<(), RegistryError> {
        fs::write(self.area(&desc.name).join(DISABLED_MARKER), b"")?;
        Ok(())
    }

    fn remove(&self, desc: &SourceDescription) -> Result<(), RegistryError> {
        let area = self.area(&desc.name);
        if area.exists() {
            fs::remove_dir_all(&area)?;
        }
        Ok(())
    }
}

/// Process-local logs.
#[derive(Debug)]
pub struct MemProvider {
    cache_size: usize,
}

impl MemProvider {
    #[must_use]
    pub const fn new(cache_size: usize) -> Self {
        Self { cache_size }
    }
}

impl PatchStoreProvider for MemProvider {
    fn name(&self) -> &'static str {
        PROVIDER_MEM
    }

    fn create(&self, desc: &SourceDescription) -> Result<PatchLog, RegistryError> {
        self.open(desc)
    }

    fn open(&self, desc: &SourceDescription) -> Result<PatchLog, RegistryError> {
        Ok(PatchLog::attach_local(
            desc.name.clone(),
            Arc::new(MemStore::new()),
            self.cache_size,
        )?)
    }

    fn scan(&self) -> Result<Vec<SourceDescription>, RegistryError> {
        Ok(Vec::new())
    }

    fn disable(&self, _desc: &SourceDescription) -> Result<(), RegistryError> {
        Ok(())
    }

    fn remove(&self, _desc: &SourceDescription) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// Record stores shared by every instance using the coordinated provider.
///
/// With a root directory each log gets a file store at `<root>/<name>`;
/// without one the stores live in memory, shared by handing the same
/// `SharedBodies` to each provider.
#[derive(Default)]
pub struct SharedBodies {
    root: Option<PathBuf>,
    stores: Mutex<HashMap<String, Arc<dyn RecordStore>>>,
}

impl SharedBodies {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_disk(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// The store holding bodies of the log `name`.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn store(&self, name: &str) -> Result<Arc<dyn RecordStore>, RegistryError> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| RegistryError::LockPoisoned)?;
        if let Some(store) = stores.get(name) {
            return Ok(Arc::clone(store));
        }
        let store: Arc<dyn RecordStore> = match &self.root {
            Some(root) => Arc::new(FileStore::attach(root.join(name))?),
            None => Arc::new(MemStore::new()),
        };
        stores.insert(name.to_string(), Arc::clone(&store));
        drop(stores);
        Ok(store)
    }

    fn remove(&self, name: &str) -> Result<(), RegistryError> {
        self.stores
            .lock()
            .map_err(|_| RegistryError::LockPoisoned)?
            .remove(name);
        if let Some(root) = &self.root {
            let dir = root.join(name);
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

/// Logs coordinated through a coordination service.
pub struct CoordinatedProvider {
    coord: Arc<dyn Coordinator>,
    bodies: Arc<SharedBodies>,
    lock_timeout: Duration,
    cache_size: usize,
}

impl CoordinatedProvider {
    #[must_use]
    pub fn new(
        coord: Arc<dyn Coordinator>,
        bodies: Arc<SharedBodies>,
        lock_timeout: Duration,
        cache_size: usize,
    ) -> Self {
        Self {
            coord,
            bodies,
            lock_timeout,
            cache_size,
        }
    }

    fn disabled_path(name: &str) -> String {
        format!("{}/{DISABLED_MARKER}", log_path(name))
    }
}

impl PatchStoreProvider for CoordinatedProvider {
    fn name(&self) -> &'static str {
        PROVIDER_ZK
    }

    fn create(&self, desc: &SourceDescription) -> Result<PatchLog, RegistryError> {
        if self.coord.fetch(&Self::disabled_path(&desc.name))?.is_some() {
            return Err(RegistryError::Disabled(desc.name.clone()));
        }
        let bytes = serde_json::to_vec(desc)?;
        match self.coord.create_node(&log_path(&desc.name), &bytes) {
            Ok(()) => {}
            Err(CoordError::NodeExists(_)) => return Err(RegistryError::Exists(desc.name.clone())),
            Err(e) => return Err(e.into()),
        }
        self.open(desc)
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn open(&self, desc: &SourceDescription) -> Result<PatchLog, RegistryError> {
        let store = self.bodies.store(&desc.name)?;
        Ok(PatchLog::coordinated(
            desc.name.clone(),
            store,
            Arc::clone(&self.coord),
            self.lock_timeout,
            self.cache_size,
        )?)
    }

    fn scan(&self) -> Result<Vec<SourceDescription>, RegistryError> {
        let mut found = Vec::new();
        for name in self.coord.children(LOGS_ROOT)? {
            if self.coord.fetch(&Self::disabled_path(&name))?.is_some() {
                tracing::info!("Datasource {name} is disabled");
                continue;
            }
            let Some(bytes) = self.coord.fetch(&log_path(&name))? else {
                continue;
            };
            match serde_json::from_slice::<SourceDescription>(&bytes) {
                Ok(desc) => found.push(desc),
                Err(e) => tracing::error!("bad description for log {name}: {e}"),
            }
        }
        Ok(found)
    }

    fn disable(&self, desc: &SourceDescription) -> Result<(), RegistryError> {
        self.coord.set_node(&Self::disabled_path(&desc.name), b"")?;
        Ok(())
    }

    fn remove(&self, desc: &SourceDescription) -> Result<(), RegistryError> {
        match self.coord.delete_node(&log_path(&desc.name)) {
            Ok(()) | Err(CoordError::NoNode(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.bodies.remove(&desc.name)
    }
}
