//! Registry of active data sources.
//!
//! A data source is a named dataset with its own patch log. The registry
//! indexes the active ones by id, by name and by URI, and delegates their
//! storage to the provider named by each source's `log_type`.
//!
//! # Thread Safety
//!
//! All three indexes live behind one `RwLock`, so a lookup never sees a
//! source that is in one index but not another. Create, disable and remove
//! take the write lock; lookups take the read lock.
//!
//! # Invariants
//!
//! - Names and ids are unique among active sources
//! - A URI, when present, is unique among active sources
//! - Every name matches `^[A-Za-z0-9_$][A-Za-z0-9_$.-]*$`

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::coord::CoordError;
use crate::log::{LogError, PatchLog};
use crate::provider::ProviderRegistry;
use crate::storage::StoreError;
use crate::types::Id;

/// Errors from registry operations.
#[derive(Debug)]
pub enum RegistryError {
    BadName(String),
    UnknownProvider(String),
    Exists(String),
    NotFound(String),
    Disabled(String),
    Config(serde_json::Error),
    Io(std::io::Error),
    Log(LogError),
    LockPoisoned,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadName(name) => write!(f, "bad data source name: '{name}'"),
            Self::UnknownProvider(name) => write!(f, "unknown log type: '{name}'"),
            Self::Exists(what) => write!(f, "data source already exists: {what}"),
            Self::NotFound(what) => write!(f, "no such data source: {what}"),
            Self::Disabled(name) => write!(f, "data source is disabled: {name}"),
            Self::Config(e) => write!(f, "bad data source configuration: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Log(e) => write!(f, "{e}"),
            Self::LockPoisoned => write!(f, "registry lock poisoned"),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Log(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e)
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<LogError> for RegistryError {
    fn from(e: LogError) -> Self {
        Self::Log(e)
    }
}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        Self::Log(LogError::Store(e))
    }
}

impl From<CoordError> for RegistryError {
    fn from(e: CoordError) -> Self {
        Self::Log(LogError::Coordination(e))
    }
}

/// Whether `name` can name a data source.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$';
    word(first) && chars.all(|c| word(c) || c == '.' || c == '-')
}

/// The persisted description of a data source (`source.cfg`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescription {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub log_type: String,
}

/// An active data source and its log.
#[derive(Debug)]
pub struct DataSource {
    description: SourceDescription,
    log: Arc<PatchLog>,
}

impl DataSource {
    #[must_use]
    pub const fn description(&self) -> &SourceDescription {
        &self.description
    }

    #[must_use]
    pub const fn id(&self) -> &Id {
        &self.description.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.description.name
    }

    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.description.uri.as_deref()
    }

    #[must_use]
    pub const fn log(&self) -> &Arc<PatchLog> {
        &self.log
    }
}

#[derive(Default)]
struct Sources {
    by_id: HashMap<Id, Arc<DataSource>>,
    by_name: HashMap<String, Id>,
    by_uri: HashMap<String, Id>,
}

impl Sources {
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn insert(&mut self, source: &Arc<DataSource>) {
        let desc = source.description();
        self.by_name.insert(desc.name.clone(), desc.id.clone());
        if let Some(uri) = &desc.uri {
            self.by_uri.insert(uri.clone(), desc.id.clone());
        }
        self.by_id.insert(desc.id.clone(), Arc::clone(source));
    }

    fn remove(&mut self, id: &Id) -> Option<Arc<DataSource>> {
        let source = self.by_id.remove(id)?;
        self.by_name.remove(source.name());
        if let Some(uri) = source.uri() {
            self.by_uri.remove(uri);
        }
        Some(source)
    }

    fn check_free(&self, desc: &SourceDescription) -> Result<(), RegistryError> {
        if self.by_id.contains_key(&desc.id) {
            return Err(RegistryError::Exists(format!("id {}", desc.id)));
        }
        if self.by_name.contains_key(&desc.name) {
            return Err(RegistryError::Exists(format!("name {}", desc.name)));
        }
        if let Some(uri) = desc.uri.as_ref().filter(|uri| self.by_uri.contains_key(*uri)) {
            return Err(RegistryError::Exists(format!("uri {uri}")));
        }
        Ok(())
    }

    fn add(&mut self, description: SourceDescription, log: PatchLog) -> Arc<DataSource> {
        tracing::info!(
            "Register datasource: {} ({}) version {}",
            description.name,
            description.id,
            log.current_version()
                .map_or_else(|e| e.to_string(), |v| v.to_string())
        );
        let source = Arc::new(DataSource {
            description,
            log: Arc::new(log),
        });
        self.insert(&source);
        source
    }
}

/// Active data sources of this server.
pub struct DataRegistry {
    providers: ProviderRegistry,
    sources: RwLock<Sources>,
}

impl DataRegistry {
    /// A registry with no data sources.
    #[must_use]
    pub fn new(providers: ProviderRegistry) -> Self {
        Self {
            providers,
            sources: RwLock::new(Sources::default()),
        }
    }

    /// A registry holding every enabled data source the providers know of.
    ///
    /// A source that cannot be opened is logged and left out.
    pub fn attach(providers: ProviderRegistry) -> Result<Self, RegistryError> {
        let registry = Self::new(providers);
        for provider in registry.providers.all() {
            for desc in provider.scan()? {
                let log = match provider.open(&desc) {
                    Ok(log) => log,
                    Err(e) => {
                        tracing::error!("Failed to open datasource {}: {e}", desc.name);
                        continue;
                    }
                };
                if let Err(e) = registry.register(desc, log) {
                    tracing::error!("Failed to register datasource: {e}");
                }
            }
        }
        Ok(registry)
    }

    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    fn register(
        &self,
        description: SourceDescription,
        log: PatchLog,
    ) -> Result<Arc<DataSource>, RegistryError> {
        let mut sources = self
            .sources
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;
        sources.check_free(&description)?;
        let source = sources.add(description, log);
        drop(sources);
        Ok(source)
    }

    /// Create a new data source.
    ///
    /// `log_type` defaults to the registry's default provider.
    ///
    /// # Errors
    ///
    /// - `RegistryError::BadName` if `name` is not a valid name
    /// - `RegistryError::UnknownProvider` for an unknown `log_type`
    /// - `RegistryError::Exists` if the name, URI or storage area is taken
    /// - `RegistryError::Disabled` if a disabled area has the name
    #[allow(clippy::significant_drop_tightening)] // The lock is held across storage creation
    pub fn create(
        &self,
        name: &str,
        uri: Option<&str>,
        log_type: Option<&str>,
    ) -> Result<Arc<DataSource>, RegistryError> {
        if !is_valid_name(name) {
            return Err(RegistryError::BadName(name.to_string()));
        }
        let log_type = log_type.unwrap_or_else(|| self.providers.default_name());
        let provider = self.providers.get(log_type)?;
        let description = SourceDescription {
            id: Id::new(),
            name: name.to_string(),
            uri: uri.map(ToString::to_string),
            log_type: provider.name().to_string(),
        };

        let mut sources = self
            .sources
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;
        sources.check_free(&description)?;
        let log = provider.create(&description)?;
        Ok(sources.add(description, log))
    }

    /// Take a data source out of service, keeping its history in storage.
    pub fn disable(&self, id: &Id) -> Result<(), RegistryError> {
        let source = self.take(id)?;
        self.providers
            .get(&source.description().log_type)?
            .disable(source.description())?;
        tracing::info!("Disabled datasource {}", source.name());
        Ok(())
    }

    /// Remove a data source and retire its storage.
    pub fn remove(&self, id: &Id) -> Result<(), RegistryError> {
        let source = self.take(id)?;
        self.providers
            .get(&source.description().log_type)?
            .remove(source.description())?;
        tracing::info!("Removed datasource {}", source.name());
        Ok(())
    }

    fn take(&self, id: &Id) -> Result<Arc<DataSource>, RegistryError> {
        self.sources
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn get_by_id(&self, id: &Id) -> Result<Option<Arc<DataSource>>, RegistryError> {
        let sources = self
            .sources
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?;
        Ok(sources.by_id.get(id).map(Arc::clone))
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn get_by_name(&self, name: &str) -> Result<Option<Arc<DataSource>>, RegistryError> {
        let sources = self
            .sources
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?;
        Ok(sources
            .by_name
            .get(name)
            .and_then(|id| sources.by_id.get(id))
            .map(Arc::clone))
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn get_by_uri(&self, uri: &str) -> Result<Option<Arc<DataSource>>, RegistryError> {
        let sources = self
            .sources
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?;
        Ok(sources
            .by_uri
            .get(uri)
            .and_then(|id| sources.by_id.get(id))
            .map(Arc::clone))
    }

    /// Find a data source by name, then by id, then by URI.
    pub fn resolve(&self, key: &str) -> Result<Option<Arc<DataSource>>, RegistryError> {
        if let Some(source) = self.get_by_name(key)? {
            return Ok(Some(source));
        }
        if let Some(source) = self.get_by_id(&Id::from_string(key))? {
            return Ok(Some(source));
        }
        self.get_by_uri(key)
    }

    /// Descriptions of all active sources, sorted by name.
    pub fn list(&self) -> Result<Vec<SourceDescription>, RegistryError> {
        let sources = self
            .sources
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?;
        let mut list: Vec<SourceDescription> = sources
            .by_id
            .values()
            .map(|source| source.description().clone())
            .collect();
        drop(sources);
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    pub fn len(&self) -> Result<usize, RegistryError> {
        Ok(self
            .sources
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?
            .by_id
            .len())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len()? == 0)
    }
}
