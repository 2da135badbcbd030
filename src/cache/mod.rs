//! Local key to JSON document store
//!
//! Every entity collection owns two documents per scope: the last server
//! snapshot (online slot) and the records created on the device that the
//! server has not seen yet (offline slot).

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, error, warn};

use crate::{config::CacheConfig, model::Keyed};

pub mod fs;
pub mod memory;
pub mod sqlite;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub trait Client {
    type Error: std::fmt::Display;

    fn read(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, Self::Error>>;

    fn write(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, Self::Error>>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("file cache: {0}")]
    Fs(#[from] fs::Error),
    #[error("sqlite cache: {0}")]
    Sqlite(#[from] sqlx::Error),
}

/// Store selected by configuration.
pub enum Backend {
    Fs(FsStore),
    Sqlite(SqliteStore),
}

impl Backend {
    pub async fn open(config: &CacheConfig) -> Result<Self, BackendError> {
        match config {
            CacheConfig::Fs { dir } => Ok(Self::Fs(FsStore::open(dir).await?)),
            CacheConfig::Sqlite { url } => Ok(Self::Sqlite(SqliteStore::open(url).await?)),
        }
    }
}

impl Client for Backend {
    type Error = BackendError;

    async fn read(&self, key: &str) -> Result<Option<serde_json::Value>, Self::Error> {
        match self {
            Self::Fs(store) => Ok(store.read(key).await?),
            Self::Sqlite(store) => Ok(store.read(key).await?),
        }
    }

    async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), Self::Error> {
        match self {
            Self::Fs(store) => Ok(store.write(key, value).await?),
            Self::Sqlite(store) => Ok(store.write(key, value).await?),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        match self {
            Self::Fs(store) => Ok(store.exists(key).await?),
            Self::Sqlite(store) => Ok(store.exists(key).await?),
        }
    }
}

/// Entity collections fetched and cached independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Venues,
    Sections,
    Images,
    Data,
}

impl EntityKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Venues => "venues",
            Self::Sections => "sections",
            Self::Images => "images",
            Self::Data => "data",
        }
    }

    /// Cache keys of this collection for `scope`, or `None` when the scope
    /// lacks the parent ids the collection is namespaced by.
    pub fn slot(self, scope: &Scope) -> Option<CacheSlot> {
        let suffix = match (self, scope) {
            (Self::Venues, _) => String::new(),
            (Self::Sections, Scope::Venue { venue } | Scope::Section { venue, .. }) => {
                format!("_{venue}")
            }
            (Self::Images | Self::Data, Scope::Section { venue, section }) => {
                format!("_{venue}_{section}")
            }
            _ => return None,
        };
        Some(CacheSlot {
            online: format!("{}{suffix}", self.name()),
            offline: format!("offline_{}{suffix}", self.name()),
        })
    }

    /// Logical id of the fetch for this collection in `scope`. Only one fetch
    /// per id is ever in flight.
    pub fn request_id(self, scope: &Scope) -> String {
        match scope {
            Scope::Root => self.name().to_string(),
            Scope::Venue { venue } => format!("{}-{venue}", self.name()),
            Scope::Section { venue, section } => format!("{}-{venue}-{section}", self.name()),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parent ids namespacing a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Root,
    Venue { venue: String },
    Section { venue: String, section: String },
}

impl Scope {
    pub fn venue(venue: impl Into<String>) -> Self {
        Self::Venue {
            venue: venue.into(),
        }
    }

    pub fn section(venue: impl Into<String>, section: impl Into<String>) -> Self {
        Self::Section {
            venue: venue.into(),
            section: section.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSlot {
    pub online: String,
    pub offline: String,
}

/// Read a document, treating I/O and decode failures as a miss.
pub async fn read_document<C: Client, T: DeserializeOwned>(cache: &C, key: &str) -> Option<T> {
    let value = cache
        .read(key)
        .await
        .inspect_err(|error| error!(%error, key, "failed to read cache"))
        .ok()
        .flatten()?;
    serde_json::from_value(value)
        .inspect_err(|error| warn!(%error, key, "discard undecodable cache document"))
        .ok()
}

/// Read a record list; absent or unreadable documents are empty.
pub async fn read_records<C: Client, T: DeserializeOwned>(cache: &C, key: &str) -> Vec<T> {
    read_document(cache, key).await.unwrap_or_default()
}

/// Write a document. Returns whether the write landed.
pub async fn write_document<C: Client, T: Serialize + ?Sized>(
    cache: &C,
    key: &str,
    document: &T,
) -> bool {
    let value = match serde_json::to_value(document) {
        Ok(value) => value,
        Err(error) => {
            error!(%error, key, "failed to encode cache document");
            return false;
        }
    };
    cache
        .write(key, &value)
        .await
        .inspect(|()| debug!(key, "cache written"))
        .inspect_err(|error| error!(%error, key, "failed to write cache"))
        .is_ok()
}

/// Append the records of `items` whose key is not in the document yet.
pub async fn append_unique<C, T>(cache: &C, key: &str, items: &[T]) -> bool
where
    C: Client,
    T: Keyed + Clone + Serialize + DeserializeOwned,
{
    let mut existing = read_records::<_, T>(cache, key).await;
    let fresh = items
        .iter()
        .filter(|item| !existing.iter().any(|present| present.key() == item.key()))
        .cloned()
        .collect::<Vec<_>>();
    if fresh.is_empty() {
        return true;
    }
    existing.extend(fresh);
    write_document(cache, key, &existing).await
}
