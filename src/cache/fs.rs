//! One JSON file per key under a cache directory.

use std::path::{Path, PathBuf};

use tracing::{debug, error};

use super::Client;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create cache directory ({path}): {error}")]
    CreateDir { error: std::io::Error, path: PathBuf },
    #[error("failed to read cache file ({path}): {error}")]
    Read { error: std::io::Error, path: PathBuf },
    #[error("failed to write cache file ({path}): {error}")]
    Write { error: std::io::Error, path: PathBuf },
    #[error("failed to decode cache file ({path}): {error}")]
    Decode {
        error: serde_json::Error,
        path: PathBuf,
    },
    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),
}

pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Open the store, creating the directory when it does not exist.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|error| Error::CreateDir {
                    error,
                    path: dir.clone(),
                })
                .inspect_err(|error| error!(%error, "failed to initialize cache directory"))?;
            debug!(dir = %dir.display(), "cache directory created");
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf, Error> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\', '\0']);
        if !valid {
            return Err(Error::InvalidKey(key.into()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Client for FsStore {
    type Error = Error;

    async fn read(&self, key: &str) -> Result<Option<serde_json::Value>, Self::Error> {
        let path = self.path(key)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(Error::Read { error, path }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|error| Error::Decode { error, path })
    }

    async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), Self::Error> {
        let path = self.path(key)?;
        // the old document stays readable until the rename lands
        let staged = path.with_extension("json.tmp");
        tokio::fs::write(&staged, value.to_string())
            .await
            .map_err(|error| Error::Write {
                error,
                path: staged.clone(),
            })?;
        tokio::fs::rename(&staged, &path)
            .await
            .map_err(|error| Error::Write { error, path })
    }

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        let path = self.path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|error| Error::Read { error, path })
    }
}
