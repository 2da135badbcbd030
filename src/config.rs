use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config ({path:?}): {error}")]
    Read {
        error: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse config: {0}")]
    Parse(serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_batch_size() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_edit_debounce_ms() -> u64 {
    500
}

fn default_online() -> bool {
    true
}

/// Paths of the remote operations, relative to `base_url`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Endpoints {
    pub venues: String,
    pub sections: String,
    pub section_images: String,
    pub section_data: String,
    pub prompt: String,
    pub update_prompt: String,
    pub upload_image: String,
    pub save_content: String,
    pub generate_content: String,
    pub rename_section_folder: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            venues: "/api/venues".into(),
            sections: "/api/sections".into(),
            section_images: "/api/section-images".into(),
            section_data: "/api/section-data".into(),
            prompt: "/api/prompt".into(),
            update_prompt: "/api/update-prompt".into(),
            upload_image: "/api/upload-image".into(),
            save_content: "/api/upload".into(),
            generate_content: "/api/generate-visual".into(),
            rename_section_folder: "/api/rename-section-folder".into(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ApiConfig {
    pub base_url: url::Url,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheConfig {
    Fs { dir: PathBuf },
    Sqlite { url: String },
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::Fs {
            dir: PathBuf::from(".venue-sync"),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default = "default_edit_debounce_ms")]
    pub edit_debounce_ms: u64,
    #[serde(default = "default_online")]
    pub online: bool,
}

impl Config {
    pub fn from_yaml(src: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(src).map_err(Error::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, Error> {
        let src = tokio::fs::read_to_string(path)
            .await
            .map_err(|error| Error::Read {
                error,
                path: path.to_owned(),
            })
            .inspect_err(|error| error!(%error, "failed to read config"))?;
        let config = Self::from_yaml(&src)?;
        debug!(path = %path.display(), base_url = %config.api.base_url, "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.api.base_url.scheme(), "http" | "https") {
            return Err(Error::Invalid(format!(
                "api.base_url must be http(s): {}",
                self.api.base_url
            )));
        }
        if self.api.timeout_secs == 0 {
            return Err(Error::Invalid("api.timeout_secs must be positive".into()));
        }
        if self.upload.batch_size == 0 {
            return Err(Error::Invalid("upload.batch_size must be positive".into()));
        }
        if self.upload.retry_delay_ms > self.upload.max_delay_ms {
            return Err(Error::Invalid(
                "upload.retry_delay_ms must not exceed upload.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn edit_debounce(&self) -> Duration {
        Duration::from_millis(self.edit_debounce_ms)
    }
}
