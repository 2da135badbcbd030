use std::sync::Arc;

pub mod api;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod reducer;
pub mod request;
pub mod session;
pub mod upload;

#[cfg(test)]
mod tests;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to load config: {0}")]
    Config(#[from] config::Error),
    #[error("Failed to open cache: {0}")]
    Cache(#[from] cache::BackendError),
    #[error("Failed to set up API client: {0}")]
    Api(#[from] api::Error),
}

/// Session over HTTP backed by the configured cache store.
pub type DefaultSession = session::Session<api::http::HttpApi, cache::Backend>;

pub async fn connect(
    config: &config::Config,
    reporter: Arc<dyn progress::ProgressReporter>,
) -> Result<DefaultSession, Error> {
    let api = api::http::HttpApi::new(&config.api)?;
    let cache = cache::Backend::open(&config.cache).await?;
    Ok(session::Session::new(api, cache, reporter, config.into()))
}
