//! Batch upload of pending images with per-item retry
//!
//! Items are drained in sequential batches; the items of one batch upload
//! concurrently. A failed attempt is retried after an exponential backoff
//! until the retry budget is spent, after which the item is `failed`.

use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::UploadConfig,
    model::{SectionImage, UploadStatus},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub batch_size: usize,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        (&UploadConfig::default()).into()
    }
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.retry_delay_ms),
            max_backoff: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl UploadPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.max_backoff)
    }
}

/// One image queued for upload, addressed by its position in the section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub index: usize,
    pub path: String,
    pub mime_type: String,
    pub status: UploadStatus,
}

impl UploadItem {
    /// Pending images of a section, in section order.
    pub fn pending(images: &[SectionImage]) -> Vec<Self> {
        images
            .iter()
            .enumerate()
            .filter(|(_, image)| image.is_pending())
            .map(|(index, image)| Self {
                index,
                path: image.path.clone(),
                mime_type: image.mime_type.clone(),
                status: UploadStatus::Pending,
            })
            .collect()
    }

    pub fn file_name(&self) -> String {
        format!("{}.jpg", self.index + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Success,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub index: usize,
    pub outcome: UploadOutcome,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub items: Vec<ItemReport>,
}

impl UploadReport {
    fn count(&self, outcome: UploadOutcome) -> usize {
        self.items
            .iter()
            .filter(|item| item.outcome == outcome)
            .count()
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(UploadOutcome::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(UploadOutcome::Failed)
    }

    pub fn cancelled(&self) -> usize {
        self.count(UploadOutcome::Cancelled)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        !self.is_empty() && self.succeeded() == self.total()
    }

    pub fn succeeded_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.items
            .iter()
            .filter(|item| item.outcome == UploadOutcome::Success)
            .map(|item| item.index)
    }
}

pub trait Uploader {
    type Error: std::fmt::Display;

    fn upload(
        &self,
        item: &UploadItem,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

/// Receives every status transition as soon as it happens.
pub trait UploadSink {
    fn status(&self, index: usize, status: UploadStatus);

    fn batch_settled(&self, succeeded: usize, total: usize);
}

async fn upload_one<U: Uploader, S: UploadSink>(
    item: &UploadItem,
    policy: &UploadPolicy,
    cancel: &CancellationToken,
    uploader: &U,
    sink: &S,
) -> ItemReport {
    let report = |outcome, attempts| ItemReport {
        index: item.index,
        outcome,
        attempts,
    };
    if cancel.is_cancelled() {
        return report(UploadOutcome::Cancelled, 0);
    }
    sink.status(item.index, UploadStatus::Uploading);

    let mut attempts = 0;
    loop {
        if cancel.is_cancelled() {
            return report(UploadOutcome::Cancelled, attempts);
        }
        attempts += 1;
        match uploader.upload(item, cancel).await {
            Ok(()) if cancel.is_cancelled() => {
                return report(UploadOutcome::Cancelled, attempts);
            }
            Ok(()) => {
                debug!(index = item.index, attempts, "image uploaded");
                sink.status(item.index, UploadStatus::Success);
                return report(UploadOutcome::Success, attempts);
            }
            Err(_) if cancel.is_cancelled() => {
                return report(UploadOutcome::Cancelled, attempts);
            }
            Err(error) if attempts > policy.max_retries => {
                error!(%error, index = item.index, attempts, "image upload failed, retries exhausted");
                sink.status(item.index, UploadStatus::Failed);
                return report(UploadOutcome::Failed, attempts);
            }
            Err(error) => {
                let delay = policy.backoff(attempts);
                warn!(
                    %error,
                    index = item.index,
                    attempts,
                    backoff_ms = delay.as_millis() as u64,
                    "image upload failed, will retry after backoff"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return report(UploadOutcome::Cancelled, attempts),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Upload the `pending` items of `items`.
///
/// An empty queue returns an empty report without touching `sink`.
pub async fn upload_pending<U: Uploader, S: UploadSink>(
    items: &[UploadItem],
    policy: &UploadPolicy,
    cancel: &CancellationToken,
    uploader: &U,
    sink: &S,
) -> UploadReport {
    let pending = items
        .iter()
        .filter(|item| item.status == UploadStatus::Pending)
        .collect::<Vec<_>>();
    let total = pending.len();
    let mut report = UploadReport::default();
    if total == 0 {
        return report;
    }
    info!(total, batch_size = policy.batch_size, "uploading pending images");

    let mut succeeded = 0;
    for batch in pending.chunks(policy.batch_size.max(1)) {
        let results = join_all(
            batch
                .iter()
                .map(|item| upload_one(item, policy, cancel, uploader, sink)),
        )
        .await;
        succeeded += results
            .iter()
            .filter(|item| item.outcome == UploadOutcome::Success)
            .count();
        report.items.extend(results);
        if !cancel.is_cancelled() {
            sink.batch_settled(succeeded, total);
        }
    }
    info!(
        total,
        succeeded = report.succeeded(),
        failed = report.failed(),
        cancelled = report.cancelled(),
        "upload finished"
    );
    report
}
