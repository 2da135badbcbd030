//! Fetch, cache and merge of one entity collection
//!
//! A fetch never fails from the caller's point of view: network failures fall
//! back to the cached server snapshot and the merged collection is dispatched
//! into the store unless the request was superseded in the meantime.

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    api,
    cache::{self, CacheSlot, EntityKind, Scope},
    merge,
    model::{Area, Section, SectionImage, Venue},
    progress::{Level, ProgressReporter, SyncPhase},
    reducer::{Action, LoadingPatch, Store},
    request::{RequestHandle, RequestRegistry},
};

/// A cached, mergeable record collection.
pub trait Entity: Serialize + DeserializeOwned + Clone {
    const KIND: EntityKind;

    fn merge(server: Vec<Self>, offline: Vec<Self>) -> Vec<Self>;

    fn into_action(records: Vec<Self>) -> Action;
}

impl Entity for Venue {
    const KIND: EntityKind = EntityKind::Venues;

    fn merge(server: Vec<Self>, offline: Vec<Self>) -> Vec<Self> {
        merge::concat(server, offline)
    }

    fn into_action(records: Vec<Self>) -> Action {
        Action::SetVenues(records)
    }
}

impl Entity for Section {
    const KIND: EntityKind = EntityKind::Sections;

    fn merge(server: Vec<Self>, offline: Vec<Self>) -> Vec<Self> {
        merge::by_key(server, offline)
    }

    fn into_action(records: Vec<Self>) -> Action {
        Action::SetSections(records)
    }
}

impl Entity for SectionImage {
    const KIND: EntityKind = EntityKind::Images;

    fn merge(server: Vec<Self>, offline: Vec<Self>) -> Vec<Self> {
        merge::concat(server, offline)
    }

    fn into_action(records: Vec<Self>) -> Action {
        Action::SetSectionImages(records)
    }
}

impl Entity for Area {
    const KIND: EntityKind = EntityKind::Data;

    fn merge(server: Vec<Self>, offline: Vec<Self>) -> Vec<Self> {
        merge::overlay_first(server, offline)
    }

    fn into_action(records: Vec<Self>) -> Action {
        Action::SetSectionData(records)
    }
}

pub fn loading(kind: EntityKind, value: bool) -> LoadingPatch {
    match kind {
        EntityKind::Venues => LoadingPatch::venues(value),
        EntityKind::Sections => LoadingPatch::sections(value),
        EntityKind::Images => LoadingPatch::images(value),
        EntityKind::Data => LoadingPatch::data(value),
    }
}

pub struct FetchPipeline<'a, C> {
    pub cache: &'a C,
    pub requests: &'a RequestRegistry,
    pub store: &'a Store,
    pub reporter: &'a dyn ProgressReporter,
    pub online: bool,
}

impl<C: cache::Client> FetchPipeline<'_, C> {
    /// Fetch `E` for `scope` and dispatch the merged collection.
    ///
    /// Returns the committed collection, or `None` when nothing was committed
    /// because the request was superseded or the registry torn down.
    pub async fn fetch_entity<E, F, Fut>(
        &self,
        scope: &Scope,
        should_fetch_online: bool,
        online_fetch: F,
    ) -> Option<Vec<E>>
    where
        E: Entity,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<Vec<E>, api::Error>>,
    {
        if !self.requests.is_alive() {
            return None;
        }
        let Some(slot) = E::KIND.slot(scope) else {
            warn!(kind = %E::KIND, ?scope, "scope lacks the ids this collection is keyed by");
            return None;
        };
        let handle = self.requests.begin(E::KIND.request_id(scope));
        self.store
            .dispatch(Action::SetLoading(loading(E::KIND, true)));
        self.reporter.set_phase(SyncPhase::Fetching(E::KIND));

        let merged = self
            .reconcile(&handle, &slot, should_fetch_online, online_fetch)
            .await;

        // whoever cancelled this request owns the loading flag now
        if self.requests.is_live(&handle) {
            self.store
                .dispatch(Action::SetLoading(loading(E::KIND, false)));
        }
        self.requests.end(&handle);
        merged
    }

    async fn reconcile<E, F, Fut>(
        &self,
        handle: &RequestHandle,
        slot: &CacheSlot,
        should_fetch_online: bool,
        online_fetch: F,
    ) -> Option<Vec<E>>
    where
        E: Entity,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<Vec<E>, api::Error>>,
    {
        let kind = E::KIND;
        let server = if should_fetch_online && self.online {
            let fetched = online_fetch(handle.token().clone()).await;
            if !self.requests.is_live(handle) {
                debug!(request_id = handle.id(), "drop superseded response");
                return None;
            }
            match fetched {
                Ok(records) => {
                    cache::write_document(self.cache, &slot.online, &records).await;
                    records
                }
                Err(api::Error::Cancelled) => return None,
                Err(error @ (api::Error::Rejected(_) | api::Error::Malformed(_))) => {
                    warn!(%error, %kind, "server returned no usable records");
                    Vec::new()
                }
                Err(error) => {
                    error!(%error, %kind, "failed to fetch from server, using cached snapshot");
                    self.reporter
                        .notify(Level::Error, &format!("Failed to load {kind}. Please try again."));
                    cache::read_records(self.cache, &slot.online).await
                }
            }
        } else {
            cache::read_records(self.cache, &slot.online).await
        };
        if !self.requests.is_live(handle) {
            return None;
        }

        let offline = cache::read_records(self.cache, &slot.offline).await;
        if !self.requests.is_live(handle) {
            return None;
        }

        let merged = E::merge(server, offline);
        debug!(%kind, count = merged.len(), "collection merged");
        self.store.dispatch(E::into_action(merged.clone()));
        Some(merged)
    }
}
