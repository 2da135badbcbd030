//! Registry of in-flight cancellable requests
//!
//! Each logical request id owns at most one live registration. Beginning a
//! request under an id that is already registered cancels the older one, so a
//! slow response for a superseded request can never be committed.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Prefixes of request ids that belong to the selected venue.
pub const SCOPED_PREFIXES: [&str; 3] = ["sections-", "images-", "data-"];

/// Prefix of section uploads; falls under the `images-` scope.
pub const UPLOAD_PREFIX: &str = "images-upload-";

struct Registration {
    generation: u64,
    token: CancellationToken,
}

/// Handle of one registered request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: String,
    generation: u64,
    token: CancellationToken,
}

impl RequestHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct RequestRegistry {
    alive: AtomicBool,
    next_generation: AtomicU64,
    requests: Mutex<HashMap<String, Registration>>,
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            next_generation: AtomicU64::new(0),
            requests: Mutex::new(HashMap::new()),
        }
    }

    fn requests(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `id`, cancelling whatever was in flight under the same id.
    /// After teardown the returned handle is already cancelled.
    pub fn begin(&self, id: impl Into<String>) -> RequestHandle {
        let id = id.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if !self.is_alive() {
            token.cancel();
            return RequestHandle {
                id,
                generation,
                token,
            };
        }
        let previous = self.requests().insert(
            id.clone(),
            Registration {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(request_id = %id, "cancel superseded request");
            previous.token.cancel();
        }
        trace!(request_id = %id, generation, "request registered");
        RequestHandle {
            id,
            generation,
            token,
        }
    }

    /// Whether a request is registered under `id` and not cancelled.
    pub fn is_active(&self, id: &str) -> bool {
        self.requests()
            .get(id)
            .is_some_and(|registration| !registration.token.is_cancelled())
    }

    /// Whether any live request id matches `predicate`.
    pub fn any_active(&self, predicate: impl Fn(&str) -> bool) -> bool {
        self.requests()
            .iter()
            .any(|(id, registration)| !registration.token.is_cancelled() && predicate(id))
    }

    /// Whether a continuation of `handle` may still commit its result.
    pub fn is_live(&self, handle: &RequestHandle) -> bool {
        self.is_alive() && !handle.is_cancelled()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Cancel and unregister every request whose id matches `predicate`.
    pub fn cancel_all(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut requests = self.requests();
        let ids = requests
            .keys()
            .filter(|id| predicate(id))
            .cloned()
            .collect::<Vec<_>>();
        for id in &ids {
            if let Some(registration) = requests.remove(id) {
                registration.token.cancel();
            }
        }
        if !ids.is_empty() {
            debug!(?ids, "requests cancelled");
        }
        ids.len()
    }

    /// Cancel the requests of the currently selected venue and section.
    pub fn cancel_scoped(&self) -> usize {
        self.cancel_all(|id| SCOPED_PREFIXES.iter().any(|prefix| id.starts_with(prefix)))
    }

    /// Unregister `handle` unless a newer request took its id over.
    pub fn end(&self, handle: &RequestHandle) {
        let mut requests = self.requests();
        if requests
            .get(&handle.id)
            .is_some_and(|registration| registration.generation == handle.generation)
        {
            requests.remove(&handle.id);
            trace!(request_id = %handle.id, "request finished");
        }
    }

    /// Cancel everything and refuse further commits.
    pub fn teardown(&self) {
        self.alive.store(false, Ordering::Release);
        let drained = self.requests().drain().collect::<Vec<_>>();
        for (_, registration) in &drained {
            registration.token.cancel();
        }
        debug!(count = drained.len(), "request registry torn down");
    }

    pub fn len(&self) -> usize {
        self.requests().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
