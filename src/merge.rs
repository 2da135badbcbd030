//! Reconciliation of server snapshots with offline records
//!
//! Offline records always win over server records with the same key: they
//! carry user intent the server has not seen yet. Offline records are tagged
//! `isNew: false` once merged.

use indexmap::IndexMap;

use crate::model::{Area, Keyed, Local};

fn settle<T: Local>(offline: Vec<T>) -> impl Iterator<Item = T> {
    offline.into_iter().map(|mut record| {
        record.set_new(false);
        record
    })
}

/// Server records followed by offline records, no deduplication.
pub fn concat<T: Local>(server: Vec<T>, offline: Vec<T>) -> Vec<T> {
    server.into_iter().chain(settle(offline)).collect()
}

/// Last write wins on the record key. A key keeps the position of its first
/// occurrence; offline records are applied after server records.
pub fn by_key<T: Keyed + Local>(server: Vec<T>, offline: Vec<T>) -> Vec<T> {
    let mut merged = IndexMap::<String, T>::new();
    for record in server.into_iter().chain(settle(offline)) {
        merged.insert(record.key().to_string(), record);
    }
    merged.into_values().collect()
}

/// Single content document: the first offline area laid over the first
/// server area.
pub fn overlay_first(server: Vec<Area>, offline: Vec<Area>) -> Vec<Area> {
    let server = server.into_iter().next();
    let offline = offline.into_iter().next();
    match (server, offline) {
        (None, None) => Vec::new(),
        (Some(server), None) => vec![server],
        (server, Some(offline)) => vec![server.unwrap_or_default().overlay(offline)],
    }
}
