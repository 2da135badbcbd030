use std::{collections::HashMap, convert::Infallible};

use super::Client;

/// In-process store. Contents are lost when the value is dropped.
#[derive(Default)]
pub struct MemoryStore {
    map: tokio::sync::Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub async fn keys(&self) -> Vec<String> {
        let mut keys = self.map.lock().await.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }
}

impl Client for MemoryStore {
    type Error = Infallible;

    async fn read(&self, key: &str) -> Result<Option<serde_json::Value>, Self::Error> {
        Ok(self.map.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), Self::Error> {
        self.map.lock().await.insert(key.into(), value.clone());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.map.lock().await.contains_key(key))
    }
}
