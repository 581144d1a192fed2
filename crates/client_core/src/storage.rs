use std::collections::HashMap;

use async_trait::async_trait;
use shared::domain::JobHandle;
use tokio::sync::RwLock;

/// Key under which the current job handle lives in tab storage.
pub const JOB_HANDLE_KEY: &str = "userFolder";

#[async_trait]
pub trait HandleStore: Send + Sync {
    async fn load_handle(&self) -> Option<JobHandle>;
    async fn store_handle(&self, handle: JobHandle);
}

/// String key/value storage scoped to one client instance.
///
/// Contents disappear with the instance, like browser session storage
/// disappears with its tab.
#[derive(Debug, Default)]
pub struct TabStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl TabStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_item(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn set_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().await.insert(key.into(), value.into());
    }

    pub async fn remove_item(&self, key: &str) -> Option<String> {
        self.entries.write().await.remove(key)
    }
}

#[async_trait]
impl HandleStore for TabStorage {
    async fn load_handle(&self) -> Option<JobHandle> {
        self.get_item(JOB_HANDLE_KEY)
            .await
            .filter(|value| !value.is_empty())
            .map(JobHandle::new)
    }

    async fn store_handle(&self, handle: JobHandle) {
        self.set_item(JOB_HANDLE_KEY, handle.as_str()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_handle_replaces_previous_one() {
        let storage = TabStorage::new();
        assert_eq!(storage.load_handle().await, None);

        storage.store_handle(JobHandle::new("first")).await;
        storage.store_handle(JobHandle::new("second")).await;
        assert_eq!(storage.load_handle().await, Some(JobHandle::new("second")));
        assert_eq!(
            storage.get_item(JOB_HANDLE_KEY).await.as_deref(),
            Some("second")
        );

        assert_eq!(
            storage.remove_item(JOB_HANDLE_KEY).await.as_deref(),
            Some("second")
        );
        assert_eq!(storage.load_handle().await, None);
    }

    #[tokio::test]
    async fn empty_value_is_not_a_handle() {
        let storage = TabStorage::new();
        storage.set_item(JOB_HANDLE_KEY, "").await;
        assert_eq!(storage.load_handle().await, None);
    }
}
