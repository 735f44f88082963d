use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::storage::Storage;

/// Storage key of the full working set shown on the page
pub const ALL_SOURCES_KEY: &str = "allRssSources";
/// Storage key of the user-added subset
pub const CUSTOM_SOURCES_KEY: &str = "customRssSources";

/// A named, URL-identified feed subscription.
///
/// `url` is the identity: no two records in a collection share it.
/// `is_preset` is just an attribute of whichever record currently holds the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default)]
    pub is_preset: bool,
}

/// User input for a new source, as submitted from the settings form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSource {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub website: String,
}

impl NewSource {
    pub fn new(name: &str, url: &str, website: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            website: website.to_string(),
        }
    }

    /// Trim and check the fields, producing a user-owned record
    pub fn validate(&self) -> Result<FeedSource, SourceError> {
        let name = self.name.trim();
        let url = self.url.trim();
        let website = self.website.trim();

        if name.is_empty() || url.is_empty() || website.is_empty() {
            return Err(SourceError::Validation(
                "name, feed URL and website are all required".to_string(),
            ));
        }

        if Url::parse(url).is_err() || Url::parse(website).is_err() {
            return Err(SourceError::Validation(
                "feed URL and website must be valid URLs".to_string(),
            ));
        }

        Ok(FeedSource {
            name: name.to_string(),
            url: url.to_string(),
            website: Some(website.to_string()),
            is_preset: false,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid source: {0}")]
    Validation(String),
    #[error("source already exists: {0}")]
    Duplicate(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Owns the persisted list of feed sources. All mutations go through here.
pub struct SourceStore {
    storage: Arc<dyn Storage>,
    presets: Vec<FeedSource>,
}

impl SourceStore {
    pub fn new(storage: Arc<dyn Storage>, presets: Vec<FeedSource>) -> Self {
        Self { storage, presets }
    }

    pub fn presets(&self) -> &[FeedSource] {
        &self.presets
    }

    /// Current snapshot. Built from presets and the custom list when nothing
    /// usable is stored; only a missing snapshot is written back.
    pub async fn load(&self) -> Result<Vec<FeedSource>, SourceError> {
        match self.storage.get(ALL_SOURCES_KEY).await? {
            Some(raw) => match serde_json::from_str::<Vec<FeedSource>>(&raw) {
                Ok(sources) => Ok(sources),
                Err(e) => {
                    warn!("Stored source snapshot is corrupt, rebuilding: {}", e);
                    self.rebuild().await
                }
            },
            None => {
                let sources = self.rebuild().await?;
                self.write(ALL_SOURCES_KEY, &sources).await?;
                info!("Initialized source snapshot with {} sources", sources.len());
                Ok(sources)
            }
        }
    }

    /// User-added sources. A corrupt list reads as empty.
    pub async fn custom_sources(&self) -> Result<Vec<FeedSource>, SourceError> {
        let Some(raw) = self.storage.get(CUSTOM_SOURCES_KEY).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<FeedSource>>(&raw) {
            Ok(sources) => Ok(sources),
            Err(e) => {
                warn!("Stored custom sources are corrupt, ignoring: {}", e);
                Ok(Vec::new())
            }
        }
    }

    pub async fn add(&self, candidate: NewSource) -> Result<Vec<FeedSource>, SourceError> {
        let source = candidate.validate()?;

        let mut snapshot = self.load().await?;
        if snapshot.iter().any(|s| s.url == source.url) {
            return Err(SourceError::Duplicate(source.url));
        }

        // Custom list first: if the snapshot write fails, retrying the add
        // passes the duplicate check and replaces the orphaned custom record
        let mut custom = self.custom_sources().await?;
        custom.retain(|s| s.url != source.url);
        custom.push(source.clone());
        self.write(CUSTOM_SOURCES_KEY, &custom).await?;

        info!("Added source '{}' ({})", source.name, source.url);
        snapshot.push(source);
        self.write(ALL_SOURCES_KEY, &snapshot).await?;

        Ok(snapshot)
    }

    /// Removing an unknown URL is a no-op
    pub async fn remove(&self, url: &str) -> Result<Vec<FeedSource>, SourceError> {
        let snapshot = self.load().await?;
        let removed = snapshot.iter().find(|s| s.url == url).cloned();
        let remaining: Vec<FeedSource> = snapshot.into_iter().filter(|s| s.url != url).collect();
        self.write(ALL_SOURCES_KEY, &remaining).await?;

        if let Some(source) = removed {
            if !source.is_preset {
                let mut custom = self.custom_sources().await?;
                custom.retain(|s| s.url != url);
                self.write(CUSTOM_SOURCES_KEY, &custom).await?;
            }
            info!("Removed source '{}' ({})", source.name, source.url);
        }

        Ok(remaining)
    }

    /// Forget every user change. The next `load` starts from presets only.
    pub async fn restore_defaults(&self) -> Result<Vec<FeedSource>, SourceError> {
        self.storage.remove(CUSTOM_SOURCES_KEY).await?;
        self.storage.remove(ALL_SOURCES_KEY).await?;
        info!("Restored default sources");
        Ok(self.presets().to_vec())
    }

    // Presets followed by custom sources; a custom record takes over a preset's URL
    async fn rebuild(&self) -> Result<Vec<FeedSource>, SourceError> {
        let custom = self.custom_sources().await?;
        let mut sources: Vec<FeedSource> = self
            .presets
            .iter()
            .filter(|preset| !custom.iter().any(|c| c.url == preset.url))
            .cloned()
            .collect();
        sources.extend(custom);
        Ok(sources)
    }

    async fn write(&self, key: &str, sources: &[FeedSource]) -> Result<(), SourceError> {
        let raw = serde_json::to_string(sources).map_err(anyhow::Error::from)?;
        self.storage.set(key, &raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn preset(name: &str, url: &str) -> FeedSource {
        FeedSource {
            name: name.to_string(),
            url: url.to_string(),
            website: Some(format!("{}/", url)),
            is_preset: true,
        }
    }

    fn presets() -> Vec<FeedSource> {
        vec![
            preset("Alpha", "https://alpha.test/feed"),
            preset("Beta", "https://beta.test/feed"),
        ]
    }

    fn create_store(presets: Vec<FeedSource>) -> (SourceStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let store = SourceStore::new(storage.clone(), presets);
        (store, storage)
    }

    fn candidate() -> NewSource {
        NewSource::new("Test", "https://x.test/feed", "https://x.test/")
    }

    mod validation_tests {
        use super::*;

        #[test]
        fn test_valid_candidate() {
            let source = candidate().validate().unwrap();
            assert_eq!(source.name, "Test");
            assert_eq!(source.url, "https://x.test/feed");
            assert_eq!(source.website.as_deref(), Some("https://x.test/"));
            assert!(!source.is_preset);
        }

        #[test]
        fn test_fields_are_trimmed() {
            let source = NewSource::new("  Test ", " https://x.test/feed\n", "\thttps://x.test/ ")
                .validate()
                .unwrap();
            assert_eq!(source.name, "Test");
            assert_eq!(source.url, "https://x.test/feed");
            assert_eq!(source.website.as_deref(), Some("https://x.test/"));
        }

        #[test]
        fn test_empty_fields_rejected() {
            for c in [
                NewSource::new("", "https://x.test/feed", "https://x.test/"),
                NewSource::new("Test", "   ", "https://x.test/"),
                NewSource::new("Test", "https://x.test/feed", ""),
            ] {
                assert!(matches!(c.validate(), Err(SourceError::Validation(_))));
            }
        }

        #[test]
        fn test_invalid_urls_rejected() {
            let bad_url = NewSource::new("Test", "not a url", "https://x.test/");
            assert!(matches!(bad_url.validate(), Err(SourceError::Validation(_))));

            let bad_website = NewSource::new("Test", "https://x.test/feed", "x.test");
            assert!(matches!(
                bad_website.validate(),
                Err(SourceError::Validation(_))
            ));
        }
    }

    mod serialization_tests {
        use super::*;

        #[test]
        fn test_uses_camel_case_flag() {
            let json = serde_json::to_string(&presets()[0]).unwrap();
            assert!(json.contains("\"isPreset\":true"));
        }

        #[test]
        fn test_missing_optional_fields() {
            let parsed: Vec<FeedSource> =
                serde_json::from_str(r#"[{"name":"A","url":"https://a.test/rss"}]"#).unwrap();
            assert_eq!(parsed[0].website, None);
            assert!(!parsed[0].is_preset);
        }
    }

    mod load_tests {
        use super::*;

        #[tokio::test]
        async fn test_first_load_persists_presets() {
            let (store, storage) = create_store(presets());

            let sources = store.load().await.unwrap();
            assert_eq!(sources, presets());

            let raw = storage.get(ALL_SOURCES_KEY).await.unwrap().unwrap();
            let stored: Vec<FeedSource> = serde_json::from_str(&raw).unwrap();
            assert_eq!(stored, presets());
        }

        #[tokio::test]
        async fn test_first_load_merges_custom_list() {
            let (store, storage) = create_store(presets());
            let custom = vec![candidate().validate().unwrap()];
            storage
                .set(CUSTOM_SOURCES_KEY, &serde_json::to_string(&custom).unwrap())
                .await
                .unwrap();

            let sources = store.load().await.unwrap();
            assert_eq!(sources.len(), 3);
            assert_eq!(sources[2].url, "https://x.test/feed");
            assert!(!sources[2].is_preset);
        }

        #[tokio::test]
        async fn test_corrupt_snapshot_rebuilds_without_writing() {
            let (store, storage) = create_store(presets());
            storage.set(ALL_SOURCES_KEY, "{not json").await.unwrap();

            let sources = store.load().await.unwrap();
            assert_eq!(sources, presets());

            // The corrupt value is left alone
            assert_eq!(
                storage.get(ALL_SOURCES_KEY).await.unwrap().as_deref(),
                Some("{not json")
            );
        }

        #[tokio::test]
        async fn test_corrupt_custom_list_reads_as_empty() {
            let (store, storage) = create_store(presets());
            storage.set(CUSTOM_SOURCES_KEY, "[[[").await.unwrap();

            assert!(store.custom_sources().await.unwrap().is_empty());
            assert_eq!(store.load().await.unwrap(), presets());
        }

        #[tokio::test]
        async fn test_rebuild_keeps_urls_unique() {
            let (store, storage) = create_store(presets());
            let mut reused = candidate().validate().unwrap();
            reused.url = "https://alpha.test/feed".to_string();
            storage
                .set(
                    CUSTOM_SOURCES_KEY,
                    &serde_json::to_string(&vec![reused.clone()]).unwrap(),
                )
                .await
                .unwrap();

            let sources = store.load().await.unwrap();
            assert_eq!(sources.len(), 2);
            assert_eq!(sources[0].url, "https://beta.test/feed");
            assert_eq!(sources[1], reused);
        }
    }

    mod add_tests {
        use super::*;

        #[tokio::test]
        async fn test_add_to_empty_store() {
            let (store, _storage) = create_store(vec![]);

            let snapshot = store.add(candidate()).await.unwrap();
            assert_eq!(snapshot.len(), 1);

            let loaded = store.load().await.unwrap();
            assert_eq!(loaded, vec![candidate().validate().unwrap()]);
            assert!(!loaded[0].is_preset);
        }

        #[tokio::test]
        async fn test_duplicate_is_rejected_without_changes() {
            let (store, _storage) = create_store(vec![]);
            store.add(candidate()).await.unwrap();

            let result = store.add(candidate()).await;
            assert!(matches!(result, Err(SourceError::Duplicate(ref url)) if url == "https://x.test/feed"));

            assert_eq!(store.load().await.unwrap().len(), 1);
            assert_eq!(store.custom_sources().await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_duplicate_of_preset() {
            let (store, _storage) = create_store(presets());
            let before = store.load().await.unwrap();

            let clash = NewSource::new("Other", "https://alpha.test/feed", "https://alpha.test/");
            assert!(matches!(
                store.add(clash).await,
                Err(SourceError::Duplicate(_))
            ));

            assert_eq!(store.load().await.unwrap(), before);
            assert!(store.custom_sources().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_add_appends_exactly_one_record() {
            let (store, _storage) = create_store(presets());
            let before = store.load().await.unwrap();

            store.add(candidate()).await.unwrap();

            let after = store.load().await.unwrap();
            assert_eq!(after.len(), before.len() + 1);
            assert_eq!(&after[..before.len()], &before[..]);
            assert_eq!(after.last().unwrap(), &candidate().validate().unwrap());
            assert_eq!(
                store.custom_sources().await.unwrap(),
                vec![candidate().validate().unwrap()]
            );
        }

        #[tokio::test]
        async fn test_invalid_candidate_changes_nothing() {
            let (store, storage) = create_store(presets());

            let result = store.add(NewSource::new("", "https://x.test/feed", "")).await;
            assert!(matches!(result, Err(SourceError::Validation(_))));

            assert!(storage.get(ALL_SOURCES_KEY).await.unwrap().is_none());
            assert!(storage.get(CUSTOM_SOURCES_KEY).await.unwrap().is_none());
        }
    }

    mod failed_write_tests {
        use super::*;
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicBool, Ordering};

        /// Memory storage whose snapshot writes can be made to fail
        #[derive(Default)]
        struct SnapshotFailStorage {
            inner: MemoryStorage,
            fail_snapshot: AtomicBool,
        }

        #[async_trait]
        impl Storage for SnapshotFailStorage {
            async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
                self.inner.get(key).await
            }

            async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
                if key == ALL_SOURCES_KEY && self.fail_snapshot.load(Ordering::SeqCst) {
                    anyhow::bail!("disk full");
                }
                self.inner.set(key, value).await
            }

            async fn remove(&self, key: &str) -> anyhow::Result<()> {
                self.inner.remove(key).await
            }
        }

        #[tokio::test]
        async fn test_retry_after_failed_snapshot_write() {
            let storage = Arc::new(SnapshotFailStorage::default());
            let store = SourceStore::new(storage.clone(), presets());
            store.load().await.unwrap();

            storage.fail_snapshot.store(true, Ordering::SeqCst);
            assert!(matches!(
                store.add(candidate()).await,
                Err(SourceError::Storage(_))
            ));
            assert_eq!(store.load().await.unwrap(), presets());

            storage.fail_snapshot.store(false, Ordering::SeqCst);
            let snapshot = store.add(candidate()).await.unwrap();

            assert_eq!(snapshot.len(), presets().len() + 1);
            assert_eq!(store.load().await.unwrap(), snapshot);
            assert_eq!(
                store.custom_sources().await.unwrap(),
                vec![candidate().validate().unwrap()]
            );
        }
    }

    mod remove_tests {
        use super::*;

        #[tokio::test]
        async fn test_remove_preset_keeps_custom_list() {
            let (store, _storage) = create_store(presets());
            store.add(candidate()).await.unwrap();

            let snapshot = store.remove("https://alpha.test/feed").await.unwrap();
            assert_eq!(snapshot.len(), 2);
            assert!(snapshot.iter().all(|s| s.url != "https://alpha.test/feed"));
            assert_eq!(store.custom_sources().await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_remove_custom_source() {
            let (store, _storage) = create_store(presets());
            store.add(candidate()).await.unwrap();

            store.remove("https://x.test/feed").await.unwrap();

            assert_eq!(store.load().await.unwrap(), presets());
            assert!(store.custom_sources().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_remove_is_idempotent() {
            let (store, _storage) = create_store(presets());

            let once = store.remove("https://beta.test/feed").await.unwrap();
            let twice = store.remove("https://beta.test/feed").await.unwrap();

            assert_eq!(once, twice);
            assert_eq!(store.load().await.unwrap(), once);
        }

        #[tokio::test]
        async fn test_remove_unknown_url() {
            let (store, _storage) = create_store(presets());
            let snapshot = store.remove("https://nowhere.test/rss").await.unwrap();
            assert_eq!(snapshot, presets());
        }

        #[tokio::test]
        async fn test_add_then_remove_round_trip() {
            let (store, _storage) = create_store(presets());
            let before = store.load().await.unwrap();

            store.add(candidate()).await.unwrap();
            store.remove("https://x.test/feed").await.unwrap();

            assert_eq!(store.load().await.unwrap(), before);
            assert!(store.custom_sources().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_remove_heals_corrupt_snapshot() {
            let (store, storage) = create_store(presets());
            storage.set(ALL_SOURCES_KEY, "garbage").await.unwrap();

            store.remove("https://alpha.test/feed").await.unwrap();

            let raw = storage.get(ALL_SOURCES_KEY).await.unwrap().unwrap();
            let stored: Vec<FeedSource> = serde_json::from_str(&raw).unwrap();
            assert_eq!(stored, vec![presets()[1].clone()]);
        }
    }

    mod restore_tests {
        use super::*;

        #[tokio::test]
        async fn test_restore_returns_presets() {
            let (store, _storage) = create_store(presets());
            assert_eq!(store.presets(), &presets()[..]);
            assert_eq!(store.restore_defaults().await.unwrap(), presets());
        }

        #[tokio::test]
        async fn test_restore_discards_history() {
            let (store, storage) = create_store(presets());
            store.add(candidate()).await.unwrap();
            store.remove("https://alpha.test/feed").await.unwrap();

            store.restore_defaults().await.unwrap();

            assert!(storage.get(ALL_SOURCES_KEY).await.unwrap().is_none());
            assert!(storage.get(CUSTOM_SOURCES_KEY).await.unwrap().is_none());
            assert_eq!(store.load().await.unwrap(), presets());
        }

        #[tokio::test]
        async fn test_readded_preset_url_is_custom_until_restore() {
            let (store, _storage) = create_store(presets());
            store.remove("https://alpha.test/feed").await.unwrap();

            let readd = NewSource::new("Mine", "https://alpha.test/feed", "https://alpha.test/");
            let snapshot = store.add(readd).await.unwrap();

            let record = snapshot
                .iter()
                .find(|s| s.url == "https://alpha.test/feed")
                .unwrap();
            assert_eq!(record.name, "Mine");
            assert!(!record.is_preset);
            assert_eq!(store.custom_sources().await.unwrap().len(), 1);

            store.restore_defaults().await.unwrap();
            let restored = store.load().await.unwrap();
            assert_eq!(restored, presets());
            assert!(restored[0].is_preset);
        }
    }
}
