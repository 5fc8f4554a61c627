use super::{ObjectEntry, ObjectStoreAdapter, TagSet};
use crate::error::{Result, StowageError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
    tags: TagSet,
}

#[derive(Debug, Default)]
struct Faults {
    list_prefixes: HashSet<String>,
    get_keys: HashSet<String>,
    delete_keys: HashSet<String>,
    transient_gets: HashMap<String, usize>,
}

/// In-process object store.
///
/// Supports tagging unless built with [`MemoryObjectStore::without_tagging`],
/// lets callers backdate objects, and can inject transport faults.
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
    faults: Mutex<Faults>,
    tagging: bool,
    tag_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(Faults::default()),
            tagging: true,
            tag_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// A store that rejects tag calls, like backends without tagging support.
    pub fn without_tagging() -> Self {
        Self {
            tagging: false,
            ..Self::new()
        }
    }

    pub fn set_last_modified(&self, key: &str, last_modified: DateTime<Utc>) -> Result<()> {
        let mut objects = self.lock_objects()?;
        let object = objects
            .get_mut(key)
            .ok_or_else(|| StowageError::ObjectNotFound(key.to_string()))?;
        object.last_modified = last_modified;
        Ok(())
    }

    /// Backdate every object under `prefix`.
    pub fn set_last_modified_prefix(&self, prefix: &str, last_modified: DateTime<Utc>) -> Result<()> {
        let mut objects = self.lock_objects()?;
        for (_, object) in objects
            .iter_mut()
            .filter(|(key, _)| key.starts_with(prefix))
        {
            object.last_modified = last_modified;
        }
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock_objects()?.keys().cloned().collect())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.lock_objects()?.contains_key(key))
    }

    /// Number of get-tags and put-tags calls received, failed ones included.
    pub fn tag_calls(&self) -> usize {
        self.tag_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn fail_list(&self, prefix: &str) -> Result<()> {
        self.lock_faults()?.list_prefixes.insert(prefix.to_string());
        Ok(())
    }

    pub fn fail_get(&self, key: &str) -> Result<()> {
        self.lock_faults()?.get_keys.insert(key.to_string());
        Ok(())
    }

    pub fn fail_delete(&self, key: &str) -> Result<()> {
        self.lock_faults()?.delete_keys.insert(key.to_string());
        Ok(())
    }

    /// The next `times` gets of `key` fail with a transport error.
    pub fn fail_get_times(&self, key: &str, times: usize) -> Result<()> {
        self.lock_faults()?
            .transient_gets
            .insert(key.to_string(), times);
        Ok(())
    }

    pub fn clear_faults(&self) -> Result<()> {
        *self.lock_faults()? = Faults::default();
        Ok(())
    }

    fn lock_objects(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, MemoryObject>>> {
        self.objects
            .lock()
            .map_err(|_| StowageError::Internal("memory store lock poisoned".to_string()))
    }

    fn lock_faults(&self) -> Result<std::sync::MutexGuard<'_, Faults>> {
        self.faults
            .lock()
            .map_err(|_| StowageError::Internal("memory store lock poisoned".to_string()))
    }

    fn check_get_fault(&self, key: &str) -> Result<()> {
        let mut faults = self.lock_faults()?;
        if faults.get_keys.contains(key) {
            return Err(StowageError::Transport(format!("injected get failure: {}", key)));
        }
        if let Some(remaining) = faults.transient_gets.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StowageError::Transport(format!(
                    "injected transient get failure: {}",
                    key
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStoreAdapter for MemoryObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        // a put replaces the object along with its tags, as on S3
        self.lock_objects()?.insert(
            key.to_string(),
            MemoryObject {
                data,
                last_modified: Utc::now(),
                tags: TagSet::new(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.check_get_fault(key)?;
        self.lock_objects()?
            .get(key)
            .map(|object| object.data.clone())
            .ok_or_else(|| StowageError::ObjectNotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectEntry>> {
        Ok(self.lock_objects()?.get(key).map(|object| ObjectEntry {
            key: key.to_string(),
            size: object.data.len() as u64,
            last_modified: object.last_modified,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        if self
            .lock_faults()?
            .list_prefixes
            .iter()
            .any(|failing| prefix.starts_with(failing.as_str()))
        {
            return Err(StowageError::Transport(format!(
                "injected list failure: {}",
                prefix
            )));
        }

        Ok(self
            .lock_objects()?
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectEntry {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.lock_faults()?.delete_keys.contains(key) {
            return Err(StowageError::Transport(format!(
                "injected delete failure: {}",
                key
            )));
        }
        self.lock_objects()?.remove(key);
        Ok(())
    }

    async fn get_tags(&self, key: &str) -> Result<TagSet> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        if !self.tagging {
            return Err(StowageError::Unsupported("object tagging".to_string()));
        }
        self.lock_objects()?
            .get(key)
            .map(|object| object.tags.clone())
            .ok_or_else(|| StowageError::ObjectNotFound(key.to_string()))
    }

    async fn put_tags(&self, key: &str, tags: &TagSet) -> Result<()> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        if !self.tagging {
            return Err(StowageError::Unsupported("object tagging".to_string()));
        }
        let mut objects = self.lock_objects()?;
        let object = objects
            .get_mut(key)
            .ok_or_else(|| StowageError::ObjectNotFound(key.to_string()))?;
        object.tags = tags.clone();
        Ok(())
    }

    fn supports_tagging(&self) -> bool {
        self.tagging
    }

    fn name(&self) -> &str {
        "memory"
    }
}
