//! In-memory mirrors of the watched cluster objects.
//!
//! The watch loop keeps these up to date; event handlers and the full
//! synchronizer read them instead of hitting the API server.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};

/// Builds the `namespace/name` key namespaced objects are cached under.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

pub struct ObjectCache<K> {
    objects: RwLock<HashMap<String, Arc<K>>>,
}

impl<K> Default for ObjectCache<K> {
    fn default() -> Self {
        ObjectCache {
            objects: RwLock::new(HashMap::new()),
        }
    }
}

impl<K> ObjectCache<K> {
    /// Stores `object`, returning the previously cached version.
    pub fn insert(&self, key: String, object: K) -> Option<Arc<K>> {
        self.objects.write().unwrap().insert(key, Arc::new(object))
    }

    pub fn remove(&self, key: &str) -> Option<Arc<K>> {
        self.objects.write().unwrap().remove(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<K>> {
        self.objects.read().unwrap().get(key).cloned()
    }

    /// Swaps the whole cache, used when a watch (re)starts with a fresh list.
    pub fn replace_all(&self, objects: impl IntoIterator<Item = (String, K)>) {
        let fresh = objects
            .into_iter()
            .map(|(key, object)| (key, Arc::new(object)))
            .collect();
        *self.objects.write().unwrap() = fresh;
    }

    pub fn snapshot(&self) -> Vec<Arc<K>> {
        self.objects.read().unwrap().values().cloned().collect()
    }
}

/// The three caches the syncer works against, playing the role the CO
/// informer listers usually play.
#[derive(Default)]
pub struct Caches {
    pub volumes: ObjectCache<PersistentVolume>,
    pub claims: ObjectCache<PersistentVolumeClaim>,
    pub pods: ObjectCache<Pod>,
}

impl Caches {
    pub fn get_volume(&self, name: &str) -> Option<Arc<PersistentVolume>> {
        self.volumes.get(name)
    }

    pub fn get_claim(&self, namespace: &str, name: &str) -> Option<Arc<PersistentVolumeClaim>> {
        self.claims.get(&object_key(namespace, name))
    }
}
