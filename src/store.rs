use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

/// The Store is responsible for managing key-value pairs, with optional time-to-live settings for
/// each key. Expired keys are removed lazily, when they are read. A background reaper can be
/// spawned on top of that to free expired keys that are never read again.
///
/// The store is thread-safe and cheap to clone, every clone points to the same data.
#[derive(Clone)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        let state = State {
            keys: HashMap::new(),
            ttls: BTreeSet::new(),
        };

        let inner = Arc::new(InnerStore {
            state: Mutex::new(state),
            waker: Notify::new(),
        });

        Self { inner }
    }

    /// Spawns a task that removes keys as soon as they expire. It must be called from within a
    /// Tokio runtime.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move { remove_expired_keys(inner).await })
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InnerStore {
    state: Mutex<State>,
    waker: Notify,
}

pub struct InnerStoreLocked<'a> {
    state: MutexGuard<'a, State>,
    waker: &'a Notify,
}

impl<'a> InnerStoreLocked<'a> {
    pub fn set(&mut self, key: Key, data: Bytes) {
        let value = Value {
            data,
            expires_at: None,
        };
        self.insert(key, value);
    }

    pub fn set_with_ttl(&mut self, key: Key, data: Bytes, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let value = Value {
            data,
            expires_at: Some(expires_at),
        };

        self.insert(key.clone(), value);
        self.state.ttls.insert((expires_at, key.clone()));

        let next_to_expire = self.state.ttls.iter().next().map(|(_, key)| key);
        let expires_next = next_to_expire == Some(&key);
        if expires_next {
            self.waker.notify_one();
        }
    }

    /// Returns the value of `key`, unless it does not exist or its TTL has elapsed. An expired
    /// key is removed on the way.
    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        let expired = match self.state.keys.get(key) {
            Some(value) => value.is_expired(Instant::now()),
            None => return None,
        };

        if expired {
            debug!(key, "Removing expired key on read");
            self.remove(key);
            return None;
        }

        self.state.keys.get(key).map(|value| value.data.clone())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let value = self.state.keys.remove(key)?;
        if let Some(expires_at) = value.expires_at {
            self.state.ttls.remove(&(expires_at, key.to_string()));
        }
        Some(value)
    }

    /// Number of stored keys, including expired keys that were not removed yet.
    pub fn size(&self) -> usize {
        self.state.keys.len()
    }

    /// Removes every key whose TTL has elapsed and returns when the next one expires.
    pub fn remove_expired_keys(&mut self) -> Option<Instant> {
        let now = Instant::now();

        let expired_keys: Vec<(Instant, Key)> = self
            .state
            .ttls
            .iter()
            .take_while(|(expires_at, _)| expires_at <= &now)
            .cloned()
            .collect();

        for (_, key) in expired_keys {
            self.remove(&key);
        }

        self.state
            .ttls
            .iter()
            .next()
            .map(|&(expires_at, _)| expires_at)
    }

    // Replacing a key drops whatever TTL it had before, so the index never points at a newer
    // value than the one it was created for.
    fn insert(&mut self, key: Key, value: Value) {
        if let Some(previous) = self.state.keys.insert(key.clone(), value) {
            if let Some(expires_at) = previous.expires_at {
                self.state.ttls.remove(&(expires_at, key));
            }
        }
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl InnerStore {
    pub fn lock(&self) -> InnerStoreLocked<'_> {
        // No operation leaves the maps half updated, so poisoning is ignored.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        InnerStoreLocked {
            state,
            waker: &self.waker,
        }
    }
}

type Key = String;

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub data: Bytes,
    pub expires_at: Option<Instant>,
}

impl Value {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at
            .map_or(false, |expires_at| expires_at <= now)
    }
}

struct State {
    keys: HashMap<Key, Value>,
    ttls: BTreeSet<(Instant, Key)>,
}

async fn remove_expired_keys(store: Arc<InnerStore>) {
    loop {
        let next_expiration = store.lock().remove_expired_keys();

        if let Some(next_expiration) = next_expiration {
            tokio::select! {
                _ = sleep_until(next_expiration) => {}
                _ = store.waker.notified() => {}
            }
        } else {
            store.waker.notified().await;
        }
    }
}
