//! Process-wide query cache with generations, snapshots and invalidation.
//!
//! Every entry carries a generation drawn from a cache-wide counter. Any
//! write that should win over an in-flight fetch (optimistic patch,
//! cancellation, invalidation, restore) takes a fresh generation, and a
//! fetch result is applied only if the entry still holds the generation
//! its [`FetchTicket`] was issued with. While a [`MutationHold`] is alive
//! for a family, fetch results for keys in that family are discarded no
//! matter when the fetch started. The lock is never held across an
//! `.await`; callers fetch between [`QueryCache::begin_fetch`] and
//! [`QueryCache::complete_fetch`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use taskdeck_proto::project::Project;
use taskdeck_proto::task::Task;
use taskdeck_proto::user::User;

use super::key::CacheKey;

/// Default capacity of the invalidation broadcast.
const INVALIDATION_BUFFER: usize = 256;

/// A cached server resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    /// A task collection (`tasks`, `tasks/project/{id}`).
    Tasks(Vec<Task>),
    /// One task (`tasks/id/{id}`).
    Task(Task),
    /// The project list (`projects`).
    Projects(Vec<Project>),
    /// One project (`projects/{id}`).
    Project(Project),
    /// The user directory (`users`).
    Users(Vec<User>),
    /// The signed-in user (`profile`).
    Profile(User),
}

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Never fetched, or evicted.
    Absent,
    /// First fetch in flight; no value yet.
    Loading,
    /// Matches the server as of the last fetch or settled mutation.
    Fresh,
    /// Has a value that must be revalidated before it is trusted.
    Stale,
    /// The last fetch failed.
    Error,
}

/// Proof that a fetch was started for `key` at a given generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: CacheKey,
    generation: u64,
}

impl FetchTicket {
    /// Key the fetch is for.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// Values of a set of keys captured before an optimistic write.
///
/// `None` records that a key had no value so that [`QueryCache::restore`]
/// removes anything written to it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<(CacheKey, Option<CachedValue>)>,
}

impl Snapshot {
    /// Captured keys.
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Captured value of `key`, if it was captured and had one.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<&CachedValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_ref())
    }
}

#[derive(Debug)]
struct Entry {
    value: Option<CachedValue>,
    freshness: Freshness,
    error: Option<String>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<CacheKey, Entry>,
    next_generation: u64,
    /// Families with a mutation in flight, one element per hold.
    held: Vec<CacheKey>,
}

impl Inner {
    const fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn is_held(&self, key: &CacheKey) -> bool {
        self.held.iter().any(|prefix| key.starts_with(prefix))
    }

    fn keys_under(&self, prefix: &CacheKey) -> Vec<CacheKey> {
        self.entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Shared, cloneable handle to the cache.
#[derive(Debug, Clone)]
pub struct QueryCache {
    inner: Arc<Mutex<Inner>>,
    invalidations: broadcast::Sender<CacheKey>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        let (invalidations, _) = broadcast::channel(INVALIDATION_BUFFER);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            invalidations,
        }
    }

    /// Receives the key (or family prefix) of every invalidation.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
        self.invalidations.subscribe()
    }

    /// Current value of `key`.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        self.inner.lock().entries.get(key).and_then(|e| e.value.clone())
    }

    /// Current freshness of `key`.
    #[must_use]
    pub fn freshness(&self, key: &CacheKey) -> Freshness {
        self.inner
            .lock()
            .entries
            .get(key)
            .map_or(Freshness::Absent, |e| e.freshness)
    }

    /// Error message of the last failed fetch of `key`.
    #[must_use]
    pub fn error(&self, key: &CacheKey) -> Option<String> {
        self.inner.lock().entries.get(key).and_then(|e| e.error.clone())
    }

    /// Every key with an entry, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    /// Keys equal to or beneath `prefix`.
    #[must_use]
    pub fn keys_under(&self, prefix: &CacheKey) -> Vec<CacheKey> {
        self.inner.lock().keys_under(prefix)
    }

    /// Starts a fetch of `key` and returns its ticket.
    ///
    /// A newer fetch supersedes an older one still in flight.
    pub fn begin_fetch(&self, key: &CacheKey) -> FetchTicket {
        let mut inner = self.inner.lock();
        let generation = inner.bump();
        let entry = inner.entries.entry(key.clone()).or_insert(Entry {
            value: None,
            freshness: Freshness::Absent,
            error: None,
            generation,
        });
        entry.generation = generation;
        entry.freshness = if entry.value.is_some() {
            Freshness::Stale
        } else {
            Freshness::Loading
        };
        tracing::trace!(key = %key, generation, "fetch started");
        FetchTicket {
            key: key.clone(),
            generation,
        }
    }

    /// Applies a fetch result. Returns `false` when the ticket was
    /// superseded and the result was discarded.
    pub fn complete_fetch(&self, ticket: &FetchTicket, result: Result<CachedValue, String>) -> bool {
        let mut inner = self.inner.lock();
        let held = inner.is_held(&ticket.key);
        let Some(entry) = inner.entries.get_mut(&ticket.key) else {
            tracing::debug!(key = %ticket.key, "discarding fetch for evicted key");
            return false;
        };
        if entry.generation != ticket.generation {
            tracing::debug!(
                key = %ticket.key,
                ticket = ticket.generation,
                current = entry.generation,
                "discarding superseded fetch"
            );
            return false;
        }
        if held {
            tracing::debug!(key = %ticket.key, "discarding fetch during pending mutation");
            entry.freshness = if entry.value.is_some() {
                Freshness::Stale
            } else {
                Freshness::Absent
            };
            return false;
        }
        match result {
            Ok(value) => {
                entry.value = Some(value);
                entry.freshness = Freshness::Fresh;
                entry.error = None;
            }
            Err(message) => {
                tracing::warn!(key = %ticket.key, error = %message, "fetch failed");
                entry.freshness = Freshness::Error;
                entry.error = Some(message);
            }
        }
        true
    }

    /// Writes `value` as the current, fresh state of `key`.
    pub fn set(&self, key: &CacheKey, value: CachedValue) {
        let mut inner = self.inner.lock();
        let generation = inner.bump();
        inner.entries.insert(
            key.clone(),
            Entry {
                value: Some(value),
                freshness: Freshness::Fresh,
                error: None,
                generation,
            },
        );
    }

    /// Drops `key` from the cache.
    pub fn remove(&self, key: &CacheKey) -> Option<CachedValue> {
        self.inner.lock().entries.remove(key).and_then(|e| e.value)
    }

    /// Runs `f` over the value of every key under `prefix`. Entries for
    /// which `f` returns `true` are treated as rewritten: their generation
    /// moves on so in-flight fetches cannot overwrite the change.
    ///
    /// Returns the number of rewritten entries.
    pub fn update_where<F>(&self, prefix: &CacheKey, mut f: F) -> usize
    where
        F: FnMut(&CacheKey, &mut CachedValue) -> bool,
    {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let keys = inner.keys_under(prefix);
        let mut changed = 0;
        for key in keys {
            let generation = inner.next_generation + 1;
            let Some(entry) = inner.entries.get_mut(&key) else {
                continue;
            };
            let Some(value) = entry.value.as_mut() else {
                continue;
            };
            if f(&key, value) {
                entry.generation = generation;
                inner.next_generation = generation;
                changed += 1;
            }
        }
        changed
    }

    /// Marks `prefixes` as having a mutation in flight until the returned
    /// hold is dropped. Fetches of keys under a held family that complete
    /// in the meantime are discarded, even ones started after the
    /// optimistic write.
    #[must_use]
    pub fn hold(&self, prefixes: &[CacheKey]) -> MutationHold {
        self.inner.lock().held.extend_from_slice(prefixes);
        MutationHold {
            cache: self.clone(),
            prefixes: prefixes.to_vec(),
        }
    }

    /// Cancels in-flight fetches under `prefix`.
    ///
    /// Their results will be discarded. Entries that were loading with no
    /// value go back to absent.
    pub fn cancel(&self, prefix: &CacheKey) {
        let mut inner = self.inner.lock();
        for key in inner.keys_under(prefix) {
            let generation = inner.bump();
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.generation = generation;
                if entry.freshness == Freshness::Loading {
                    entry.freshness = Freshness::Absent;
                }
            }
        }
    }

    /// Captures every key under each prefix. Each prefix itself is recorded
    /// even when it has no entry.
    #[must_use]
    pub fn snapshot(&self, prefixes: &[CacheKey]) -> Snapshot {
        let inner = self.inner.lock();
        let mut entries: Vec<(CacheKey, Option<CachedValue>)> = Vec::new();
        for prefix in prefixes {
            let mut keys = inner.keys_under(prefix);
            if !keys.contains(prefix) {
                keys.push(prefix.clone());
            }
            for key in keys {
                if entries.iter().any(|(k, _)| k == &key) {
                    continue;
                }
                let value = inner.entries.get(&key).and_then(|e| e.value.clone());
                entries.push((key, value));
            }
        }
        Snapshot { entries }
    }

    /// Puts every captured key back to its captured value, marked stale.
    /// Keys that had no value are removed.
    pub fn restore(&self, snapshot: Snapshot) {
        let mut inner = self.inner.lock();
        for (key, value) in snapshot.entries {
            match value {
                Some(value) => {
                    let generation = inner.bump();
                    inner.entries.insert(
                        key,
                        Entry {
                            value: Some(value),
                            freshness: Freshness::Stale,
                            error: None,
                            generation,
                        },
                    );
                }
                None => {
                    inner.entries.remove(&key);
                }
            }
        }
    }

    /// Marks `key` stale and announces it. Returns whether it existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let existed = {
            let mut inner = self.inner.lock();
            let generation = inner.bump();
            inner.entries.get_mut(key).is_some_and(|entry| {
                mark_stale(entry, generation);
                true
            })
        };
        if existed {
            tracing::debug!(key = %key, "invalidated");
            let _ = self.invalidations.send(key.clone());
        }
        existed
    }

    /// Marks every key under `prefix` stale and announces the prefix.
    /// Returns the number of entries affected.
    pub fn invalidate_prefix(&self, prefix: &CacheKey) -> usize {
        let count = {
            let mut inner = self.inner.lock();
            let keys = inner.keys_under(prefix);
            for key in &keys {
                let generation = inner.bump();
                if let Some(entry) = inner.entries.get_mut(key) {
                    mark_stale(entry, generation);
                }
            }
            keys.len()
        };
        if count > 0 {
            tracing::debug!(prefix = %prefix, count, "invalidated family");
            let _ = self.invalidations.send(prefix.clone());
        }
        count
    }

    /// Drops every entry. In-flight fetches are discarded on completion.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        tracing::debug!("query cache cleared");
    }
}

/// Keeps fetch results for a set of families out of the cache while a
/// mutation on them is in flight. Released on drop.
#[derive(Debug)]
pub struct MutationHold {
    cache: QueryCache,
    prefixes: Vec<CacheKey>,
}

impl Drop for MutationHold {
    fn drop(&mut self) {
        let mut inner = self.cache.inner.lock();
        for prefix in &self.prefixes {
            if let Some(index) = inner.held.iter().position(|p| p == prefix) {
                inner.held.swap_remove(index);
            }
        }
    }
}

fn mark_stale(entry: &mut Entry, generation: u64) {
    entry.generation = generation;
    entry.freshness = if entry.value.is_some() {
        Freshness::Stale
    } else {
        Freshness::Absent
    };
}
