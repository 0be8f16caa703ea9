use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Initial capacity of the waiter list of a freshly created episode.
pub const DEFAULT_WAITER_CAPACITY: usize = 100;

/// Episode is the admission gate of one in-flight unit of work.
///
/// A gate is admitted at most once. Episodes are never reset: once the
/// leader tears an episode down, the next registration for the same key
/// gets a brand new one.
#[derive(Debug, Default)]
pub struct Episode {
    admitted: AtomicBool,
}

impl Episode {
    fn new() -> Episode {
        Episode {
            admitted: AtomicBool::new(false),
        }
    }

    /// try_admit returns true for exactly one caller over the life of the episode.
    pub fn try_admit(&self) -> bool {
        self.admitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_admitted(&self) -> bool {
        self.admitted.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Entry<S> {
    episode: Arc<Episode>,
    waiters: Vec<S>,
}

/// Group represents a class of work and creates a space in which units of work
/// can be executed with duplicate suppression.
///
/// `S` is the per-caller result receptacle. The group only stores receptacles
/// and hands them back to the leader; it never looks inside them.
#[derive(Debug)]
pub struct Group<K, S> {
    m: Arc<Mutex<HashMap<K, Entry<S>>>>,
    waiter_capacity: usize,
}

impl<K, S> Clone for Group<K, S> {
    fn clone(&self) -> Self {
        Self {
            m: self.m.clone(),
            waiter_capacity: self.waiter_capacity,
        }
    }
}

impl<K, S> Default for Group<K, S>
where
    K: Hash + Eq + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> Group<K, S>
where
    K: Hash + Eq + Clone + Debug,
{
    pub fn new() -> Group<K, S> {
        Self::with_waiter_capacity(DEFAULT_WAITER_CAPACITY)
    }

    pub fn with_waiter_capacity(waiter_capacity: usize) -> Group<K, S> {
        Group {
            m: Arc::new(Mutex::new(HashMap::new())),
            waiter_capacity,
        }
    }

    /// register appends `waiter` to the live episode for `key`, creating the
    /// episode first if there is none, and returns that episode.
    ///
    /// Lookup, creation and append happen under one lock, so the returned
    /// episode is always the one the waiter was attached to.
    pub fn register(&self, key: &K, waiter: S) -> Arc<Episode> {
        let mut map = self.m.lock();
        let entry = map.entry(key.clone()).or_insert_with(|| {
            trace!(?key, "Episode created");
            Entry {
                episode: Arc::new(Episode::new()),
                waiters: Vec::with_capacity(self.waiter_capacity),
            }
        });
        entry.waiters.push(waiter);
        trace!(?key, waiters = entry.waiters.len(), "Waiter registered");
        entry.episode.clone()
    }

    /// lead attempts to win admission for `episode` without blocking.
    /// None means another caller already leads it.
    pub fn lead(&self, key: &K, episode: &Arc<Episode>) -> Option<Leadership<'_, K, S>> {
        if !episode.try_admit() {
            return None;
        }
        trace!(?key, "Admission won");
        Some(Leadership {
            group: self,
            key: key.clone(),
            episode: episode.clone(),
            finished: false,
        })
    }

    /// in_flight returns the number of keys with a live episode.
    pub fn in_flight(&self) -> usize {
        self.m.lock().len()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.m.lock().contains_key(key)
    }

    /// waiters returns how many receptacles are registered for `key`,
    /// the leader's own included.
    pub fn waiters(&self, key: &K) -> usize {
        self.m.lock().get(key).map_or(0, |entry| entry.waiters.len())
    }

    fn take(&self, key: &K, episode: &Arc<Episode>) -> Vec<S> {
        let mut map = self.m.lock();
        let live = map
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.episode, episode));
        if !live {
            return Vec::new();
        }
        let waiters = map.remove(key).map(|e| e.waiters).unwrap_or_default();
        trace!(?key, "Episode removed");
        waiters
    }
}

/// Leadership is held by the single caller that won admission for an episode.
///
/// Dropping it without calling [`Leadership::finish`] (the work panicked, or
/// an async leader was cancelled) still tears the episode down and drops
/// every receptacle, so waiters are released instead of blocking forever.
#[derive(Debug)]
pub struct Leadership<'a, K, S>
where
    K: Hash + Eq + Clone + Debug,
{
    group: &'a Group<K, S>,
    key: K,
    episode: Arc<Episode>,
    finished: bool,
}

impl<'a, K, S> Leadership<'a, K, S>
where
    K: Hash + Eq + Clone + Debug,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// finish removes the episode and returns every receptacle registered for
    /// it, in registration order. Callers arriving afterwards start a new episode.
    pub fn finish(mut self) -> Vec<S> {
        self.finished = true;
        self.group.take(&self.key, &self.episode)
    }
}

impl<'a, K, S> Drop for Leadership<'a, K, S>
where
    K: Hash + Eq + Clone + Debug,
{
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let abandoned = self.group.take(&self.key, &self.episode);
        warn!(
            key = ?self.key,
            waiters = abandoned.len(),
            "Leader left without a result, releasing waiters"
        );
    }
}
