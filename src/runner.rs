use singleflight::receptacle::{self, Sender};
use singleflight::Group;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{instrument, trace, warn};

use crate::types::Options;

/// UniqueWorkRunner is useful when many threads need to perform the same job
/// that is expected to have the same result for all of them. Instead of all
/// the threads executing the work, only one is allowed to perform it while the
/// rest wait for its result.
///
/// Clones share the same in-flight state.
#[derive(Debug)]
pub struct UniqueWorkRunner<K, T, E> {
    group: Group<K, Sender<Result<T, E>>>,
}

impl<K, T, E> Clone for UniqueWorkRunner<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            group: self.group.clone(),
        }
    }
}

impl<K, T, E> Default for UniqueWorkRunner<K, T, E>
where
    K: Hash + Eq + Clone + Debug,
    T: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T, E> UniqueWorkRunner<K, T, E>
where
    K: Hash + Eq + Clone + Debug,
    T: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            group: Group::with_waiter_capacity(options.waiter_capacity),
        }
    }

    /// run executes `work` and returns its result. If multiple calls with the
    /// same key happen concurrently, only the first one actually runs its
    /// work; the others block until it is done and receive the same result,
    /// error included.
    ///
    /// Results are not kept: once every waiter is served, the next call for
    /// the key runs its work again.
    #[instrument(skip(self, work))]
    pub fn run<F>(&self, key: K, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        loop {
            let (tx, rx) = receptacle::channel();
            let episode = self.group.register(&key, tx);

            let Some(leadership) = self.group.lead(&key, &episode) else {
                trace!("Waiting for leader");
                match rx.recv() {
                    Some(result) => {
                        trace!("Result received");
                        return result;
                    }
                    None => {
                        warn!("Leader gone before sending a result, retrying");
                        continue;
                    }
                }
            };
            // The leader's own echo is never read.
            drop(rx);

            trace!("working...");
            let result = work();

            let waiters = leadership.finish();
            trace!(waiters = waiters.len(), "Work done, broadcasting");
            for waiter in waiters {
                waiter.send(result.clone());
            }
            return result;
        }
    }

    /// in_flight returns the number of keys whose work is currently running.
    pub fn in_flight(&self) -> usize {
        self.group.in_flight()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.group.contains(key)
    }

    /// waiters returns the number of callers attached to the running work
    /// for `key`, the leader included.
    pub fn waiters(&self, key: &K) -> usize {
        self.group.waiters(key)
    }
}
