use singleflight::Group;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::oneshot;
use tracing::{instrument, trace, warn};

use crate::types::Options;

#[derive(Debug)]
/// AsyncUniqueWorkRunner is the future-based counterpart of
/// [`UniqueWorkRunner`](crate::UniqueWorkRunner): concurrent callers for one
/// key share a single execution of the work and all receive its result.
pub struct AsyncUniqueWorkRunner<K, T, E> {
    group: Group<K, oneshot::Sender<Result<T, E>>>,
}

impl<K, T, E> Clone for AsyncUniqueWorkRunner<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            group: self.group.clone(),
        }
    }
}

impl<K, T, E> Default for AsyncUniqueWorkRunner<K, T, E>
where
    K: Hash + Eq + Clone + Debug,
    T: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T, E> AsyncUniqueWorkRunner<K, T, E>
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

    /// run is like [`UniqueWorkRunner::run`](crate::UniqueWorkRunner::run)
    /// but awaits `work` instead of calling it. Only the leader polls its
    /// future; a follower's future is dropped unpolled unless its leader is
    /// cancelled, in which case the follower retries and may lead.
    #[instrument(skip(self, work))]
    pub async fn run(&self, key: K, work: impl Future<Output = Result<T, E>>) -> Result<T, E> {
        loop {
            let (tx, rx) = oneshot::channel();
            let episode = self.group.register(&key, tx);

            let Some(leadership) = self.group.lead(&key, &episode) else {
                trace!("Waiting for leader");
                match rx.await {
                    Ok(result) => {
                        trace!("Result received");
                        return result;
                    }
                    Err(_) => {
                        warn!("Leader gone before sending a result, retrying");
                        continue;
                    }
                }
            };
            drop(rx);

            trace!("working...");
            let result = work.await;

            let waiters = leadership.finish();
            trace!(waiters = waiters.len(), "Work done, broadcasting");
            for waiter in waiters {
                // Only the leader's own receiver is gone by now.
                let _ = waiter.send(result.clone());
            }
            return result;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.group.in_flight()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.group.contains(key)
    }

    pub fn waiters(&self, key: &K) -> usize {
        self.group.waiters(key)
    }
}

#[cfg(test)]
mod tests {
    use super::AsyncUniqueWorkRunner;
    use crate::types::{share, SharedError};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinSet;
    use tokio::time::{sleep, timeout};
    use tracing_test::traced_test;

    async fn slow_count(counter: Arc<AtomicUsize>, delay: Duration) -> Result<usize, String> {
        sleep(delay).await;
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    #[tokio::test]
    #[traced_test]
    async fn test_async_run() {
        let runner = AsyncUniqueWorkRunner::<&str, i32, String>::new();
        let res = runner.run("test_key", async { Ok(0) }).await;
        assert_eq!(res, Ok(0));
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_async_run_error() {
        let runner = AsyncUniqueWorkRunner::<&str, (), SharedError>::new();
        let res = runner
            .run("test_key", async { Err(share(anyhow!("test error"))) })
            .await;
        assert_eq!(res.unwrap_err().to_string(), "test error");

        let res = runner.run("test_key", async { Ok(()) }).await;
        assert!(res.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[traced_test]
    async fn test_async_each_key_runs_once() {
        const KEYS: usize = 100;
        const CALLERS: usize = 100;

        let runner = AsyncUniqueWorkRunner::<usize, usize, String>::new();
        let executed: Vec<Arc<AtomicUsize>> =
            (0..KEYS).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let mut tasks = JoinSet::new();

        for key in 0..KEYS {
            for _ in 0..CALLERS {
                let runner = runner.clone();
                let counter = executed[key].clone();
                tasks.spawn(async move {
                    runner
                        .run(key, slow_count(counter, Duration::from_millis(500)))
                        .await
                });
            }
        }

        let all = async {
            while let Some(res) = tasks.join_next().await {
                assert_eq!(res.unwrap(), Ok(1));
            }
        };
        timeout(Duration::from_secs(10), all)
            .await
            .expect("runner deadlocked");

        for counter in executed {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_async_sequential_calls_run_every_time() {
        let runner = AsyncUniqueWorkRunner::<&str, usize, String>::new();
        let executed = Arc::new(AtomicUsize::new(0));

        for i in 1..=50 {
            let res = runner
                .run("key", slow_count(executed.clone(), Duration::ZERO))
                .await;
            assert_eq!(res, Ok(i));
        }
        assert_eq!(executed.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_async_cancelled_leader_releases_followers() {
        let runner = AsyncUniqueWorkRunner::<&str, i32, String>::new();

        let leader = {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner
                    .run("key", async {
                        sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        while !runner.is_in_flight(&"key") {
            sleep(Duration::from_millis(1)).await;
        }

        let follower = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run("key", async { Ok(2) }).await })
        };
        while runner.waiters(&"key") < 2 {
            sleep(Duration::from_millis(1)).await;
        }

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert_eq!(follower.await.unwrap(), Ok(2));
        assert_eq!(runner.in_flight(), 0);
    }
}
