use std::sync::Arc;

/// Options represents the options for a unique work runner
#[derive(Clone, Debug)]
pub struct Options {
    /// WaiterCapacity is the initial capacity of the waiter list of each
    /// in-flight key. default is 100
    pub waiter_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            waiter_capacity: singleflight::DEFAULT_WAITER_CAPACITY,
        }
    }
}

/// SharedError lets work that fails with [`anyhow::Error`] hand the same
/// error to every caller of an episode.
pub type SharedError = Arc<anyhow::Error>;

pub fn share<E: Into<anyhow::Error>>(err: E) -> SharedError {
    Arc::new(err.into())
}
