//! Duplicate work suppression for concurrent callers.
//!
//! When many callers ask for the same unit of work (identified by a key) at
//! the same time, only one of them executes it; the others wait and receive
//! the same result, error included. Nothing is cached: once the result has
//! been handed out, the next call for the key runs the work again.
//!
//! ```
//! use uniquework::UniqueWorkRunner;
//!
//! let runner = UniqueWorkRunner::<&str, u64, String>::new();
//! let res = runner.run("answer", || Ok(42));
//! assert_eq!(res, Ok(42));
//! ```

mod async_runner;
mod runner;
mod types;

pub use async_runner::AsyncUniqueWorkRunner;
pub use runner::UniqueWorkRunner;
pub use types::{share, Options, SharedError};
