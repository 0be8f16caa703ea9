mod group;
pub mod receptacle;

pub use group::{Episode, Group, Leadership, DEFAULT_WAITER_CAPACITY};
