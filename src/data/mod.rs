//! Data structures for roaster readings.

pub mod cache;

pub use cache::{ReadingSnapshot, ValueCache};
