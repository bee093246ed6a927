//! Pigeon Mesh Storage
//!
//! Durable state for the mesh runtime: a snapshot-style key-value store and
//! the bounded, deduplicating message log built on top of it.

pub mod kv;
pub mod message_store;

pub use kv::KvStore;
pub use message_store::{new_shared, MessageStore, SharedMessageStore, STORE_LOG_KEY};
