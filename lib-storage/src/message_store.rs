//! Bounded, insertion-ordered message log with a dedup set
//!
//! The log keeps the newest `MESSAGE_QUEUE_SIZE` admitted messages; the
//! `seen` id set outlives eviction so the relay stays loop-free for the
//! process lifetime. Every mutation snapshots the log to the KV store, and a
//! restart rebuilds `seen` from the loaded log; ids evicted before a crash
//! are forgotten, which at-least-once delivery tolerates.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use lib_protocol::{MessageEnvelope, MessageType, MESSAGE_QUEUE_SIZE};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::kv::KvStore;

/// KV key holding the persisted message log.
pub const STORE_LOG_KEY: &str = "store.log";

/// Store of admitted mesh messages, newest first.
#[derive(Debug)]
pub struct MessageStore {
    log: VecDeque<MessageEnvelope>,
    seen: HashSet<String>,
    capacity: usize,
    kv: Option<KvStore>,
}

/// Thread-safe handle shared between the router and the uploader.
pub type SharedMessageStore = Arc<RwLock<MessageStore>>;

impl MessageStore {
    /// Memory-only store, used by tests and transient nodes.
    pub fn in_memory() -> Self {
        Self {
            log: VecDeque::new(),
            seen: HashSet::new(),
            capacity: MESSAGE_QUEUE_SIZE,
            kv: None,
        }
    }

    /// Open a persistent store, loading the previous snapshot if present.
    pub fn open(kv: KvStore) -> Self {
        let log: VecDeque<MessageEnvelope> = match kv.get::<Vec<MessageEnvelope>>(STORE_LOG_KEY) {
            Ok(Some(messages)) => messages.into(),
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!("discarding unreadable message log snapshot: {e:#}");
                VecDeque::new()
            }
        };
        let seen = log.iter().map(|m| m.id.clone()).collect();
        debug!(messages = log.len(), "message store loaded");
        Self {
            log,
            seen,
            capacity: MESSAGE_QUEUE_SIZE,
            kv: Some(kv),
        }
    }

    /// Override the log bound. Test hook.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Admit a message if its id has never been seen.
    ///
    /// Returns `false` (no state change) for duplicates. Beyond the capacity
    /// bound the oldest entries are evicted, but stay in the dedup set.
    pub fn admit(&mut self, message: MessageEnvelope) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.log.push_front(message);
        while self.log.len() > self.capacity {
            self.log.pop_back();
        }
        self.persist();
        true
    }

    /// Record an id for dedup without logging the message.
    ///
    /// Used for transient probe traffic the relay must not reprocess but has
    /// no reason to keep. Returns `true` if the id was new.
    pub fn mark_seen(&mut self, id: &str) -> bool {
        self.seen.insert(id.to_string())
    }

    /// Whether the id has ever been admitted or marked.
    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// All retained messages, newest first.
    pub fn all(&self) -> impl Iterator<Item = &MessageEnvelope> {
        self.log.iter()
    }

    /// Retained messages of one type, newest first.
    pub fn by_type(&self, kind: MessageType) -> impl Iterator<Item = &MessageEnvelope> {
        self.log.iter().filter(move |m| m.message_type() == kind)
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Empty both the log and the dedup set.
    pub fn clear(&mut self) {
        self.log.clear();
        self.seen.clear();
        self.persist();
    }

    fn persist(&self) {
        let Some(kv) = &self.kv else { return };
        let snapshot: Vec<&MessageEnvelope> = self.log.iter().collect();
        if let Err(e) = kv.put(STORE_LOG_KEY, &snapshot) {
            // Keep serving from memory; the next mutation retries.
            error!("failed to persist message log: {e:#}");
        }
    }
}

/// Wrap a store for shared async access.
pub fn new_shared(store: MessageStore) -> SharedMessageStore {
    Arc::new(RwLock::new(store))
}
