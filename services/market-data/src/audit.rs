//! Bounded audit log of raw upstream messages
//!
//! Keeps the most recent N messages (50 by default) with the time they were
//! published. Oldest entries are evicted first; entries are never modified
//! after being appended.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of entries retained by default.
pub const DEFAULT_AUDIT_CAPACITY: usize = 50;

/// One recorded upstream message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub snapshot: String,
}

/// Fixed-capacity FIFO ring of [`AuditEntry`].
#[derive(Debug)]
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// Create a log retaining at most `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append `snapshot` stamped with the current time.
    pub fn add(&self, snapshot: impl Into<String>) {
        self.push(AuditEntry {
            timestamp: Utc::now(),
            snapshot: snapshot.into(),
        });
    }

    fn push(&self, entry: AuditEntry) {
        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Copy of the current contents, oldest first.
    pub fn get_all(&self) -> Vec<AuditEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // Every critical section leaves the deque consistent; poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
