use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::RequestRecord;

/// Default number of records kept
pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded newest-first buffer of completed requests.
///
/// Appends insert at the front and evict the oldest record once the bound
/// is exceeded. Append and snapshot are mutually exclusive.
pub struct RequestHistory {
    records: Mutex<VecDeque<RequestRecord>>,
    capacity: usize,
}

impl RequestHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Maximum number of records retained
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a completed request at the front, evicting the oldest record
    /// if the buffer is full
    pub fn append(&self, record: RequestRecord) {
        let mut records = self.records.lock().expect("request history poisoned");
        records.push_front(record);
        records.truncate(self.capacity);
    }

    /// Copy of the buffer, newest first
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        let records = self.records.lock().expect("request history poisoned");
        records.iter().cloned().collect()
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        self.records.lock().expect("request history poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
