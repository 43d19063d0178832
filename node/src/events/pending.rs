// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use popstore_kernel::event::StoreEvent;
use rustc_hash::FxHashMap;

const DEFAULT_CAPACITY: usize = 10_000;

/// Consumer name used when a query does not give one.
pub const DEFAULT_CONSUMER: &str = "";

#[derive(Debug, Default)]
struct Log {
    events: VecDeque<(u64, StoreEvent)>,
    next_seq: u64,
    cursors: FxHashMap<String, u64>,
}

/// Events waiting to be pulled by remote consumers.
///
/// Each named consumer keeps its own cursor, so every consumer receives each
/// event exactly once. A consumer seen for the first time starts at the oldest
/// retained event. Events every known consumer has drained are released, and
/// at most `capacity` events are retained.
#[derive(Debug)]
pub struct PendingEvents {
    log: Mutex<Log>,
    capacity: usize,
}

impl Default for PendingEvents {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl PendingEvents {
    pub fn with_capacity(capacity: usize) -> Self {
        PendingEvents {
            log: Mutex::new(Log::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, event: StoreEvent) {
        let mut log = self.lock();
        if log.events.len() >= self.capacity {
            tracing::warn!(capacity = self.capacity, "pending event queue full, dropping oldest event");
            log.events.pop_front();
        }
        let seq = log.next_seq;
        log.next_seq += 1;
        log.events.push_back((seq, event));
    }

    /// Returns the events `consumer` has not received yet.
    pub fn drain(&self, consumer: &str) -> Vec<StoreEvent> {
        let mut log = self.lock();
        let from = log.cursors.get(consumer).copied().unwrap_or(0);
        let drained: Vec<StoreEvent> = log
            .events
            .iter()
            .skip_while(|(seq, _)| *seq < from)
            .map(|(_, e)| e.clone())
            .collect();
        let next = log.next_seq;
        log.cursors.insert(consumer.to_string(), next);

        let oldest_needed = log.cursors.values().copied().min().unwrap_or(next);
        while log.events.front().is_some_and(|(seq, _)| *seq < oldest_needed) {
            log.events.pop_front();
        }
        drained
    }

    /// Events still retained for at least one consumer.
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
