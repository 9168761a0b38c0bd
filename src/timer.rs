//! Tick-driven one-shot timers.
//!
//! The broker never sleeps. The worker advances this queue by the
//! elapsed tick time and the broker reacts to whatever expired.
//!
//! ```text
//! ┌──────────────┐ start(ms,key) ┌──────────────────┐ advance(ms) ┌──────────┐
//! │  Procedure   │──────────────▶│    TimerQueue    │◀────────────│  Worker  │
//! │  state mach. │◀──────────────│ id → remaining   │             │  tick    │
//! └──────────────┘   Expired     └──────────────────┘             └──────────┘
//! ```
//!
//! Each timer fires at most once; stopping an already-expired or
//! unknown id is a no-op.

use std::collections::BTreeMap;

use log::{debug, info};

/// Handle returned by [`TimerQueue::start`]. Never zero.
pub type TimerId = u32;

/// A timer that ran out during [`TimerQueue::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired<K> {
    pub id: TimerId,
    pub key: K,
}

#[derive(Debug, Clone)]
struct TimerEntry<K> {
    remaining_ms: u64,
    key: K,
}

/// Pending one-shot timers keyed by id.
pub struct TimerQueue<K> {
    timers: BTreeMap<TimerId, TimerEntry<K>>,
    next_id: TimerId,
}

impl<K: Copy> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn alloc_id(&mut self) -> TimerId {
        loop {
            let id = self.next_id;
            self.next_id = match self.next_id.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if !self.timers.contains_key(&id) {
                return id;
            }
        }
    }

    /// Arm a timer that expires after `delay_ms`.
    pub fn start(&mut self, delay_ms: u32, key: K) -> TimerId {
        let id = self.alloc_id();
        self.timers.insert(
            id,
            TimerEntry {
                remaining_ms: u64::from(delay_ms),
                key,
            },
        );
        debug!("Timer: started #{} ({} ms)", id, delay_ms);
        id
    }

    /// Cancel a timer. Returns `true` if it was still pending.
    pub fn stop(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    /// Re-associate a pending timer without touching its deadline.
    pub fn rekey(&mut self, id: TimerId, key: K) -> bool {
        match self.timers.get_mut(&id) {
            Some(entry) => {
                entry.key = key;
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Cancel every pending timer.
    pub fn clear(&mut self) {
        if !self.timers.is_empty() {
            info!("Timer: cancelled {} pending timers", self.timers.len());
        }
        self.timers.clear();
    }

    /// Move time forward. Expired timers are removed and returned in id order.
    pub fn advance(&mut self, elapsed_ms: u32) -> Vec<Expired<K>> {
        let elapsed = u64::from(elapsed_ms);
        let mut expired = Vec::new();

        for (id, entry) in &mut self.timers {
            entry.remaining_ms = entry.remaining_ms.saturating_sub(elapsed);
            if entry.remaining_ms == 0 {
                expired.push(Expired {
                    id: *id,
                    key: entry.key,
                });
            }
        }
        for e in &expired {
            self.timers.remove(&e.id);
            debug!("Timer: #{} expired", e.id);
        }
        expired
    }
}
