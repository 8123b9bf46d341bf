//! Coarse expiry wheel (§4.2): a ring of slots, each a constant-time-updatable
//! set of session indices, serviced on a fixed tick advanced once per packet.

/// TIMEOUT used for every protocol today: 300 ticks of 100ms each, ~30s.
pub const TIMEOUT_TICKS: u32 = 300;
pub const TICK_SECS: f64 = 0.1;

/// One slot more than the timeout so a session armed for the full TIMEOUT
/// never lands back on the slot currently being serviced.
const WHEEL_SIZE: usize = TIMEOUT_TICKS as usize + 1;

/// Opaque handle a [`crate::session::Session`] holds to its wheel slot.
/// `None` means the session is not currently armed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TimerHandle {
    slot: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    prev: Option<usize>,
    next: Option<usize>,
}

/// A timer wheel over a fixed universe of `capacity` session indices. Indices
/// are the caller's [`crate::session_table::SessionTable`] indices, reused
/// as the intrusive linked-list node storage so arming/re-arming never
/// allocates.
pub struct TimerWheel {
    slots: Vec<Option<usize>>,
    nodes: Vec<Option<Node>>,
    /// Wheel position corresponding to `last_serviced_time`.
    cursor: usize,
    last_serviced_time: f64,
    tick_secs: f64,
}

impl TimerWheel {
    pub fn new(capacity: usize, now: f64) -> Self {
        Self::with_tick(capacity, now, TICK_SECS)
    }

    pub fn with_tick(capacity: usize, now: f64, tick_secs: f64) -> Self {
        TimerWheel {
            slots: vec![None; WHEEL_SIZE],
            nodes: vec![None; capacity],
            cursor: 0,
            last_serviced_time: now,
            tick_secs,
        }
    }

    fn unlink(&mut self, index: usize) {
        let Some(node) = self.nodes[index] else { return };
        match node.prev {
            Some(prev) => self.nodes[prev].as_mut().unwrap().next = node.next,
            None => {
                // index was a slot head; find which slot and repoint it.
                for slot in self.slots.iter_mut() {
                    if *slot == Some(index) {
                        *slot = node.next;
                        break;
                    }
                }
            }
        }
        if let Some(next) = node.next {
            self.nodes[next].as_mut().unwrap().prev = node.prev;
        }
        self.nodes[index] = None;
    }

    fn link(&mut self, slot: usize, index: usize) {
        let old_head = self.slots[slot];
        self.nodes[index] = Some(Node { prev: None, next: old_head });
        if let Some(head) = old_head {
            self.nodes[head].as_mut().unwrap().prev = Some(index);
        }
        self.slots[slot] = Some(index);
    }

    /// Arms `index` for `ticks` ticks from the wheel's current position.
    pub fn start(&mut self, index: usize, ticks: u32) {
        let slot = (self.cursor + ticks as usize) % WHEEL_SIZE;
        self.link(slot, index);
    }

    /// Moves an already-armed `index` to a new slot, `ticks` ticks out.
    /// Equivalent to `start` for an index not currently armed.
    pub fn update(&mut self, index: usize, ticks: u32) {
        self.unlink(index);
        self.start(index, ticks);
    }

    /// Removes `index` from the wheel without touching the session table.
    pub fn cancel(&mut self, index: usize) {
        self.unlink(index);
    }

    /// Advances the wheel from `last_serviced_time` to `now`, evicting every
    /// session whose slot the cursor passes. `on_expire` is called once per
    /// evicted index (expected to call back into the session table's
    /// `remove`). Cheap when `now` hasn't crossed a tick boundary.
    pub fn expire(&mut self, now: f64, mut on_expire: impl FnMut(usize)) {
        if now <= self.last_serviced_time {
            return;
        }
        let elapsed_ticks = ((now - self.last_serviced_time) / self.tick_secs).floor() as usize;
        if elapsed_ticks == 0 {
            return;
        }
        let steps = elapsed_ticks.min(WHEEL_SIZE);
        for _ in 0..steps {
            self.cursor = (self.cursor + 1) % WHEEL_SIZE;
            while let Some(index) = self.slots[self.cursor] {
                self.unlink(index);
                on_expire(index);
            }
        }
        self.last_serviced_time = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_expire_past_timeout_fires() {
        let mut wheel = TimerWheel::new(4, 0.0);
        wheel.start(0, TIMEOUT_TICKS);

        let mut expired = Vec::new();
        wheel.expire(TIMEOUT_TICKS as f64 * TICK_SECS, |i| expired.push(i));
        assert_eq!(expired, vec![0]);
    }

    #[test]
    fn expire_before_timeout_does_not_fire() {
        let mut wheel = TimerWheel::new(4, 0.0);
        wheel.start(0, TIMEOUT_TICKS);

        let mut expired = Vec::new();
        wheel.expire(TIMEOUT_TICKS as f64 * TICK_SECS - TICK_SECS, |i| expired.push(i));
        assert!(expired.is_empty());
    }

    #[test]
    fn update_rearms_without_duplicate_fire() {
        let mut wheel = TimerWheel::new(4, 0.0);
        wheel.start(0, 5);
        wheel.update(0, TIMEOUT_TICKS);

        let mut expired = Vec::new();
        wheel.expire(5.0 * TICK_SECS, |i| expired.push(i));
        assert!(expired.is_empty(), "should not fire at the old slot");

        wheel.expire(TIMEOUT_TICKS as f64 * TICK_SECS, |i| expired.push(i));
        assert_eq!(expired, vec![0]);
    }

    #[test]
    fn multiple_sessions_share_a_slot() {
        let mut wheel = TimerWheel::new(4, 0.0);
        wheel.start(0, 10);
        wheel.start(1, 10);
        wheel.start(2, 10);

        let mut expired = Vec::new();
        wheel.expire(10.0 * TICK_SECS, |i| expired.push(i));
        expired.sort();
        assert_eq!(expired, vec![0, 1, 2]);
    }

    #[test]
    fn cancel_prevents_expiry() {
        let mut wheel = TimerWheel::new(4, 0.0);
        wheel.start(0, 10);
        wheel.cancel(0);

        let mut expired = Vec::new();
        wheel.expire(10.0 * TICK_SECS, |i| expired.push(i));
        assert!(expired.is_empty());
    }
}
