//! Session pool with stable indices plus the hash map that resolves a
//! [`FlowKey`] to a pool index (§4.1).

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::flow_key::FlowKey;
use crate::session::{Estimator, ProtocolVariant, Session, SessionState};
use crate::timer_wheel::TimerHandle;

/// Stable handle into the session pool. Valid until [`SessionTable::remove`]
/// is called on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub usize);

/// Pool of session slots backed by a free list, plus the key -> index map.
/// `lookup` is O(1) amortized; `insert`/`remove` never allocate once the
/// pool has grown to its working size.
pub struct SessionTable {
    slots: Vec<Option<Session>>,
    free: Vec<usize>,
    by_key: HashMap<FlowKey, usize>,
    capacity: usize,
}

/// Raised only from `insert`, when every slot is in use. Per §5, exhaustion
/// skips the new flow; there is no eviction of active sessions to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted;

impl SessionTable {
    pub fn new(capacity: usize) -> Self {
        SessionTable {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            by_key: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup(&self, key: FlowKey) -> Option<SessionHandle> {
        self.by_key.get(&key).copied().map(SessionHandle)
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&Session> {
        self.slots.get(handle.0).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut Session> {
        self.slots.get_mut(handle.0).and_then(|s| s.as_mut())
    }

    /// Allocates a slot, registers `key` as its forward alias, and returns
    /// the handle. The caller is responsible for filling in the remaining
    /// session fields and calling [`Self::alias`] for the reverse key.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &mut self,
        key: FlowKey,
        protocol_variant: ProtocolVariant,
        init_src_ip: Ipv4Addr,
        init_src_port: u16,
        init_dst_ip: Ipv4Addr,
        new_dst_ip: Ipv4Addr,
        cat: u64,
    ) -> Result<SessionHandle, PoolExhausted> {
        let index = match self.free.pop() {
            Some(i) => i,
            None if self.slots.len() < self.capacity => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(PoolExhausted),
        };

        let session = Session {
            index,
            protocol_variant,
            key,
            key_reverse: key, // placeholder until `alias` installs the real reverse key
            init_src_ip,
            init_src_port,
            init_dst_ip,
            new_dst_ip,
            pkt_count: 1,
            state: SessionState::Active,
            timer_handle: TimerHandle::default(),
            estimator: Estimator::new(protocol_variant, cat),
        };
        self.slots[index] = Some(session);
        self.by_key.insert(key, index);
        Ok(SessionHandle(index))
    }

    /// Installs `key_reverse` as a second alias for an already-inserted
    /// session.
    pub fn alias(&mut self, key_reverse: FlowKey, handle: SessionHandle) {
        if let Some(session) = self.get_mut(handle) {
            session.key_reverse = key_reverse;
        }
        self.by_key.insert(key_reverse, handle.0);
    }

    /// Removes both aliases and returns the slot to the free list.
    pub fn remove(&mut self, handle: SessionHandle) {
        if let Some(session) = self.slots[handle.0].take() {
            self.by_key.remove(&session.key);
            self.by_key.remove(&session.key_reverse);
            self.free.push(handle.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(o: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, o)
    }

    #[test]
    fn dual_alias_resolves_to_same_index() {
        let mut table = SessionTable::new(4);
        let key = FlowKey(1);
        let key_reverse = FlowKey(2);
        let handle = table.insert(key, ProtocolVariant::Tcp, ip(1), 5000, ip(1), ip(2), 0).unwrap();
        table.alias(key_reverse, handle);

        assert_eq!(table.lookup(key), Some(handle));
        assert_eq!(table.lookup(key_reverse), Some(handle));
    }

    #[test]
    fn remove_clears_both_aliases() {
        let mut table = SessionTable::new(4);
        let key = FlowKey(1);
        let key_reverse = FlowKey(2);
        let handle = table.insert(key, ProtocolVariant::Tcp, ip(1), 5000, ip(1), ip(2), 0).unwrap();
        table.alias(key_reverse, handle);

        table.remove(handle);

        assert_eq!(table.lookup(key), None);
        assert_eq!(table.lookup(key_reverse), None);
    }

    #[test]
    fn pool_exhaustion_is_reported_and_existing_sessions_survive() {
        let mut table = SessionTable::new(1);
        let handle = table.insert(FlowKey(1), ProtocolVariant::Tcp, ip(1), 1, ip(1), ip(2), 0).unwrap();

        let err = table.insert(FlowKey(2), ProtocolVariant::Tcp, ip(3), 2, ip(3), ip(4), 0);
        assert_eq!(err, Err(PoolExhausted));
        assert!(table.get(handle).is_some());
    }

    #[test]
    fn freed_slot_is_reused_with_a_stable_new_handle() {
        let mut table = SessionTable::new(1);
        let first = table.insert(FlowKey(1), ProtocolVariant::Tcp, ip(1), 1, ip(1), ip(2), 0).unwrap();
        table.remove(first);

        let second = table.insert(FlowKey(3), ProtocolVariant::Tcp, ip(5), 3, ip(5), ip(6), 0).unwrap();
        assert_eq!(second.0, first.0);
        assert_eq!(table.lookup(FlowKey(1)), None);
        assert_eq!(table.lookup(FlowKey(3)), Some(second));
    }
}
