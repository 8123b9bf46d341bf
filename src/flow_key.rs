//! Canonical 64-bit flow keys and the dual-alias scheme used to correlate
//! forward and reverse traffic of a rewritten flow.
//!
//! See the "Open Question — reverse rewrite address" note in `DESIGN.md` for
//! why the reverse alias is built the way it is below.

use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

/// IP protocol carried by a flow, restricted to the two this crate inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum IpProto {
    Tcp,
    Udp,
}

impl IpProto {
    fn discriminant(self) -> u8 {
        match self {
            IpProto::Tcp => 6,
            IpProto::Udp => 17,
        }
    }
}

/// Canonical 64-bit flow key. Two packets that should be routed to the same
/// [`crate::session::Session`] hash to the same `FlowKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct FlowKey(pub u64);

#[allow(clippy::too_many_arguments)]
fn hash_tuple(ip_a: Ipv4Addr, ip_b: Ipv4Addr, port_a: u16, port_b: u16, proto: IpProto, cat: u64) -> FlowKey {
    // FNV-1a, the fixed-width non-cryptographic hash the teacher corpus
    // reaches for when it needs a fast hash over a handful of known-size
    // fields rather than pulling in `std::hash::DefaultHasher`'s SipHash.
    struct Fnv1a(u64);
    impl Hasher for Fnv1a {
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 ^= b as u64;
                self.0 = self.0.wrapping_mul(0x100000001b3);
            }
        }
        fn finish(&self) -> u64 {
            self.0
        }
    }

    let mut h = Fnv1a(0xcbf29ce484222325);
    u32::from(ip_a).hash(&mut h);
    u32::from(ip_b).hash(&mut h);
    port_a.hash(&mut h);
    port_b.hash(&mut h);
    proto.discriminant().hash(&mut h);
    cat.hash(&mut h);
    FlowKey(h.finish())
}

/// Fields of an observed packet relevant to flow-key construction. `cat` is
/// `0` for TCP/QUIC; for PLUS it is the 64-bit Connection and Association
/// Token, which must fold into the key so two UDP 4-tuples with different
/// CATs hash to distinct flows (see scenario 4 in the test suite).
#[derive(Debug, Clone, Copy)]
pub struct PacketTuple {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub proto: IpProto,
    pub cat: u64,
}

/// The key a *new* flow is registered under, built directly from the first
/// observed packet's own address/port fields.
pub fn forward_key(pkt: &PacketTuple) -> FlowKey {
    hash_tuple(pkt.src_ip, pkt.dst_ip, pkt.src_port, pkt.dst_port, pkt.proto, pkt.cat)
}

/// The key under which an incoming packet is looked up if it is *not* a hit
/// for [`forward_key`]. Built by assuming the packet is return traffic: its
/// own source address is the backend's real IP (what `new_dst_ip` was bound
/// to at creation), so that address is placed in the slot the alias used for
/// `new_dst_ip`, and the slot that held the initiator's address is zeroed
/// because an arbitrary incoming packet's own address can't tell us that
/// without first finding the session.
pub fn reverse_lookup_key(pkt: &PacketTuple) -> FlowKey {
    hash_tuple(Ipv4Addr::UNSPECIFIED, pkt.src_ip, pkt.src_port, pkt.dst_port, pkt.proto, pkt.cat)
}

/// The reverse alias installed at session creation, from the fields of the
/// *forward* packet that created the session. `new_dst_ip` is the backend the
/// flow was bound to; ports are swapped because the real return packet's
/// source/destination ports are the forward packet's destination/source
/// ports respectively. This is constructed so that feeding the hypothetical
/// return packet's own fields into [`reverse_lookup_key`] reproduces exactly
/// this value -- see the unit test `reverse_alias_matches_reverse_lookup`.
pub fn reverse_alias_key(creating_pkt: &PacketTuple, new_dst_ip: Ipv4Addr) -> FlowKey {
    hash_tuple(
        Ipv4Addr::UNSPECIFIED,
        new_dst_ip,
        creating_pkt.dst_port,
        creating_pkt.src_port,
        creating_pkt.proto,
        creating_pkt.cat,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(src_ip: [u8; 4], src_port: u16, dst_ip: [u8; 4], dst_port: u16) -> PacketTuple {
        PacketTuple {
            src_ip: Ipv4Addr::from(src_ip),
            dst_ip: Ipv4Addr::from(dst_ip),
            src_port,
            dst_port,
            proto: IpProto::Tcp,
            cat: 0,
        }
    }

    #[test]
    fn reverse_alias_matches_reverse_lookup() {
        let forward = tuple([10, 0, 0, 1], 5000, [10, 0, 0, 2], 80);
        let new_dst_ip = Ipv4Addr::new(192, 168, 1, 10);

        let alias = reverse_alias_key(&forward, new_dst_ip);

        let returning = tuple([192, 168, 1, 10], 80, [10, 0, 0, 1], 5000);
        let looked_up = reverse_lookup_key(&returning);

        assert_eq!(alias, looked_up);
    }

    #[test]
    fn forward_key_is_stable_for_same_tuple() {
        let a = tuple([10, 0, 0, 1], 5000, [10, 0, 0, 2], 80);
        let b = tuple([10, 0, 0, 1], 5000, [10, 0, 0, 2], 80);
        assert_eq!(forward_key(&a), forward_key(&b));
    }

    #[test]
    fn cat_distinguishes_otherwise_identical_tuples() {
        let mut a = tuple([10, 0, 0, 1], 4000, [10, 0, 0, 2], 4000);
        a.proto = IpProto::Udp;
        a.cat = 0xAAAA_AAAA_AAAA_AAAA;
        let mut b = a;
        b.cat = 0xBBBB_BBBB_BBBB_BBBB;

        assert_ne!(forward_key(&a), forward_key(&b));
    }

    #[test]
    fn forward_and_reverse_alias_normally_differ() {
        let forward = tuple([10, 0, 0, 1], 5000, [10, 0, 0, 2], 80);
        let new_dst_ip = Ipv4Addr::new(192, 168, 1, 10);
        assert_ne!(forward_key(&forward), reverse_alias_key(&forward, new_dst_ip));
    }
}
