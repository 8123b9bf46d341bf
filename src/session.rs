//! The per-flow session record (§3 of the design spec).

use std::net::Ipv4Addr;

use crate::flow_key::FlowKey;
use crate::timer_wheel::TimerHandle;

/// Which protocol-specific estimator a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ProtocolVariant {
    Tcp,
    Quic,
    Plus,
}

/// A session is ACTIVE from creation until something marks it ERROR (a
/// rewrite mismatch bad enough that the session should stop being
/// re-armed); the timer wheel removes it either way once its slot passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SessionState {
    Active,
    Error,
}

/// Estimator state for the TCP VEC/timestamp-option RTT method.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TcpEstimatorState {
    /// Last VEC triple observed on the forward path, and the time it was seen.
    pub last_vec: Option<(u8, f64)>,
    /// `(tsval, t)` recorded on the last forward segment carrying a timestamp option.
    pub last_forward_ts: Option<(u32, f64)>,
    pub last_rtt: Option<f64>,
}

/// Estimator state for the QUIC spin-bit RTT method.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QuicEstimatorState {
    pub last_forward_spin: Option<bool>,
    pub last_reverse_spin: Option<bool>,
    pub last_forward_packet_number: Option<u64>,
    /// Timestamp of the last observed forward spin-value transition.
    pub last_spin_edge_time: Option<f64>,
    pub last_rtt: Option<f64>,
}

/// Estimator state for the PLUS PSN/PSE RTT method.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PlusEstimatorState {
    /// `(PSN, t)` recorded on the last forward packet.
    pub last_forward_psn: Option<(u32, f64)>,
    pub last_rtt: Option<f64>,
    pub cat: u64,
}

/// Tagged union of per-protocol estimator state, fixed at session creation.
#[derive(Debug, Clone, serde::Serialize)]
pub enum Estimator {
    Tcp(TcpEstimatorState),
    Quic(QuicEstimatorState),
    Plus(PlusEstimatorState),
}

impl Estimator {
    pub fn new(variant: ProtocolVariant, cat: u64) -> Self {
        match variant {
            ProtocolVariant::Tcp => Estimator::Tcp(TcpEstimatorState::default()),
            ProtocolVariant::Quic => Estimator::Quic(QuicEstimatorState::default()),
            ProtocolVariant::Plus => Estimator::Plus(PlusEstimatorState {
                cat,
                ..Default::default()
            }),
        }
    }

    pub fn last_rtt(&self) -> Option<f64> {
        match self {
            Estimator::Tcp(s) => s.last_rtt,
            Estimator::Quic(s) => s.last_rtt,
            Estimator::Plus(s) => s.last_rtt,
        }
    }
}

/// A tracked flow. Reachable by exactly two keys (`key`, `key_reverse`) until
/// [`crate::session_table::SessionTable::remove`] tears both aliases down.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Session {
    pub index: usize,
    pub protocol_variant: ProtocolVariant,
    pub key: FlowKey,
    pub key_reverse: FlowKey,
    /// Frozen from the first observed packet; never changes afterward.
    pub init_src_ip: Ipv4Addr,
    pub init_src_port: u16,
    /// The destination the initiator itself addressed, read from the
    /// creating packet's own (pre-rewrite) IPv4 header. Restored onto the
    /// reverse path's source address so the initiator keeps seeing the peer
    /// it originally dialed rather than the backend it was redirected to.
    pub init_dst_ip: Ipv4Addr,
    /// The backend this flow was bound to at creation; never changes.
    pub new_dst_ip: Ipv4Addr,
    pub pkt_count: u32,
    pub state: SessionState,
    pub timer_handle: TimerHandle,
    pub estimator: Estimator,
}

impl Session {
    /// True if `src_ip`/`src_port` match the frozen initiator identity.
    pub fn is_forward(&self, src_ip: Ipv4Addr, src_port: u16) -> bool {
        src_ip == self.init_src_ip && src_port == self.init_src_port
    }

    /// True if `src_ip`/`dst_ip` match what genuine return traffic from the
    /// bound backend looks like. A packet that is neither forward nor
    /// reverse under these two checks is spurious (§4.6 step 10).
    pub fn is_reverse(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        src_ip == self.new_dst_ip && dst_ip == self.init_src_ip
    }
}
