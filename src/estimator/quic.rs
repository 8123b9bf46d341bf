//! QUIC spin-bit RTT estimation (§4.4).

use crate::headers::quic::QuicHeader;
use crate::session::QuicEstimatorState;

/// Updates `state` from one QUIC packet.
pub fn update(state: &mut QuicEstimatorState, now: f64, forward: bool, header: &QuicHeader) {
    if forward {
        if state.last_forward_spin != Some(header.spin) {
            state.last_spin_edge_time = Some(now);
        }
        state.last_forward_spin = Some(header.spin);
        state.last_forward_packet_number = Some(header.packet_number);
    } else {
        let is_new_reflection = state.last_forward_spin == Some(header.spin) && state.last_reverse_spin != Some(header.spin);
        if is_new_reflection
            && let Some(edge_t) = state.last_spin_edge_time
        {
            state.last_rtt = Some(now - edge_t);
        }
        state.last_reverse_spin = Some(header.spin);
    }
}
