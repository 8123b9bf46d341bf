//! TCP VEC-spin and timestamp-option RTT estimation (§4.3).

use crate::headers::tcp::TcpHeader;
use crate::session::TcpEstimatorState;

const VEC_VALID: u8 = 0b100;
const VEC_EDGE: u8 = 0b010;
const VEC_SPIN: u8 = 0b001;

/// Updates `state` from one TCP segment. SYN+ACK segments carry no VEC
/// sample (but the caller still runs rewrite on them regardless of what
/// this function does).
pub fn update(state: &mut TcpEstimatorState, now: f64, forward: bool, header: &TcpHeader) {
    if header.is_syn_ack() {
        return;
    }

    update_vec(state, now, forward, header.vec);
    update_timestamp(state, now, forward, header.tsval, header.tsecr);
}

fn update_vec(state: &mut TcpEstimatorState, now: f64, forward: bool, vec: u8) {
    let valid = vec & VEC_VALID != 0;
    let edge = vec & VEC_EDGE != 0;
    let spin = vec & VEC_SPIN != 0;
    if !valid {
        return;
    }

    if forward {
        if edge {
            state.last_vec = Some((vec & VEC_SPIN, now));
        }
    } else if let Some((recorded_spin, t)) = state.last_vec
        && (spin as u8) == recorded_spin
    {
        state.last_rtt = Some(now - t);
    }
}

fn update_timestamp(state: &mut TcpEstimatorState, now: f64, forward: bool, tsval: Option<u32>, tsecr: Option<u32>) {
    if forward {
        if let Some(v) = tsval {
            state.last_forward_ts = Some((v, now));
        }
    } else if let (Some(echo), Some((recorded_val, t))) = (tsecr, state.last_forward_ts)
        && echo == recorded_val
    {
        state.last_rtt = Some(now - t);
    }
}
