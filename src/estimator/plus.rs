//! PLUS PSN/PSE RTT estimation (§4.5).

use crate::headers::plus::PlusHeader;
use crate::session::PlusEstimatorState;

/// Updates `state` from one PLUS packet.
pub fn update(state: &mut PlusEstimatorState, now: f64, forward: bool, header: &PlusHeader) {
    if forward {
        state.last_forward_psn = Some((header.psn, now));
    } else if let Some((psn, t)) = state.last_forward_psn
        && header.pse == psn
    {
        state.last_rtt = Some(now - t);
    }
}
