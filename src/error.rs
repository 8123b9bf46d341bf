//! Error surface (§7). Every variant is non-fatal and local to a single
//! packet: the pipeline logs it via `tracing` and forwards the packet
//! unchanged. Construction here never allocates on the hot path beyond what
//! was already being examined (offsets, a copy of the rejected field), and
//! the crate's own style -- a manual `Display`/`Error` impl rather than
//! `thiserror` -- follows the teacher's own `NetflowError`.
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum SpinRelayError {
    /// A length check failed while parsing a header.
    ShortHeader { context: &'static str, needed: usize, available: usize },
    /// `dst_port` was not present in the destination map on the first-packet path.
    UnknownDestination { dst_port: u16 },
    /// The IPv4 version nibble was not 4.
    Ipv6OrUnsupported { version_nibble: u8 },
    /// TCP option parsing rejected the header (ill-formed length or overrun).
    BadOptions { context: &'static str },
    /// The packet matched a session by key but is neither forward nor
    /// reverse under the session's frozen init addresses.
    RewriteMismatch,
    /// The session pool was full on a creation attempt.
    PoolExhausted,
}

impl fmt::Display for SpinRelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpinRelayError::ShortHeader { context, needed, available } => {
                write!(f, "short header while parsing {context}: needed {needed} bytes, have {available}")
            }
            SpinRelayError::UnknownDestination { dst_port } => {
                write!(f, "no backend mapped for destination port {dst_port}")
            }
            SpinRelayError::Ipv6OrUnsupported { version_nibble } => {
                write!(f, "unsupported IP version nibble {version_nibble}")
            }
            SpinRelayError::BadOptions { context } => write!(f, "bad TCP options: {context}"),
            SpinRelayError::RewriteMismatch => {
                write!(f, "packet matched a session but is neither forward nor reverse")
            }
            SpinRelayError::PoolExhausted => write!(f, "session pool exhausted"),
        }
    }
}

impl std::error::Error for SpinRelayError {}
