//! The trace record emitted per packet when tracing is armed (§6), and the
//! sink trait that is the seam to the host's trace/log collaborator.

use std::net::Ipv4Addr;

use crate::session::ProtocolVariant;

/// One packet's worth of observable state, emitted after rewrite so the
/// addresses reflect what actually went out on the wire.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TraceRecord {
    pub src_port: u16,
    pub dst_port: u16,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol_variant: ProtocolVariant,
    pub pkt_count: u32,
}

/// Seam for the host's trace/log sink (§1's "out of scope" collaborator).
pub trait TraceSink {
    fn emit(&mut self, record: &TraceRecord);
}

impl TraceSink for Vec<TraceRecord> {
    fn emit(&mut self, record: &TraceRecord) {
        self.push(record.clone());
    }
}
