//! The per-packet pipeline (§4.6): parse, flow-key, session lookup/creation,
//! estimator dispatch, IP rewrite, checksum recomputation, trace emission.

use crate::checksum;
use crate::config::PipelineConfig;
use crate::estimator;
use crate::flow_key::{self, IpProto, PacketTuple};
use crate::headers::{plus, quic, tcp, udp};
use crate::session::{Estimator, ProtocolVariant, SessionState};
use crate::session_table::{SessionHandle, SessionTable};
use crate::timer_wheel::TimerWheel;
use crate::trace::{TraceRecord, TraceSink};
use crate::{headers, SpinRelayError};

/// Seam to the host's packet-processing framework (§6): a contiguous byte
/// buffer with a read cursor the core may advance and must restore before
/// handing the buffer back.
pub trait PacketBuffer {
    fn cursor(&self) -> usize;
    fn set_cursor(&mut self, pos: usize);
    fn len(&self) -> usize;
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A `Vec<u8>`-backed [`PacketBuffer`] for tests and the demos; a real host
/// implements the trait over its own buffer type instead.
#[derive(Debug, Clone)]
pub struct RawPacket {
    data: Vec<u8>,
    cursor: usize,
}

impl RawPacket {
    pub fn new(data: Vec<u8>) -> Self {
        RawPacket { data, cursor: 0 }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl PacketBuffer for RawPacket {
    fn cursor(&self) -> usize {
        self.cursor
    }
    fn set_cursor(&mut self, pos: usize) {
        self.cursor = pos;
    }
    fn len(&self) -> usize {
        self.data.len()
    }
    fn bytes(&self) -> &[u8] {
        &self.data
    }
    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// What [`Pipeline::process`] did with a packet. Every packet is forwarded;
/// per §7 policy there is no per-packet `Result` -- a trace record is
/// attached only when the packet reached a tracked session.
#[derive(Debug, Clone, Default)]
pub struct PacketOutcome {
    pub trace: Option<TraceRecord>,
}

enum Dispatch {
    Tcp(tcp::TcpHeader),
    Quic { udp: udp::UdpHeader, header: quic::QuicHeader },
    Plus { udp: udp::UdpHeader, header: plus::PlusHeader },
}

/// One shard of the middlebox core: a session table, a timer wheel, and the
/// boot-time configuration that binds them together. The host constructs one
/// `Pipeline` per shard/core (§5); nothing here is shared across shards.
pub struct Pipeline {
    config: PipelineConfig,
    sessions: SessionTable,
    timer: TimerWheel,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let capacity = config.session_capacity;
        let tick_secs = config.tick_secs;
        Pipeline {
            sessions: SessionTable::new(capacity),
            timer: TimerWheel::with_tick(capacity, 0.0, tick_secs),
            config,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Looks a flow up the same way the pipeline would, for tests that need
    /// to assert on session state directly.
    pub fn lookup_session(&self, tuple: &PacketTuple) -> Option<SessionHandle> {
        self.sessions
            .lookup(flow_key::forward_key(tuple))
            .or_else(|| self.sessions.lookup(flow_key::reverse_lookup_key(tuple)))
    }

    pub fn session(&self, handle: SessionHandle) -> Option<&crate::session::Session> {
        self.sessions.get(handle)
    }

    /// Runs the full §4.6 algorithm on one packet. The buffer's read cursor
    /// is always restored to its entry position before returning, whatever
    /// path the packet took through the pipeline -- a single exit label, per
    /// the "scoped acquisition of the buffer cursor" design note.
    pub fn process(
        &mut self,
        buf: &mut impl PacketBuffer,
        now: f64,
        trace: Option<&mut dyn TraceSink>,
    ) -> PacketOutcome {
        self.expire_sessions(now);

        let start_cursor = buf.cursor();
        let outcome = self.process_packet(buf, now);
        buf.set_cursor(start_cursor);

        if let (Some(sink), Some(record)) = (trace, outcome.trace.as_ref()) {
            sink.emit(record);
        }
        outcome
    }

    fn expire_sessions(&mut self, now: f64) {
        let mut expired = Vec::new();
        self.timer.expire(now, |idx| expired.push(idx));
        for idx in expired {
            tracing::debug!(session = idx, "session expired");
            self.sessions.remove(SessionHandle(idx));
        }
    }

    fn process_packet<B: PacketBuffer>(&mut self, buf: &mut B, now: f64) -> PacketOutcome {
        let base = buf.cursor();

        let ipv4 = match headers::ipv4::parse(&buf.bytes()[base..]) {
            Ok(h) => h,
            Err(e) => {
                tracing::trace!(error = %e, "ipv4 parse skipped");
                return PacketOutcome::default();
            }
        };
        let Some(ip_proto) = ipv4.protocol() else {
            return PacketOutcome::default();
        };

        let transport_start = base + ipv4.header_len;
        let dispatch = match self.parse_transport(ip_proto, &buf.bytes()[transport_start..]) {
            Some(d) => d,
            None => return PacketOutcome::default(),
        };

        let (src_port, dst_port, protocol_variant, cat) = match &dispatch {
            Dispatch::Tcp(h) => (h.src_port, h.dst_port, ProtocolVariant::Tcp, 0u64),
            Dispatch::Quic { udp, .. } => (udp.src_port, udp.dst_port, ProtocolVariant::Quic, 0u64),
            Dispatch::Plus { udp, header } => (udp.src_port, udp.dst_port, ProtocolVariant::Plus, header.cat),
        };

        let tuple = PacketTuple {
            src_ip: ipv4.src_ip,
            dst_ip: ipv4.dst_ip,
            src_port,
            dst_port,
            proto: ip_proto,
            cat,
        };

        let handle = match self.find_or_create_session(&tuple, protocol_variant, cat) {
            Some(h) => h,
            None => return PacketOutcome::default(),
        };

        let session = self.sessions.get(handle).expect("handle just looked up or inserted");
        let forward = session.is_forward(ipv4.src_ip, src_port);
        let reverse = !forward && session.is_reverse(ipv4.src_ip, ipv4.dst_ip);
        if !forward && !reverse {
            tracing::trace!(session = handle.0, error = %SpinRelayError::RewriteMismatch, "spurious packet skipped");
            return PacketOutcome::default();
        }

        self.run_estimator(handle, now, forward, &dispatch);
        self.apply_plus_hop_increment(buf, transport_start, &dispatch);

        let session = self.sessions.get_mut(handle).expect("handle still valid");
        session.pkt_count += 1;
        let pkt_count = session.pkt_count;
        let state = session.state;
        let new_src_ip = if forward { ipv4.src_ip } else { session.init_dst_ip };
        let new_dst_ip = if forward { session.new_dst_ip } else { session.init_src_ip };

        rewrite_and_checksum(buf, base, &ipv4, transport_start, &dispatch, new_src_ip, new_dst_ip);

        if state == SessionState::Active {
            self.timer.update(handle.0, self.config.timeout_ticks);
        }

        PacketOutcome {
            trace: Some(TraceRecord { src_port, dst_port, src_ip: new_src_ip, dst_ip: new_dst_ip, protocol_variant, pkt_count }),
        }
    }

    fn parse_transport(&self, ip_proto: IpProto, transport_bytes: &[u8]) -> Option<Dispatch> {
        match ip_proto {
            IpProto::Tcp => tcp::parse(transport_bytes).ok().map(Dispatch::Tcp),
            IpProto::Udp => {
                let udp_header = udp::parse(transport_bytes).ok()?;
                let payload = &transport_bytes[udp::LEN..];
                if udp_header.src_port == self.config.quic_port || udp_header.dst_port == self.config.quic_port {
                    quic::parse(payload).ok().map(|header| Dispatch::Quic { udp: udp_header, header })
                } else {
                    match plus::parse(payload, self.config.plus_magic, self.config.plus_magic_mask) {
                        Ok(header) => Some(Dispatch::Plus { udp: udp_header, header }),
                        Err(_) => None, // not PLUS either: fall through uninspected
                    }
                }
            }
        }
    }

    fn find_or_create_session(
        &mut self,
        tuple: &PacketTuple,
        protocol_variant: ProtocolVariant,
        cat: u64,
    ) -> Option<SessionHandle> {
        if let Some(handle) = self
            .sessions
            .lookup(flow_key::forward_key(tuple))
            .or_else(|| self.sessions.lookup(flow_key::reverse_lookup_key(tuple)))
        {
            return Some(handle);
        }

        let new_dst_ip = match self.config.destinations.get(tuple.dst_port) {
            Some(ip) => ip,
            None => {
                tracing::trace!(error = %SpinRelayError::UnknownDestination { dst_port: tuple.dst_port }, "left uninspected");
                return None;
            }
        };
        match self.sessions.insert(
            flow_key::forward_key(tuple),
            protocol_variant,
            tuple.src_ip,
            tuple.src_port,
            tuple.dst_ip,
            new_dst_ip,
            cat,
        ) {
            Ok(handle) => {
                self.sessions.alias(flow_key::reverse_alias_key(tuple, new_dst_ip), handle);
                self.timer.start(handle.0, self.config.timeout_ticks);
                tracing::debug!(session = handle.0, protocol = ?protocol_variant, "session created");
                Some(handle)
            }
            Err(_) => {
                tracing::warn!(error = %SpinRelayError::PoolExhausted, "new flow skipped");
                None
            }
        }
    }

    fn run_estimator(&mut self, handle: SessionHandle, now: f64, forward: bool, dispatch: &Dispatch) {
        let Some(session) = self.sessions.get_mut(handle) else { return };
        match (&mut session.estimator, dispatch) {
            (Estimator::Tcp(state), Dispatch::Tcp(header)) => estimator::tcp::update(state, now, forward, header),
            (Estimator::Quic(state), Dispatch::Quic { header, .. }) => estimator::quic::update(state, now, forward, header),
            (Estimator::Plus(state), Dispatch::Plus { header, .. }) => estimator::plus::update(state, now, forward, header),
            _ => {} // protocol_variant is fixed at creation; cannot mismatch in practice
        }
        if let Some(rtt) = session.estimator.last_rtt() {
            tracing::debug!(session = handle.0, rtt, "rtt sample");
        }
    }

    /// The one in-place payload mutation the core performs (§4.5), done
    /// before checksum recomputation so the UDP checksum covers it.
    fn apply_plus_hop_increment<B: PacketBuffer>(&self, buf: &mut B, transport_start: usize, dispatch: &Dispatch) {
        if let Dispatch::Plus { header, .. } = dispatch
            && let Some(offset) = header.hop_count_offset
        {
            let abs = transport_start + udp::LEN + offset;
            let bytes = buf.bytes_mut();
            bytes[abs] = bytes[abs].wrapping_add(1);
        }
    }
}

fn rewrite_and_checksum<B: PacketBuffer>(
    buf: &mut B,
    base: usize,
    ipv4: &headers::ipv4::Ipv4Header,
    transport_start: usize,
    dispatch: &Dispatch,
    new_src_ip: std::net::Ipv4Addr,
    new_dst_ip: std::net::Ipv4Addr,
) {
    let bytes = buf.bytes_mut();
    bytes[base + 12..base + 16].copy_from_slice(&new_src_ip.octets());
    bytes[base + 16..base + 20].copy_from_slice(&new_dst_ip.octets());

    let (checksum_offset, transport_proto) = match dispatch {
        Dispatch::Tcp(h) => (h.checksum_offset, IpProto::Tcp),
        Dispatch::Quic { udp, .. } | Dispatch::Plus { udp, .. } => (udp.checksum_offset, IpProto::Udp),
    };

    let segment_end = (base + ipv4.total_len as usize).clamp(transport_start, buf.len());
    let segment_checksum =
        checksum::transport_checksum(new_src_ip, new_dst_ip, transport_proto, &buf.bytes()[transport_start..segment_end], checksum_offset);
    buf.bytes_mut()[transport_start + checksum_offset..transport_start + checksum_offset + 2]
        .copy_from_slice(&segment_checksum.to_be_bytes());

    let ip_checksum = checksum::ipv4_header_checksum(&buf.bytes()[base..base + ipv4.header_len], ipv4.checksum_offset);
    buf.bytes_mut()[base + ipv4.checksum_offset..base + ipv4.checksum_offset + 2].copy_from_slice(&ip_checksum.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationMap, PipelineConfig};
    use std::net::Ipv4Addr;

    fn assert_send<T: Send>() {}

    #[test]
    fn pipeline_is_send() {
        assert_send::<Pipeline>();
    }

    fn ipv4_tcp_packet(src: ([u8; 4], u16), dst: ([u8; 4], u16), syn: bool) -> Vec<u8> {
        let mut p = vec![0u8; 40];
        p[0] = 0x45;
        p[2..4].copy_from_slice(&40u16.to_be_bytes());
        p[9] = 6;
        p[12..16].copy_from_slice(&src.0);
        p[16..20].copy_from_slice(&dst.0);

        p[20..22].copy_from_slice(&src.1.to_be_bytes());
        p[22..24].copy_from_slice(&dst.1.to_be_bytes());
        p[32] = 5 << 4; // data_offset=5, no options, VEC=0
        if syn {
            p[33] = 0x02;
        }
        p
    }

    fn config_with_backend(port: u16, backend: [u8; 4]) -> PipelineConfig {
        PipelineConfig::builder()
            .destinations(DestinationMap::from_entries([(port, Ipv4Addr::from(backend))]))
            .build()
            .unwrap()
    }

    #[test]
    fn first_tcp_packet_creates_session_and_rewrites_destination() {
        let config = config_with_backend(80, [192, 168, 1, 10]);
        let mut pipeline = Pipeline::new(config);
        let mut pkt = RawPacket::new(ipv4_tcp_packet(([10, 0, 0, 1], 5000), ([10, 0, 0, 2], 80), true));

        let outcome = pipeline.process(&mut pkt, 0.0, None);

        assert_eq!(pipeline.session_count(), 1);
        let record = outcome.trace.unwrap();
        assert_eq!(record.dst_ip, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(record.pkt_count, 2); // initialized to 1 at creation, incremented once

        let bytes = pkt.into_bytes();
        assert_eq!(&bytes[16..20], &[192, 168, 1, 10]);
    }

    #[test]
    fn cursor_is_restored_after_processing() {
        let config = config_with_backend(80, [192, 168, 1, 10]);
        let mut pipeline = Pipeline::new(config);
        let mut pkt = RawPacket::new(ipv4_tcp_packet(([10, 0, 0, 1], 5000), ([10, 0, 0, 2], 80), true));
        pkt.set_cursor(0);

        pipeline.process(&mut pkt, 0.0, None);
        assert_eq!(pkt.cursor(), 0);
    }

    #[test]
    fn unmapped_destination_port_is_left_uninspected() {
        let config = PipelineConfig::builder().build().unwrap();
        let mut pipeline = Pipeline::new(config);
        let mut pkt = RawPacket::new(ipv4_tcp_packet(([10, 0, 0, 1], 5000), ([10, 0, 0, 2], 80), true));

        let outcome = pipeline.process(&mut pkt, 0.0, None);
        assert!(outcome.trace.is_none());
        assert_eq!(pipeline.session_count(), 0);
    }

    #[test]
    fn reverse_segment_restores_initiator_addressed_destination() {
        let config = config_with_backend(80, [192, 168, 1, 10]);
        let mut pipeline = Pipeline::new(config);
        let mut forward = RawPacket::new(ipv4_tcp_packet(([10, 0, 0, 1], 5000), ([10, 0, 0, 2], 80), true));
        pipeline.process(&mut forward, 0.0, None);

        let mut reverse = RawPacket::new(ipv4_tcp_packet(([192, 168, 1, 10], 80), ([10, 0, 0, 1], 5000), false));
        let outcome = pipeline.process(&mut reverse, 0.1, None);

        let record = outcome.trace.unwrap();
        assert_eq!(record.src_ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(record.dst_ip, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn session_expires_after_timeout() {
        let config = PipelineConfig::builder()
            .destinations(DestinationMap::from_entries([(80u16, Ipv4Addr::new(192, 168, 1, 10))]))
            .timeout_ticks(2)
            .tick_secs(0.1)
            .build()
            .unwrap();
        let mut pipeline = Pipeline::new(config);
        let mut pkt = RawPacket::new(ipv4_tcp_packet(([10, 0, 0, 1], 5000), ([10, 0, 0, 2], 80), true));
        pipeline.process(&mut pkt, 0.0, None);
        assert_eq!(pipeline.session_count(), 1);

        let mut idle = RawPacket::new(ipv4_tcp_packet(([9, 9, 9, 9], 1), ([9, 9, 9, 9], 2), true));
        pipeline.process(&mut idle, 0.31, None);
        assert_eq!(pipeline.session_count(), 0);
    }
}
