//! Builds one `Pipeline`, feeds it a hand-built TCP flow (SYN, then a
//! timestamp-carrying segment in each direction), and prints the resulting
//! trace records. No sockets, no real traffic -- just the core in isolation.

use std::net::Ipv4Addr;

use spin_relay::{DestinationMap, PipelineConfig, RawPacket, TraceRecord};

fn ipv4_tcp_segment(src: ([u8; 4], u16), dst: ([u8; 4], u16), flags: u8, timestamp: Option<(u32, u32)>) -> Vec<u8> {
    let tcp_header_len = if timestamp.is_some() { 40 } else { 20 };
    let total_len = 20 + tcp_header_len;
    let mut p = vec![0u8; total_len];
    p[0] = 0x45;
    p[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    p[9] = 6; // TCP
    p[12..16].copy_from_slice(&src.0);
    p[16..20].copy_from_slice(&dst.0);
    p[20..22].copy_from_slice(&src.1.to_be_bytes());
    p[22..24].copy_from_slice(&dst.1.to_be_bytes());
    p[32] = ((tcp_header_len / 4) as u8) << 4;
    p[33] = flags;
    if let Some((tsval, tsecr)) = timestamp {
        p[40] = 8;
        p[41] = 10;
        p[42..46].copy_from_slice(&tsval.to_be_bytes());
        p[46..50].copy_from_slice(&tsecr.to_be_bytes());
    }
    p
}

fn main() {
    tracing_subscriber::fmt::init();

    let config = PipelineConfig::builder()
        .destinations(DestinationMap::from_entries([(80u16, Ipv4Addr::new(192, 168, 1, 10))]))
        .build()
        .expect("valid configuration");
    let mut pipeline = spin_relay::Pipeline::new(config);

    let client = ([10, 0, 0, 1], 5000);
    let dialed = ([10, 0, 0, 2], 80);
    let backend = ([192, 168, 1, 10], 80);

    let mut sink: Vec<TraceRecord> = Vec::new();

    let mut syn = RawPacket::new(ipv4_tcp_segment(client, dialed, 0x02, None));
    pipeline.process(&mut syn, 0.0, Some(&mut sink));

    let mut forward = RawPacket::new(ipv4_tcp_segment(client, dialed, 0x10, Some((1000, 0))));
    pipeline.process(&mut forward, 10.0, Some(&mut sink));

    let mut reverse = RawPacket::new(ipv4_tcp_segment(backend, client, 0x10, Some((0, 1000))));
    pipeline.process(&mut reverse, 10.25, Some(&mut sink));

    for record in &sink {
        println!("{record:?}");
    }
}
