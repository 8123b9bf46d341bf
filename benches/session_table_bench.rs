use std::hint::black_box;
use std::net::Ipv4Addr;

use criterion::{criterion_group, criterion_main, Criterion};
use spin_relay::session::ProtocolVariant;
use spin_relay::session_table::SessionTable;
use spin_relay::FlowKey;

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("session_table insert+remove", |b| {
        let mut table = SessionTable::new(4096);
        let mut i: u64 = 0;
        b.iter(|| {
            i += 1;
            let key = FlowKey(black_box(i));
            let handle = table
                .insert(
                    key,
                    ProtocolVariant::Tcp,
                    Ipv4Addr::new(10, 0, 0, 1),
                    5000,
                    Ipv4Addr::new(10, 0, 0, 2),
                    Ipv4Addr::new(192, 168, 1, 10),
                    0,
                )
                .unwrap();
            table.remove(handle);
        })
    });

    c.bench_function("session_table lookup hit", |b| {
        let mut table = SessionTable::new(4096);
        let key = FlowKey(42);
        table
            .insert(
                key,
                ProtocolVariant::Tcp,
                Ipv4Addr::new(10, 0, 0, 1),
                5000,
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(192, 168, 1, 10),
                0,
            )
            .unwrap();
        b.iter(|| black_box(table.lookup(key)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
