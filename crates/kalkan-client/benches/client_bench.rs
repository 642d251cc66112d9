// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the session facade: per-call overhead of the
// serialized engine path, CMS signing, and buffer sizing.

use std::sync::Arc;
use std::thread;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use kalkan_client::sizing::{self, OperationKind};
use kalkan_client::{ClientConfig, Session, SignInput, SoftEngine, VerifyInput};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn session() -> Session {
    Session::open(ClientConfig::default(), Box::new(SoftEngine::new())).expect("open session")
}

fn session_with_key() -> Session {
    let session = session();
    let store = SoftEngine::generate_key_store("BENCH USER", "bench").expect("key store");
    session
        .load_key_store_bytes(&store, "bench")
        .expect("load key store");
    session
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// SHA-256 through the facade at several payload sizes. Includes base64
/// encoding of the input and the lock round trip.
fn bench_hash(c: &mut Criterion) {
    let session = session();
    let sizes: &[(&str, usize)] = &[("1 KiB", 1024), ("64 KiB", 64 * 1024), ("1 MiB", 1024 * 1024)];

    let mut group = c.benchmark_group("session_hash_sha256");
    for &(label, size) in sizes {
        let data = vec![0x5Au8; size];
        group.bench_function(label, |b| {
            b.iter(|| black_box(session.hash_sha256(black_box(&data)).expect("hash")));
        });
    }
    group.finish();
}

/// Attached CMS sign followed by verification of the result.
fn bench_sign_verify(c: &mut Criterion) {
    let session = session_with_key();
    let data = vec![0x42u8; 10 * 1024];

    c.bench_function("sign_verify_cms (10 KiB)", |b| {
        b.iter(|| {
            let cms = session
                .sign(&SignInput {
                    data: black_box(data.clone()),
                    ..SignInput::default()
                })
                .expect("sign");
            let result = session
                .verify(&VerifyInput {
                    signature: cms,
                    ..VerifyInput::default()
                })
                .expect("verify");
            assert!(result.is_valid());
        });
    });
}

/// Four threads contending for the engine lock.
fn bench_contended_hash(c: &mut Criterion) {
    let session = Arc::new(session());

    c.bench_function("contended_hash (4 threads x 25 calls)", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let session = Arc::clone(&session);
                    thread::spawn(move || {
                        for _ in 0..25 {
                            black_box(session.hash_sha256(b"contended").expect("hash"));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("worker");
            }
        });
    });
}

fn bench_sizing(c: &mut Criterion) {
    c.bench_function("buffer_capacity", |b| {
        b.iter(|| {
            let mut total = 0usize;
            for n in [0usize, 1024, 1 << 20, usize::MAX / 2] {
                total = total.wrapping_add(sizing::capacity(OperationKind::Sign, black_box(n)));
                total = total.wrapping_add(sizing::capacity(OperationKind::VerifyData, black_box(n)));
            }
            black_box(total)
        });
    });
}

criterion_group!(
    benches,
    bench_hash,
    bench_sign_verify,
    bench_contended_hash,
    bench_sizing
);
criterion_main!(benches);
