use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use syndicate_governance::{DistributionLedger, TokenKind, VotingPowerLedger};
use syndicate_types::Address;

const HISTORY: u64 = 4_096;

/// One holder whose power changed `HISTORY` times.
fn long_history() -> (VotingPowerLedger, Address) {
    let mut ledger = VotingPowerLedger::new();
    let holder = Address::derive(b"holder");
    for t in 1..=HISTORY {
        ledger.mint(holder, 1, None, t * 10).unwrap();
    }
    (ledger, holder)
}

fn bench_power_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("voting_power");
    let (ledger, holder) = long_history();
    let t = HISTORY * 5 + 3;
    let hint = ledger.find_snapshot_index(&holder, t);

    group.bench_function("power_at_4k_snapshots", |b| {
        b.iter(|| black_box(ledger.power_at(black_box(&holder), black_box(t))))
    });

    group.bench_function("power_at_with_hint", |b| {
        b.iter(|| black_box(ledger.power_at_with_hint(&holder, t, hint).unwrap()))
    });

    group.bench_function("mint", |b| {
        b.iter_batched(
            || ledger.clone(),
            |mut ledger| {
                black_box(ledger.mint(holder, 1, None, HISTORY * 10 + 1).unwrap());
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

fn bench_distribution(c: &mut Criterion) {
    let mut group = c.benchmark_group("distribution");
    let shares: u64 = 1_000;

    group.bench_function("claim_1k_shares", |b| {
        b.iter_batched(
            || {
                let mut ledger = DistributionLedger::new();
                let id = ledger
                    .create(
                        TokenKind::Native,
                        1_000_000_007,
                        250,
                        Address::derive(b"fee"),
                        shares as u128,
                        0,
                    )
                    .unwrap();
                (ledger, id)
            },
            |(mut ledger, id)| {
                for share in 1..=shares {
                    black_box(ledger.claim(id, share, 1).unwrap());
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_power_lookup, bench_distribution);
criterion_main!(benches);
