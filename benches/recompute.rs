use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use tallyrank::{
    Candidate, CandidateId, CandidateStore, LocalCache, NewEvent, Party, PartyStore, ScoringConfig, ScoringService,
    Stores, VoterIdentity,
};

const PARTIES: usize = 8;
const CANDIDATES: usize = 256;

fn seeded_service() -> (ScoringService, Vec<CandidateId>) {
    let service = ScoringService::new(
        Stores::from(tallyrank::storage::InMemoryStores::new()),
        Arc::new(LocalCache::default()),
        ScoringConfig::default(),
    )
    .unwrap();

    let parties: Vec<_> = (0..PARTIES)
        .map(|i| {
            let p = Party::new(format!("party-{i}"));
            let id = p.id;
            service.stores().parties.insert(p).unwrap();
            id
        })
        .collect();

    // Spread integrity, risk and popularity so scores differ.
    let ids = (0..CANDIDATES)
        .map(|i| {
            let c = Candidate::new(format!("candidate-{i}"), if i % 2 == 0 { "senator" } else { "deputy" })
                .in_party(parties[i % PARTIES])
                .with_integrity_risk((i % 100) as f64, ((i * 7) % 100) as f64)
                .with_popularity((i as u64) * 37);
            let id = c.id;
            service.stores().candidates.insert(c).unwrap();
            id
        })
        .collect();
    (service, ids)
}

fn bench_full_sweep(c: &mut Criterion) {
    let (service, _) = seeded_service();
    let mut group = c.benchmark_group("sweep");
    group.throughput(Throughput::Elements(CANDIDATES as u64));
    group.bench_function("recompute_all", |b| {
        b.iter(|| service.recompute_all().unwrap());
    });
    group.finish();
}

fn bench_cached_reads(c: &mut Criterion) {
    let (service, ids) = seeded_service();
    service.recompute_all().unwrap();
    let mut i = 0usize;
    c.bench_function("score/cached_read", |b| {
        b.iter(|| {
            i = (i + 1) % ids.len();
            service.get_score(ids[i]).unwrap()
        });
    });
}

fn bench_event_cascade(c: &mut Criterion) {
    let (service, ids) = seeded_service();
    let target = ids[0];
    c.bench_function("cascade/validate_event", |b| {
        b.iter_batched(
            || service.create_event(NewEvent::new(target, "achievement", 2.0)).unwrap(),
            |event| service.validate_event(event.id).unwrap(),
            BatchSize::SmallInput,
        );
    });
}

fn bench_vote_path(c: &mut Criterion) {
    c.bench_function("cascade/cast_vote", |b| {
        b.iter_batched(
            seeded_service,
            |(service, ids)| {
                // Fresh identity per vote so the gate admits every one.
                for (n, id) in ids.iter().take(16).enumerate() {
                    let voter = VoterIdentity::new(format!("10.0.0.{n}"), format!("bench-{n}"));
                    service.cast_vote(&voter, *id).unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_full_sweep,
    bench_cached_reads,
    bench_event_cascade,
    bench_vote_path
);
criterion_main!(benches);
