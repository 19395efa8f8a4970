//! Benchmarks for the lifecycle scoring hot path

use std::collections::HashMap;

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use memoria::context::Ranker;
use memoria::lifecycle::{
    DecayCalculator, DecayFunction, ImportanceInputs, ImportanceScorer,
};
use memoria::types::{LifecycleState, Memory, ScoredMemory};

fn bench_decay(c: &mut Criterion) {
    let calc = DecayCalculator::new(DecayFunction::Exponential { lambda: 0.05 }).unwrap();
    let now = Utc::now();
    let last_accessed = now - Duration::days(42);

    c.bench_function("decay_score", |b| {
        b.iter(|| calc.calculate_decay_score(black_box(last_accessed), black_box(now)))
    });
}

fn bench_importance(c: &mut Criterion) {
    let scorer = ImportanceScorer::default();
    let now = Utc::now();
    let inputs = ImportanceInputs {
        access_count: 17,
        created_at: now - Duration::days(90),
        relationship_count: 4,
        confidence: 0.8,
    };

    c.bench_function("importance_score", |b| {
        b.iter(|| scorer.score(black_box(&inputs), black_box(now)))
    });
}

fn bench_rank(c: &mut Criterion) {
    let now = Utc::now();
    let results: Vec<ScoredMemory> = (0i64..100)
        .map(|i| ScoredMemory {
            memory: Memory {
                id: format!("m{}", i),
                workspace_id: "bench".to_string(),
                conversation_id: None,
                memory_type: "fact".to_string(),
                content: "benchmark content".to_string(),
                confidence: (i as f64 % 10.0) / 10.0,
                metadata: HashMap::new(),
                lifecycle_state: LifecycleState::Active,
                last_accessed_at: now - Duration::days(i % 120),
                access_count: i,
                importance_score: 0.5,
                decay_score: 1.0 - (i as f64 / 200.0),
                effective_ttl_ms: None,
                pinned: i % 7 == 0,
                pinned_by: None,
                pinned_at: None,
                archived_at: None,
                expires_at: None,
                vector_pending: false,
                content_hash: None,
                created_at: now - Duration::days(i % 120),
                updated_at: now,
            },
            similarity_score: 1.0 - (i as f64 / 100.0),
            rank: 0.0,
        })
        .collect();

    let ranker = Ranker::default();
    c.bench_function("rank_100", |b| {
        b.iter(|| ranker.rank(black_box(results.clone()), black_box(now)))
    });
}

criterion_group!(benches, bench_decay, bench_importance, bench_rank);
criterion_main!(benches);
