use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use proctor_core::loader::{build_question_set, normalize_bank};
use proctor_core::model::{ExamConfig, RawQuestion};

fn bank(n: usize, gap_every: usize) -> ExamConfig {
    let questions = (1..=n)
        .filter(|i| gap_every == 0 || i % gap_every != 0)
        .map(|i| RawQuestion {
            code: Some(i.to_string()),
            prompt: format!("Question {i}"),
            answer: Some(format!("answer {i}")),
            timeout_seconds: None,
        })
        .collect();
    ExamConfig {
        questions,
        global_timeout_seconds: Some(3600),
        default_per_question_timeout_seconds: Some(30),
    }
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_bank");

    let dense = bank(1000, 0);
    let sparse = bank(1000, 3);

    group.bench_function("1000_dense", |b| {
        b.iter(|| normalize_bank(black_box(&dense), 30))
    });

    group.bench_function("1000_with_gaps", |b| {
        b.iter(|| normalize_bank(black_box(&sparse), 30))
    });

    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_question_set");

    for n in [10, 100, 1000] {
        let config = bank(n, 0);
        group.bench_function(format!("{n}_questions"), |b| {
            let mut rng = StdRng::seed_from_u64(42);
            b.iter(|| build_question_set("BENCH", black_box(&config), 30, &mut rng))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_build);
criterion_main!(benches);
