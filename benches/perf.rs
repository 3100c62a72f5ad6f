use chrono::NaiveDate;
use criterion::{Criterion, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;

use natrank::diagnostics::split_rhat;
use natrank::match_data::MatchRecord;
use natrank::model::ModelInput;
use natrank::posterior::PosteriorEnsemble;
use natrank::ratings::aggregate_ratings;
use natrank::registry::TeamRegistry;
use natrank::sampler::{SamplerConfig, sample_posterior};
use natrank::weighting::{DateSpan, match_weight};

fn synthetic_matches(teams: usize, rounds: usize) -> Vec<MatchRecord> {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let start = NaiveDate::from_ymd_opt(2024, 1, 6).expect("valid date");
    let mut out = Vec::new();
    let mut day = 0i64;
    for _ in 0..rounds {
        for home in 0..teams {
            let away = (home + 1 + rng.gen_range(0..teams - 1)) % teams;
            out.push(MatchRecord {
                date: start + chrono::Duration::days(day),
                home_team: format!("Team {home:02}"),
                away_team: format!("Team {away:02}"),
                home_score: rng.gen_range(0..5),
                away_score: rng.gen_range(0..4),
                tournament: if day % 3 == 0 {
                    "FIFA World Cup qualification".to_string()
                } else {
                    "Friendly".to_string()
                },
                neutral: rng.gen_bool(0.2),
            });
            day = (day + 1) % 700;
        }
    }
    out
}

fn model_input(teams: usize, rounds: usize) -> (ModelInput, TeamRegistry) {
    let matches = synthetic_matches(teams, rounds);
    let registry = TeamRegistry::from_first_appearance(&matches, &[]);
    let span = DateSpan::of_matches(&matches).expect("non-empty matches");
    let input = ModelInput::build(&matches, &registry, &span).expect("input builds");
    (input, registry)
}

fn bench_gradient_eval(c: &mut Criterion) {
    let (input, _) = model_input(40, 15);
    let dim = input.layout().dim();
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let theta: Vec<f64> = (0..dim).map(|_| rng.gen_range(-0.3..0.3)).collect();
    let mut grad = vec![0.0; dim];

    c.bench_function("gradient_eval", |b| {
        b.iter(|| {
            let lp = input.log_posterior_and_grad(black_box(&theta), &mut grad);
            black_box(lp);
        })
    });
}

fn bench_match_weights(c: &mut Criterion) {
    let matches = synthetic_matches(32, 20);
    let span = DateSpan::of_matches(&matches).expect("non-empty matches");

    c.bench_function("match_weights", |b| {
        b.iter(|| {
            let total: f64 = matches
                .iter()
                .map(|m| match_weight(black_box(m), &span).expect("positive weight"))
                .sum();
            black_box(total);
        })
    });
}

fn bench_short_fit(c: &mut Criterion) {
    let (input, _) = model_input(4, 15);
    let config = SamplerConfig {
        chains: 1,
        iterations: 80,
        warmup: 40,
        target_accept: 0.9,
        seed: 17,
        ..SamplerConfig::default()
    };

    c.bench_function("short_fit", |b| {
        b.iter(|| {
            let output = sample_posterior(black_box(&input), &config).expect("fit runs");
            black_box(output.total_divergences());
        })
    });
}

fn bench_rating_aggregation(c: &mut Criterion) {
    let (input, registry) = model_input(40, 15);
    let layout = input.layout();
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let chains: Vec<Vec<Vec<f64>>> = (0..3)
        .map(|_| {
            (0..500)
                .map(|_| (0..layout.dim()).map(|_| rng.gen_range(-1.0..1.0)).collect())
                .collect()
        })
        .collect();
    let ensemble = PosteriorEnsemble::new(layout, chains);

    c.bench_function("rating_aggregation", |b| {
        b.iter(|| {
            let rows = aggregate_ratings(black_box(&registry), &ensemble).expect("aggregates");
            black_box(rows.len());
        })
    });
}

fn bench_split_rhat(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(29);
    let chains: Vec<Vec<f64>> = (0..4)
        .map(|_| (0..1500).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();

    c.bench_function("split_rhat", |b| {
        b.iter(|| {
            black_box(split_rhat(black_box(&chains)));
        })
    });
}

criterion_group!(
    perf,
    bench_gradient_eval,
    bench_match_weights,
    bench_short_fit,
    bench_rating_aggregation,
    bench_split_rhat
);
criterion_main!(perf);
