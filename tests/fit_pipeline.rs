use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};

use natrank::pipeline::{RunConfig, ScheduleSource, run_pipeline};
use natrank::posterior::FitArtifact;
use natrank::ratings::{RatingRow, aggregate_ratings, render_ratings_csv};
use natrank::sampler::SamplerConfig;

// Three teams playing a full synthetic season with known abilities, plus a
// newcomer whose only appearance arrives through a tournament schedule.
const STRONG_A: &str = "Arcadia";
const STRONG_B: &str = "Borduria";
const WEAK_C: &str = "Carpathia";
const NEWCOMER_D: &str = "Delos";

const TRUE_ALPHA: [(&str, f64); 3] = [(STRONG_A, 0.5), (STRONG_B, 0.5), (WEAK_C, -1.0)];
const TRUE_DELTA: f64 = 0.25;

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("natrank_{tag}_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("scratch dir should be creatable");
    dir
}

fn draw_goals(rng: &mut ChaCha8Rng, lambda: f64) -> u32 {
    Poisson::new(lambda).expect("positive rate").sample(rng) as u32
}

/// 25 home-and-away rounds per pair over one calendar year, scores drawn
/// from the generating model itself.
fn synthetic_results_csv(seed: u64) -> String {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut out = String::from(
        "date,home_team,away_team,home_score,away_score,tournament,city,country,neutral\n",
    );
    let start = NaiveDate::from_ymd_opt(2025, 1, 5).expect("valid date");
    let mut day = 0i64;
    for round in 0..25 {
        for (i, j) in [(0usize, 1usize), (0, 2), (1, 2)] {
            let (h, a) = if round % 2 == 0 { (i, j) } else { (j, i) };
            let (home, home_alpha) = TRUE_ALPHA[h];
            let (away, away_alpha) = TRUE_ALPHA[a];
            let date = start + chrono::Duration::days(day);
            day += 4;
            let home_goals = draw_goals(&mut rng, (home_alpha - away_alpha + TRUE_DELTA).exp());
            let away_goals = draw_goals(&mut rng, (away_alpha - home_alpha).exp());
            out.push_str(&format!(
                "{date},{home},{away},{home_goals},{away_goals},Friendly,{home} City,{home},FALSE\n"
            ));
        }
    }
    out
}

fn schedule_csv() -> String {
    // Arcadia edges the newcomer 2-1 on neutral ground.
    format!(
        "date,team1,team2,location,score1,score2\n2026-06-15,{STRONG_A},{NEWCOMER_D},Lusail,2,1\n"
    )
}

fn test_run_config(dir: &Path, seed: u64) -> RunConfig {
    let results_path = dir.join("results.csv");
    let schedule_path = dir.join("schedule.csv");
    fs::write(&results_path, synthetic_results_csv(7)).expect("results fixture written");
    fs::write(&schedule_path, schedule_csv()).expect("schedule fixture written");

    RunConfig {
        results_path,
        schedules: vec![ScheduleSource {
            label: "FIFA World Cup".to_string(),
            path: schedule_path,
        }],
        since: NaiveDate::from_ymd_opt(2025, 1, 1),
        min_appearances: 20,
        sampler: SamplerConfig {
            chains: 2,
            iterations: 700,
            warmup: 350,
            seed,
            // Short test chains get a little more diagnostic slack than a
            // production run.
            max_rhat: 1.1,
            max_divergence_fraction: 0.01,
            ..SamplerConfig::default()
        },
        ratings_out: dir.join("ratings.csv"),
        artifact_out: Some(dir.join("fit.json")),
        workbook_out: None,
    }
}

fn row<'a>(rows: &'a [RatingRow], team: &str) -> &'a RatingRow {
    rows.iter()
        .find(|r| r.team == team)
        .unwrap_or_else(|| panic!("team {team} missing from table"))
}

#[test]
fn synthetic_season_recovers_the_ordering() {
    let dir = scratch_dir("e2e");
    let config = test_run_config(&dir, 11);

    let report = run_pipeline(&config).expect("pipeline should converge");

    assert_eq!(report.teams, 4);
    assert_eq!(report.rows.len(), 4);
    for (idx, r) in report.rows.iter().enumerate() {
        assert_eq!(r.rank, idx + 1);
    }

    let a = row(&report.rows, STRONG_A);
    let b = row(&report.rows, STRONG_B);
    let c = row(&report.rows, WEAK_C);
    let d = row(&report.rows, NEWCOMER_D);

    // The two strong sides sit well clear of the weak one and near each
    // other; the generating gap is 1.5 nats.
    assert!(a.alpha_mean > c.alpha_mean + 0.8);
    assert!(b.alpha_mean > c.alpha_mean + 0.8);
    assert!((a.alpha_mean - b.alpha_mean).abs() < 0.5);

    // One pooled observation keeps the newcomer near the population mean.
    assert!(d.alpha_mean.abs() < a.alpha_mean.abs());
    assert!(d.alpha_mean.abs() < b.alpha_mean.abs());
    assert!(d.alpha_mean.abs() < c.alpha_mean.abs());
    assert_eq!(report.rows[3].team, WEAK_C);

    // The written table matches the in-memory rows field for field.
    let on_disk = fs::read_to_string(&config.ratings_out).expect("ratings csv written");
    assert_eq!(on_disk, render_ratings_csv(&report.rows));

    // Reloading the artifact reproduces the table without resampling.
    let artifact_path = config.artifact_out.as_ref().expect("artifact configured");
    let artifact = FitArtifact::load(artifact_path).expect("artifact reloads");
    let registry = artifact.registry().expect("registry rebuilds");
    let ensemble = artifact.ensemble();
    let replayed = aggregate_ratings(&registry, &ensemble).expect("replay aggregates");
    assert_eq!(render_ratings_csv(&replayed), on_disk);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn identical_seeds_reproduce_the_table() {
    let dir_one = scratch_dir("rerun_a");
    let dir_two = scratch_dir("rerun_b");
    let mut config_one = test_run_config(&dir_one, 23);
    let mut config_two = test_run_config(&dir_two, 23);
    config_one.sampler.iterations = 500;
    config_one.sampler.warmup = 250;
    config_two.sampler.iterations = 500;
    config_two.sampler.warmup = 250;

    let report_one = run_pipeline(&config_one).expect("first run");
    let report_two = run_pipeline(&config_two).expect("second run");

    assert_eq!(
        render_ratings_csv(&report_one.rows),
        render_ratings_csv(&report_two.rows)
    );

    let _ = fs::remove_dir_all(&dir_one);
    let _ = fs::remove_dir_all(&dir_two);
}
