use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;

use natrank::pipeline::{self, RunConfig, ScheduleSource};
use natrank::sampler::SamplerConfig;

const DEFAULT_RATINGS_OUT: &str = "ratings.csv";
const DEFAULT_TOP: usize = 20;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    if has_flag("--help") || has_flag("-h") {
        print_usage();
        return Ok(());
    }

    let results_path = parse_string_arg("--results")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("--results <path> is required (historical results CSV)"))?;
    let schedules = parse_schedule_args()?;
    let since = match parse_string_arg("--since") {
        Some(raw) => Some(
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .with_context(|| format!("--since {raw:?} is not a YYYY-MM-DD date"))?,
        ),
        None => None,
    };
    let min_appearances =
        parse_usize_arg("--min-appearances").unwrap_or(natrank::dataset::MIN_TEAM_APPEARANCES);

    let defaults = SamplerConfig::default();
    let sampler = SamplerConfig {
        chains: parse_usize_arg("--chains")
            .or_else(|| env_usize("NATRANK_CHAINS"))
            .unwrap_or(defaults.chains),
        iterations: parse_usize_arg("--iterations")
            .or_else(|| env_usize("NATRANK_ITERATIONS"))
            .unwrap_or(defaults.iterations),
        warmup: parse_usize_arg("--warmup")
            .or_else(|| env_usize("NATRANK_WARMUP"))
            .unwrap_or(defaults.warmup),
        seed: parse_u64_arg("--seed")
            .or_else(|| env_u64("NATRANK_SEED"))
            .unwrap_or(defaults.seed),
        ..defaults
    };

    let config = RunConfig {
        results_path,
        schedules,
        since,
        min_appearances,
        sampler,
        ratings_out: parse_string_arg("--out")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RATINGS_OUT)),
        artifact_out: parse_string_arg("--artifact").map(PathBuf::from),
        workbook_out: parse_string_arg("--xlsx").map(PathBuf::from),
    };

    let report = with_sample_pool(|| pipeline::run_pipeline(&config))?;

    println!("National-team rating fit");
    println!("Teams: {}", report.teams);
    println!("Training matches: {}", report.training_matches);
    println!(
        "Max R-hat: {:.4} ({})",
        report.convergence.max_rhat, report.convergence.max_rhat_param
    );
    println!(
        "Min ESS: {:.0} ({})",
        report.convergence.min_ess, report.convergence.min_ess_param
    );
    println!(
        "Divergences: {} of {} retained draws",
        report.convergence.divergences, report.convergence.total_draws
    );
    println!();

    let top = parse_usize_arg("--top").unwrap_or(DEFAULT_TOP);
    println!("Top {} teams:", top.min(report.rows.len()));
    for row in report.rows.iter().take(top) {
        println!(
            "  {:>3}. {:<28} net={:+.3} alpha={:+.3} delta={:+.3}",
            row.rank, row.team, row.net_rating, row.alpha_mean, row.delta_mean
        );
    }

    Ok(())
}

fn print_usage() {
    println!("natrank --results <csv> [options]");
    println!();
    println!("  --results <path>          historical results CSV (required)");
    println!("  --schedule <label=path>   in-progress tournament schedule CSV, repeatable");
    println!("  --since <YYYY-MM-DD>      opening date of the training window");
    println!("  --min-appearances <n>     per-team appearance floor inside the window");
    println!("  --out <path>              rating table CSV (default {DEFAULT_RATINGS_OUT})");
    println!("  --artifact <path>         save the fit artifact JSON");
    println!("  --xlsx <path>             save a Ratings+Fit workbook");
    println!("  --chains/--iterations/--warmup/--seed   sampler overrides");
    println!("  --top <n>                 rows printed to stdout (default {DEFAULT_TOP})");
    println!();
    println!("Env: NATRANK_CHAINS, NATRANK_ITERATIONS, NATRANK_WARMUP, NATRANK_SEED,");
    println!("     NATRANK_THREADS (also read from .env / .env.local)");
}

/// Runs the fit inside a bounded rayon pool when NATRANK_THREADS is set.
fn with_sample_pool<T>(action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    let Some(threads) = env_usize("NATRANK_THREADS") else {
        return action();
    };
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads.clamp(1, 64))
        .build()
    {
        Ok(pool) => pool.install(action),
        Err(_) => action(),
    }
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}

fn parse_string_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&format!("{name}="))
            && !v.trim().is_empty()
        {
            return Some(v.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    parse_string_arg(name).and_then(|raw| raw.parse::<usize>().ok())
}

fn parse_u64_arg(name: &str) -> Option<u64> {
    parse_string_arg(name).and_then(|raw| raw.parse::<u64>().ok())
}

/// Every `--schedule label=path` occurrence, in argv order.
fn parse_schedule_args() -> Result<Vec<ScheduleSource>> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut sources = Vec::new();
    let mut raw_values = Vec::new();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix("--schedule=") {
            raw_values.push(v.to_string());
        } else if arg == "--schedule"
            && let Some(next) = args.get(idx + 1)
        {
            raw_values.push(next.to_string());
        }
    }
    for raw in raw_values {
        let Some((label, path)) = raw.split_once('=') else {
            return Err(anyhow!(
                "--schedule {raw:?} must be <tournament label>=<csv path>"
            ));
        };
        let label = label.trim();
        let path = path.trim();
        if label.is_empty() || path.is_empty() {
            return Err(anyhow!(
                "--schedule {raw:?} must be <tournament label>=<csv path>"
            ));
        }
        sources.push(ScheduleSource {
            label: label.to_string(),
            path: PathBuf::from(path),
        });
    }
    Ok(sources)
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|val| val.parse::<usize>().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|val| val.parse::<u64>().ok())
}
