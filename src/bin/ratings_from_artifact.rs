use std::path::PathBuf;

use anyhow::{Result, anyhow};

use natrank::posterior::FitArtifact;
use natrank::ratings;

const DEFAULT_TOP: usize = 20;

fn main() -> Result<()> {
    let artifact_path = parse_string_arg("--artifact")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("--artifact <path> is required (fit artifact JSON)"))?;

    let artifact = FitArtifact::load(&artifact_path)?;
    let registry = artifact.registry()?;
    let ensemble = artifact.ensemble();
    let rows = ratings::aggregate_ratings(&registry, &ensemble)?;

    if let Some(out) = parse_string_arg("--out").map(PathBuf::from) {
        ratings::write_ratings_csv(&out, &rows)?;
        eprintln!("[INFO] rating table written to {}", out.display());
    }

    println!("Rating table from artifact");
    println!("Artifact: {}", artifact_path.display());
    println!("Created: {}", artifact.created_utc);
    println!("Teams: {}", registry.num_teams());
    println!(
        "Retained draws: {} across {} chains",
        ensemble.num_draws(),
        ensemble.chains.len()
    );
    println!(
        "Fit quality: max R-hat {:.4} ({}), min ESS {:.0} ({}), {} divergences",
        artifact.convergence.max_rhat,
        artifact.convergence.max_rhat_param,
        artifact.convergence.min_ess,
        artifact.convergence.min_ess_param,
        artifact.convergence.divergences
    );
    println!();

    let top = parse_usize_arg("--top").unwrap_or(DEFAULT_TOP);
    println!("Top {} teams:", top.min(rows.len()));
    for row in rows.iter().take(top) {
        println!(
            "  {:>3}. {:<28} net={:+.3} alpha={:+.3} delta={:+.3}",
            row.rank, row.team, row.net_rating, row.alpha_mean, row.delta_mean
        );
    }

    Ok(())
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
