use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::PipelineError;
use crate::posterior::PosteriorEnsemble;
use crate::registry::TeamRegistry;

/// One line of the final rating table.
#[derive(Debug, Clone)]
pub struct RatingRow {
    pub rank: usize,
    pub team: String,
    /// 1-based registry id; follows first appearance, not table order.
    pub team_id: u32,
    pub net_rating: f64,
    pub alpha_mean: f64,
    pub delta_mean: f64,
}

/// Collapses the retained draws into one row per registered team.
///
/// `net_rating` is the posterior mean ability plus the magnitude of the
/// posterior mean home edge, so a team that relies on its home bump still
/// gets credit for it in the single headline number.
pub fn aggregate_ratings(
    registry: &TeamRegistry,
    ensemble: &PosteriorEnsemble,
) -> Result<Vec<RatingRow>> {
    if ensemble.layout.num_teams != registry.num_teams() {
        return Err(PipelineError::EnsembleMismatch {
            detail: format!(
                "ensemble covers {} teams, registry has {}",
                ensemble.layout.num_teams,
                registry.num_teams()
            ),
        }
        .into());
    }
    if ensemble.num_draws() == 0 {
        return Err(PipelineError::EnsembleMismatch {
            detail: "ensemble holds no retained draws".to_string(),
        }
        .into());
    }

    let layout = ensemble.layout;
    let mut rows: Vec<RatingRow> = registry
        .names()
        .iter()
        .enumerate()
        .map(|(t, name)| {
            let alpha_mean = ensemble.mean_of(layout.alpha(t));
            let delta_mean = ensemble.mean_of(layout.delta(t));
            RatingRow {
                rank: 0,
                team: name.clone(),
                team_id: t as u32 + 1,
                net_rating: alpha_mean + delta_mean.abs(),
                alpha_mean,
                delta_mean,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.net_rating
            .partial_cmp(&a.net_rating)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.team.cmp(&b.team))
    });
    for (idx, row) in rows.iter_mut().enumerate() {
        row.rank = idx + 1;
    }

    Ok(rows)
}

pub fn render_ratings_csv(rows: &[RatingRow]) -> String {
    let mut out = String::from("rank,team,team_id,net_rating,alpha_mean,delta_mean\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{:.6},{:.6},{:.6}\n",
            row.rank,
            csv_field(&row.team),
            row.team_id,
            row.net_rating,
            row.alpha_mean,
            row.delta_mean
        ));
    }
    out
}

pub fn write_ratings_csv(path: &Path, rows: &[RatingRow]) -> Result<()> {
    fs::write(path, render_ratings_csv(rows))
        .with_context(|| format!("failed writing ratings to {}", path.display()))
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
