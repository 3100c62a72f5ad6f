use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use chrono::NaiveDate;

use crate::dataset;
use crate::diagnostics::ConvergenceSummary;
use crate::error::PipelineError;
use crate::export;
use crate::model::ModelInput;
use crate::posterior::{FitArtifact, PosteriorEnsemble};
use crate::ratings::{self, RatingRow};
use crate::registry::TeamRegistry;
use crate::results_file;
use crate::sampler::{self, SamplerConfig};
use crate::schedule_file;
use crate::weighting::DateSpan;

/// One schedule file plus the tournament label its rows are weighted under.
#[derive(Debug, Clone)]
pub struct ScheduleSource {
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub results_path: PathBuf,
    pub schedules: Vec<ScheduleSource>,
    /// Opening date of the training window; `None` derives it from the
    /// latest historical match date.
    pub since: Option<NaiveDate>,
    pub min_appearances: usize,
    pub sampler: SamplerConfig,
    pub ratings_out: PathBuf,
    pub artifact_out: Option<PathBuf>,
    pub workbook_out: Option<PathBuf>,
}

pub struct RunReport {
    pub rows: Vec<RatingRow>,
    pub convergence: ConvergenceSummary,
    pub teams: usize,
    pub training_matches: usize,
}

/// Load, assemble, fit, gate, persist — the whole run. Progress goes to
/// stderr; the returned report holds what the caller prints on stdout.
pub fn run_pipeline(config: &RunConfig) -> Result<RunReport> {
    let results = results_file::load_results_file(&config.results_path)?;
    eprintln!(
        "[INFO] results {}: {} matches kept of {} rows ({} unplayed, {} skipped)",
        config.results_path.display(),
        results.matches.len(),
        results.rows_total,
        results.rows_without_scores,
        results.rows_skipped
    );

    let mut schedules = Vec::with_capacity(config.schedules.len());
    for source in &config.schedules {
        let load = schedule_file::load_schedule_file(&source.path, &source.label)?;
        eprintln!(
            "[INFO] schedule {} ({}): {} played, {} pending, {} teams",
            source.path.display(),
            load.tournament,
            load.played.len(),
            load.rows_pending,
            load.teams.len()
        );
        schedules.push(load);
    }

    let since = match config.since {
        Some(date) => date,
        None => results
            .matches
            .iter()
            .map(|m| m.date)
            .max()
            .map(dataset::default_since)
            .unwrap_or(NaiveDate::MIN),
    };

    let training =
        dataset::assemble_training_set(results.matches, &schedules, since, config.min_appearances)?;
    let summary = &training.summary;
    eprintln!(
        "[INFO] window opens {}: {} of {} in-window matches qualified ({} teams under \
         the {}-appearance bar), {} schedule matches appended, {} duplicates dropped",
        summary.since,
        summary.qualified,
        summary.in_window,
        summary.teams_below_threshold,
        config.min_appearances,
        summary.schedule_played,
        summary.duplicates_dropped
    );

    let registry = TeamRegistry::from_first_appearance(&training.matches, &training.schedule_teams);
    let span = DateSpan::of_matches(&training.matches).ok_or_else(|| {
        PipelineError::EmptyTrainingSet {
            reason: "no dated matches to span".to_string(),
        }
    })?;
    let input = ModelInput::build(&training.matches, &registry, &span)?;
    let fingerprint = input.fingerprint();
    if let Some((lo, hi)) = input.weight_range() {
        eprintln!("[INFO] match weights span {lo:.3}..{hi:.3}");
    }

    let match_teams: HashSet<&str> = training
        .matches
        .iter()
        .flat_map(|m| [m.home_team.as_str(), m.away_team.as_str()])
        .collect();
    let schedule_only = registry.num_teams() - match_teams.len();
    eprintln!(
        "[INFO] fitting {} teams ({} schedule-only) over {} matches: {} chains x {} \
         iterations (warmup {}), seed {}",
        registry.num_teams(),
        schedule_only,
        input.num_matches(),
        config.sampler.chains,
        config.sampler.iterations,
        config.sampler.warmup,
        config.sampler.seed
    );
    let fit_started = Instant::now();
    let output = sampler::sample_posterior(&input, &config.sampler)?;
    eprintln!(
        "[INFO] sampling finished in {:.1}s",
        fit_started.elapsed().as_secs_f64()
    );
    for (idx, chain) in output.chains.iter().enumerate() {
        eprintln!(
            "[INFO] chain {idx}: accept {:.3}, step {:.5}, mean depth {:.2}, \
             {} divergences, {} depth-limit hits",
            chain.accept_rate,
            chain.step_size,
            chain.mean_tree_depth,
            chain.divergences,
            chain.max_depth_hits
        );
    }

    let names = input.layout().parameter_names(&registry);
    let draw_chains: Vec<Vec<Vec<f64>>> =
        output.chains.iter().map(|chain| chain.draws.clone()).collect();
    let convergence =
        ConvergenceSummary::evaluate(&draw_chains, &names, output.total_divergences());
    convergence.check(config.sampler.max_rhat, config.sampler.max_divergence_fraction)?;
    eprintln!(
        "[INFO] converged: max R-hat {:.4} ({}), min ESS {:.0} ({})",
        convergence.max_rhat,
        convergence.max_rhat_param,
        convergence.min_ess,
        convergence.min_ess_param
    );

    let ensemble = PosteriorEnsemble::new(input.layout(), draw_chains);

    if let Some(path) = &config.artifact_out {
        let artifact = FitArtifact::assemble(
            &registry,
            &config.sampler,
            output,
            convergence.clone(),
            fingerprint,
        );
        artifact.save(path)?;
        eprintln!("[INFO] fit artifact saved to {}", path.display());
    }

    let rows = ratings::aggregate_ratings(&registry, &ensemble)?;
    ratings::write_ratings_csv(&config.ratings_out, &rows)?;
    eprintln!(
        "[INFO] rating table ({} teams) written to {}",
        rows.len(),
        config.ratings_out.display()
    );

    if let Some(path) = &config.workbook_out {
        export::export_workbook(path, &rows, &convergence)?;
        eprintln!("[INFO] workbook written to {}", path.display());
    }

    Ok(RunReport {
        teams: registry.num_teams(),
        training_matches: input.num_matches(),
        rows,
        convergence,
    })
}
