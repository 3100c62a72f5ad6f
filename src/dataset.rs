use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::NaiveDate;

use crate::error::PipelineError;
use crate::match_data::MatchRecord;
use crate::schedule_file::ScheduleLoad;

/// A team must appear this often inside the retention window for its
/// historical matches to train the model.
pub const MIN_TEAM_APPEARANCES: usize = 20;

/// Window applied when no explicit cutoff is given: one full cycle of
/// qualifiers plus a final tournament.
pub const DEFAULT_LOOKBACK_YEARS: i32 = 4;

#[derive(Debug)]
pub struct TrainingSet {
    /// Chronologically ordered training matches (windowed + qualified
    /// historical matches, then any played schedule matches).
    pub matches: Vec<MatchRecord>,
    /// Every team named in a schedule file, first-appearance order across
    /// files; registered even without a single training match.
    pub schedule_teams: Vec<String>,
    pub summary: AssemblySummary,
}

#[derive(Debug, Clone)]
pub struct AssemblySummary {
    pub since: NaiveDate,
    pub base_matches: usize,
    pub in_window: usize,
    pub qualified: usize,
    pub schedule_played: usize,
    pub duplicates_dropped: usize,
    pub teams_below_threshold: usize,
}

pub fn default_since(latest: NaiveDate) -> NaiveDate {
    use chrono::Datelike;
    let year = latest.year() - DEFAULT_LOOKBACK_YEARS;
    NaiveDate::from_ymd_opt(year, latest.month(), latest.day())
        // Feb 29 with no counterpart four years back
        .or_else(|| NaiveDate::from_ymd_opt(year, 2, 28))
        .unwrap_or(latest)
}

pub fn assemble_training_set(
    base: Vec<MatchRecord>,
    schedules: &[ScheduleLoad],
    since: NaiveDate,
    min_appearances: usize,
) -> Result<TrainingSet> {
    let base_matches = base.len();
    let windowed: Vec<MatchRecord> = base.into_iter().filter(|m| m.date >= since).collect();
    let in_window = windowed.len();

    let mut appearances: HashMap<String, usize> = HashMap::new();
    for m in &windowed {
        *appearances.entry(m.home_team.clone()).or_insert(0) += 1;
        *appearances.entry(m.away_team.clone()).or_insert(0) += 1;
    }
    let teams_below_threshold = appearances
        .values()
        .filter(|&&count| count < min_appearances)
        .count();

    let qualifies = |name: &str| appearances.get(name).copied().unwrap_or(0) >= min_appearances;
    let mut matches: Vec<MatchRecord> = windowed
        .into_iter()
        .filter(|m| qualifies(&m.home_team) && qualifies(&m.away_team))
        .collect();
    let qualified = matches.len();

    // Schedule matches bypass both the window and the appearance
    // threshold; a fixture already present in the historical file is kept
    // once. Keys ignore side order so a neutral fixture listed with the
    // teams swapped still collapses onto the same match.
    let mut seen: HashSet<(NaiveDate, String, String)> =
        matches.iter().map(fixture_key).collect();
    let mut schedule_played = 0usize;
    let mut duplicates_dropped = 0usize;
    let mut schedule_teams = Vec::new();
    let mut named = HashSet::new();
    for schedule in schedules {
        for m in &schedule.played {
            if seen.insert(fixture_key(m)) {
                matches.push(m.clone());
                schedule_played += 1;
            } else {
                duplicates_dropped += 1;
            }
        }
        for team in &schedule.teams {
            if named.insert(team.clone()) {
                schedule_teams.push(team.clone());
            }
        }
    }

    if matches.is_empty() {
        return Err(PipelineError::EmptyTrainingSet {
            reason: format!(
                "{base_matches} historical matches, none left after the {since} window and \
                 {min_appearances}-appearance filter"
            ),
        }
        .into());
    }

    matches.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.home_team.cmp(&b.home_team))
            .then_with(|| a.away_team.cmp(&b.away_team))
    });

    Ok(TrainingSet {
        matches,
        schedule_teams,
        summary: AssemblySummary {
            since,
            base_matches,
            in_window,
            qualified,
            schedule_played,
            duplicates_dropped,
            teams_below_threshold,
        },
    })
}

fn fixture_key(m: &MatchRecord) -> (NaiveDate, String, String) {
    let (first, second) = if m.home_team <= m.away_team {
        (&m.home_team, &m.away_team)
    } else {
        (&m.away_team, &m.home_team)
    };
    (m.date, first.clone(), second.clone())
}
