use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;
use once_cell::sync::Lazy;

use crate::error::PipelineError;
use crate::match_data::MatchRecord;

/// Closed competition tier set. Labels are matched exactly against the
/// canonical table; anything unmatched counts as a friendly, which keeps
/// qualifiers at base weight instead of inheriting the weight of the
/// tournament they qualify for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompetitionTier {
    Friendly,
    NationsLeague,
    Major,
}

impl CompetitionTier {
    pub fn weight(self) -> f64 {
        match self {
            CompetitionTier::Friendly => 1.0,
            CompetitionTier::NationsLeague => 1.25,
            CompetitionTier::Major => 2.0,
        }
    }

    pub fn of_label(label: &str) -> Self {
        TIER_TABLE
            .get(label.trim())
            .copied()
            .unwrap_or(CompetitionTier::Friendly)
    }
}

/// Final tournaments and the Nations League formats, under the exact names
/// the historical results files use. Qualification labels are deliberately
/// absent.
static TIER_TABLE: Lazy<HashMap<&'static str, CompetitionTier>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for label in [
        "FIFA World Cup",
        "UEFA Euro",
        "Copa América",
        "African Cup of Nations",
        "AFC Asian Cup",
        "CONCACAF Championship",
        "Gold Cup",
        "Oceania Nations Cup",
        "Confederations Cup",
    ] {
        table.insert(label, CompetitionTier::Major);
    }
    for label in ["UEFA Nations League", "CONCACAF Nations League"] {
        table.insert(label, CompetitionTier::NationsLeague);
    }
    table
});

/// Earliest and latest match dates of the retained training set, computed
/// once and passed to every weight evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateSpan {
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
}

impl DateSpan {
    pub fn of_matches(matches: &[MatchRecord]) -> Option<Self> {
        let earliest = matches.iter().map(|m| m.date).min()?;
        let latest = matches.iter().map(|m| m.date).max()?;
        Some(Self { earliest, latest })
    }

    /// exp(-(latest - date) / (latest - earliest)), in days. The most
    /// recent match decays to 1.0, the oldest to 1/e; a single-date span
    /// does not decay at all.
    pub fn recency_decay(&self, date: NaiveDate) -> f64 {
        let range = (self.latest - self.earliest).num_days();
        if range == 0 {
            return 1.0;
        }
        let age = (self.latest - date).num_days();
        (-(age as f64) / (range as f64)).exp()
    }
}

pub fn match_weight(m: &MatchRecord, span: &DateSpan) -> Result<f64> {
    let tier = CompetitionTier::of_label(&m.tournament);
    let weight = tier.weight() * span.recency_decay(m.date);
    if !(weight > 0.0) {
        return Err(PipelineError::NonPositiveWeight {
            weight,
            home: m.home_team.clone(),
            away: m.away_team.clone(),
            date: m.date.to_string(),
        }
        .into());
    }
    Ok(weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn friendly_on(date: NaiveDate) -> MatchRecord {
        MatchRecord {
            date,
            home_team: "Ghana".to_string(),
            away_team: "Mali".to_string(),
            home_score: 1,
            away_score: 0,
            tournament: "Friendly".to_string(),
            neutral: false,
        }
    }

    #[test]
    fn tier_table_maps_finals_and_falls_back_to_friendly() {
        assert_eq!(CompetitionTier::of_label("FIFA World Cup"), CompetitionTier::Major);
        assert_eq!(
            CompetitionTier::of_label("UEFA Nations League"),
            CompetitionTier::NationsLeague
        );
        assert_eq!(CompetitionTier::of_label("Friendly"), CompetitionTier::Friendly);
        assert_eq!(
            CompetitionTier::of_label("Copa Centroamericana"),
            CompetitionTier::Friendly
        );
    }

    #[test]
    fn qualification_labels_stay_at_base_weight() {
        assert_eq!(
            CompetitionTier::of_label("FIFA World Cup qualification"),
            CompetitionTier::Friendly
        );
        assert_eq!(
            CompetitionTier::of_label("UEFA Euro qualification"),
            CompetitionTier::Friendly
        );
    }

    #[test]
    fn tier_weights() {
        assert_eq!(CompetitionTier::Friendly.weight(), 1.0);
        assert_eq!(CompetitionTier::NationsLeague.weight(), 1.25);
        assert_eq!(CompetitionTier::Major.weight(), 2.0);
    }

    #[test]
    fn decay_runs_from_one_down_to_inverse_e() {
        let span = DateSpan {
            earliest: day(2022, 1, 1),
            latest: day(2026, 1, 1),
        };
        assert!((span.recency_decay(day(2026, 1, 1)) - 1.0).abs() < 1e-12);
        assert!((span.recency_decay(day(2022, 1, 1)) - (-1.0f64).exp()).abs() < 1e-12);
        let mid = span.recency_decay(day(2024, 1, 1));
        assert!(mid < 1.0 && mid > (-1.0f64).exp());
    }

    #[test]
    fn single_date_span_does_not_decay() {
        let span = DateSpan {
            earliest: day(2026, 6, 11),
            latest: day(2026, 6, 11),
        };
        assert_eq!(span.recency_decay(day(2026, 6, 11)), 1.0);
    }

    #[test]
    fn weight_is_tier_times_decay() {
        let span = DateSpan {
            earliest: day(2022, 1, 1),
            latest: day(2026, 1, 1),
        };
        let mut m = friendly_on(day(2026, 1, 1));
        m.tournament = "FIFA World Cup".to_string();
        let w = match_weight(&m, &span).unwrap();
        assert!((w - 2.0).abs() < 1e-12);

        let old = friendly_on(day(2022, 1, 1));
        let w_old = match_weight(&old, &span).unwrap();
        assert!((w_old - (-1.0f64).exp()).abs() < 1e-12);
    }
}
