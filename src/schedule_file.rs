use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};

use crate::match_data::{MatchRecord, parse_date, parse_score};
use crate::results_file::require_column;

/// One in-progress tournament schedule. Played rows feed the training set
/// (they bypass the appearance threshold); every named team is collected so
/// the registry covers teams that have not finished a match yet.
#[derive(Debug)]
pub struct ScheduleLoad {
    pub tournament: String,
    pub played: Vec<MatchRecord>,
    /// Every team named in the file, first-appearance order.
    pub teams: Vec<String>,
    pub rows_total: usize,
    pub rows_pending: usize,
    pub rows_skipped: usize,
}

struct ScheduleColumns {
    date: usize,
    team1: usize,
    team2: usize,
    location: usize,
    score1: usize,
    score2: usize,
}

impl ScheduleColumns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self> {
        Ok(Self {
            date: require_column(headers, "date")?,
            team1: require_column(headers, "team1")?,
            team2: require_column(headers, "team2")?,
            location: require_column(headers, "location")?,
            score1: require_column(headers, "score1")?,
            score2: require_column(headers, "score2")?,
        })
    }
}

enum RowOutcome {
    Played(MatchRecord),
    Pending { team1: String, team2: String },
    Malformed(String),
}

pub fn load_schedule_file(path: &Path, tournament: &str) -> Result<ScheduleLoad> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("open schedule file {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("read schedule header {}", path.display()))?
        .clone();
    let columns = ScheduleColumns::resolve(&headers)
        .with_context(|| format!("resolve schedule columns in {}", path.display()))?;

    let mut played = Vec::new();
    let mut teams = Vec::new();
    let mut seen = HashSet::new();
    let mut register = |name: &str, teams: &mut Vec<String>| {
        if seen.insert(name.to_string()) {
            teams.push(name.to_string());
        }
    };

    let mut rows_total = 0usize;
    let mut rows_pending = 0usize;
    let mut rows_skipped = 0usize;

    for (idx, record) in reader.records().enumerate() {
        let row_no = idx + 2;
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                eprintln!("[WARN] schedule row {row_no}: {err}, skipping");
                rows_total += 1;
                rows_skipped += 1;
                continue;
            }
        };
        rows_total += 1;
        match parse_schedule_row(&columns, &record, tournament) {
            RowOutcome::Played(m) => {
                register(&m.home_team, &mut teams);
                register(&m.away_team, &mut teams);
                played.push(m);
            }
            RowOutcome::Pending { team1, team2 } => {
                register(&team1, &mut teams);
                register(&team2, &mut teams);
                rows_pending += 1;
            }
            RowOutcome::Malformed(reason) => {
                eprintln!("[WARN] schedule row {row_no}: {reason}, skipping");
                rows_skipped += 1;
            }
        }
    }

    Ok(ScheduleLoad {
        tournament: tournament.to_string(),
        played,
        teams,
        rows_total,
        rows_pending,
        rows_skipped,
    })
}

fn parse_schedule_row(
    columns: &ScheduleColumns,
    record: &csv::StringRecord,
    tournament: &str,
) -> RowOutcome {
    let field = |idx: usize| record.get(idx).unwrap_or("").trim();

    let raw_date = field(columns.date);
    let Some(date) = parse_date(raw_date) else {
        return RowOutcome::Malformed(format!("unparseable date '{raw_date}'"));
    };

    let team1 = field(columns.team1);
    let team2 = field(columns.team2);
    if team1.is_empty() || team2.is_empty() {
        return RowOutcome::Malformed("empty team name".to_string());
    }
    if team1.eq_ignore_ascii_case(team2) {
        return RowOutcome::Malformed(format!("identical team names '{team1}'"));
    }

    let raw_score1 = field(columns.score1);
    let raw_score2 = field(columns.score2);
    let scores = match (parse_score(raw_score1), parse_score(raw_score2)) {
        (Some(s1), Some(s2)) => Some((s1, s2)),
        (None, _) if raw_score1.is_empty() || raw_score1.eq_ignore_ascii_case("na") => None,
        (_, None) if raw_score2.is_empty() || raw_score2.eq_ignore_ascii_case("na") => None,
        _ => {
            return RowOutcome::Malformed(format!(
                "unparseable scores '{raw_score1}'/'{raw_score2}'"
            ));
        }
    };

    let Some((score1, score2)) = scores else {
        return RowOutcome::Pending {
            team1: team1.to_string(),
            team2: team2.to_string(),
        };
    };

    // The hosting side plays at home; a fixture is neutral only when
    // neither side is the host.
    let location = field(columns.location);
    let team1_hosts = team1.eq_ignore_ascii_case(location);
    let team2_hosts = team2.eq_ignore_ascii_case(location);
    let (home_team, away_team, home_score, away_score) = if team2_hosts && !team1_hosts {
        (team2, team1, score2, score1)
    } else {
        (team1, team2, score1, score2)
    };

    RowOutcome::Played(MatchRecord {
        date,
        home_team: home_team.to_string(),
        away_team: away_team.to_string(),
        home_score,
        away_score,
        tournament: tournament.to_string(),
        neutral: !team1_hosts && !team2_hosts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADERS: [&str; 6] = ["date", "team1", "team2", "location", "score1", "score2"];

    fn columns() -> ScheduleColumns {
        ScheduleColumns::resolve(&csv::StringRecord::from(HEADERS.to_vec())).unwrap()
    }

    fn row(fields: &[&str]) -> csv::StringRecord {
        csv::StringRecord::from(fields.to_vec())
    }

    #[test]
    fn hosting_team_listed_second_is_swapped_to_home() {
        let record = row(&["2026-06-11", "Canada", "Mexico", "Mexico", "0", "2"]);
        match parse_schedule_row(&columns(), &record, "FIFA World Cup") {
            RowOutcome::Played(m) => {
                assert_eq!(m.home_team, "Mexico");
                assert_eq!(m.away_team, "Canada");
                assert_eq!((m.home_score, m.away_score), (2, 0));
                assert!(!m.neutral);
            }
            _ => panic!("expected a played match"),
        }
    }

    #[test]
    fn hosting_team_listed_first_stays_home() {
        let record = row(&["2026-06-11", "Mexico", "Canada", "Mexico", "2", "0"]);
        match parse_schedule_row(&columns(), &record, "FIFA World Cup") {
            RowOutcome::Played(m) => {
                assert_eq!(m.home_team, "Mexico");
                assert_eq!((m.home_score, m.away_score), (2, 0));
                assert!(!m.neutral);
            }
            _ => panic!("expected a played match"),
        }
    }

    #[test]
    fn third_party_venue_is_neutral_without_swap() {
        let record = row(&["2026-06-12", "Brazil", "Norway", "United States", "1", "1"]);
        match parse_schedule_row(&columns(), &record, "FIFA World Cup") {
            RowOutcome::Played(m) => {
                assert_eq!(m.home_team, "Brazil");
                assert_eq!(m.away_team, "Norway");
                assert!(m.neutral);
            }
            _ => panic!("expected a played match"),
        }
    }

    #[test]
    fn unplayed_fixture_is_pending_with_both_teams() {
        let record = row(&["2026-07-19", "Brazil", "Mexico", "United States", "", ""]);
        match parse_schedule_row(&columns(), &record, "FIFA World Cup") {
            RowOutcome::Pending { team1, team2 } => {
                assert_eq!(team1, "Brazil");
                assert_eq!(team2, "Mexico");
            }
            _ => panic!("expected a pending fixture"),
        }
    }

    #[test]
    fn played_match_carries_the_file_tournament_label() {
        let record = row(&["2026-06-11", "Mexico", "Canada", "Mexico", "2", "0"]);
        match parse_schedule_row(&columns(), &record, "FIFA World Cup") {
            RowOutcome::Played(m) => assert_eq!(m.tournament, "FIFA World Cup"),
            _ => panic!("expected a played match"),
        }
    }
}
