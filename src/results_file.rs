use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::match_data::{MatchRecord, parse_date, parse_neutral_flag, parse_score};

/// Result of reading a historical results file. Rows without scores are
/// normal (fixtures listed ahead of time) and only counted; malformed rows
/// are warned about and counted separately.
#[derive(Debug)]
pub struct ResultsLoad {
    pub matches: Vec<MatchRecord>,
    pub rows_total: usize,
    pub rows_without_scores: usize,
    pub rows_skipped: usize,
}

struct ResultColumns {
    date: usize,
    home_team: usize,
    away_team: usize,
    home_score: usize,
    away_score: usize,
    tournament: usize,
    country: usize,
    neutral: Option<usize>,
}

impl ResultColumns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self> {
        Ok(Self {
            date: require_column(headers, "date")?,
            home_team: require_column(headers, "home_team")?,
            away_team: require_column(headers, "away_team")?,
            home_score: require_column(headers, "home_score")?,
            away_score: require_column(headers, "away_score")?,
            tournament: require_column(headers, "tournament")?,
            country: require_column(headers, "country")?,
            neutral: find_column(headers, "neutral"),
        })
    }
}

enum RowOutcome {
    Match(MatchRecord),
    MissingScore,
    Malformed(String),
}

pub fn load_results_file(path: &Path) -> Result<ResultsLoad> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("open results file {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("read results header {}", path.display()))?
        .clone();
    let columns = ResultColumns::resolve(&headers)
        .with_context(|| format!("resolve results columns in {}", path.display()))?;

    let mut matches = Vec::new();
    let mut rows_total = 0usize;
    let mut rows_without_scores = 0usize;
    let mut rows_skipped = 0usize;

    for (idx, record) in reader.records().enumerate() {
        let row_no = idx + 2; // header is line 1
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                eprintln!("[WARN] results row {row_no}: {err}, skipping");
                rows_total += 1;
                rows_skipped += 1;
                continue;
            }
        };
        rows_total += 1;
        match parse_result_row(&columns, &record) {
            RowOutcome::Match(m) => matches.push(m),
            RowOutcome::MissingScore => rows_without_scores += 1,
            RowOutcome::Malformed(reason) => {
                eprintln!("[WARN] results row {row_no}: {reason}, skipping");
                rows_skipped += 1;
            }
        }
    }

    Ok(ResultsLoad {
        matches,
        rows_total,
        rows_without_scores,
        rows_skipped,
    })
}

fn parse_result_row(columns: &ResultColumns, record: &csv::StringRecord) -> RowOutcome {
    let field = |idx: usize| record.get(idx).unwrap_or("").trim();

    let raw_date = field(columns.date);
    let Some(date) = parse_date(raw_date) else {
        return RowOutcome::Malformed(format!("unparseable date '{raw_date}'"));
    };

    let home_team = field(columns.home_team);
    let away_team = field(columns.away_team);
    if home_team.is_empty() || away_team.is_empty() {
        return RowOutcome::Malformed("empty team name".to_string());
    }
    if home_team.eq_ignore_ascii_case(away_team) {
        return RowOutcome::Malformed(format!("identical team names '{home_team}'"));
    }

    let raw_home_score = field(columns.home_score);
    let raw_away_score = field(columns.away_score);
    let (home_score, away_score) = match (parse_score(raw_home_score), parse_score(raw_away_score))
    {
        (Some(h), Some(a)) => (h, a),
        (None, _) if raw_home_score.is_empty() || raw_home_score.eq_ignore_ascii_case("na") => {
            return RowOutcome::MissingScore;
        }
        (_, None) if raw_away_score.is_empty() || raw_away_score.eq_ignore_ascii_case("na") => {
            return RowOutcome::MissingScore;
        }
        _ => {
            return RowOutcome::Malformed(format!(
                "unparseable scores '{raw_home_score}'/'{raw_away_score}'"
            ));
        }
    };

    let neutral = match columns.neutral {
        Some(idx) => {
            let raw = field(idx);
            match parse_neutral_flag(raw) {
                Some(flag) => flag,
                None => {
                    return RowOutcome::Malformed(format!("unparseable neutral flag '{raw}'"));
                }
            }
        }
        // No neutral column: a match is neutral when played outside the
        // home side's own country.
        None => !field(columns.country).eq_ignore_ascii_case(home_team),
    };

    RowOutcome::Match(MatchRecord {
        date,
        home_team: home_team.to_string(),
        away_team: away_team.to_string(),
        home_score,
        away_score,
        tournament: field(columns.tournament).to_string(),
        neutral,
    })
}

pub(crate) fn find_column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

pub(crate) fn require_column(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    find_column(headers, name).ok_or_else(|| anyhow!("missing required column '{name}'"))
}
