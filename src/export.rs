use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::diagnostics::ConvergenceSummary;
use crate::ratings::RatingRow;

/// Writes the rating table and fit diagnostics as a two-sheet workbook.
pub fn export_workbook(
    path: &Path,
    rows: &[RatingRow],
    convergence: &ConvergenceSummary,
) -> Result<()> {
    let mut ratings_rows = vec![vec![
        "Rank".to_string(),
        "Team".to_string(),
        "Team Id".to_string(),
        "Net Rating".to_string(),
        "Alpha Mean".to_string(),
        "Delta Mean".to_string(),
    ]];
    for row in rows {
        ratings_rows.push(rating_row(row));
    }

    let mut fit_rows = vec![vec![
        "Parameter".to_string(),
        "R-hat".to_string(),
        "ESS".to_string(),
        "Mean".to_string(),
        "SD".to_string(),
    ]];
    for diag in &convergence.per_param {
        fit_rows.push(vec![
            diag.name.clone(),
            format!("{:.4}", diag.rhat),
            format!("{:.1}", diag.ess),
            format!("{:.6}", diag.mean),
            format!("{:.6}", diag.sd),
        ]);
    }
    fit_rows.push(Vec::new());
    fit_rows.push(vec![
        "Divergences".to_string(),
        convergence.divergences.to_string(),
    ]);
    fit_rows.push(vec![
        "Retained draws".to_string(),
        convergence.total_draws.to_string(),
    ]);
    fit_rows.push(vec![
        "Worst R-hat".to_string(),
        format!("{:.4} ({})", convergence.max_rhat, convergence.max_rhat_param),
    ]);
    fit_rows.push(vec![
        "Smallest ESS".to_string(),
        format!("{:.1} ({})", convergence.min_ess, convergence.min_ess_param),
    ]);

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Ratings")?;
        write_rows(sheet, &ratings_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Fit")?;
        write_rows(sheet, &fit_rows)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;

    Ok(())
}

fn rating_row(row: &RatingRow) -> Vec<String> {
    vec![
        row.rank.to_string(),
        row.team.clone(),
        row.team_id.to_string(),
        format!("{:.6}", row.net_rating),
        format!("{:.6}", row.alpha_mean),
        format!("{:.6}", row.delta_mean),
    ]
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, value)
                .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ParamDiagnostic;

    #[test]
    fn workbook_lands_on_disk() {
        let rows = vec![RatingRow {
            rank: 1,
            team: "Argentina".to_string(),
            team_id: 1,
            net_rating: 0.91,
            alpha_mean: 0.84,
            delta_mean: 0.07,
        }];
        let convergence = ConvergenceSummary {
            per_param: vec![ParamDiagnostic {
                name: "alpha[Argentina]".to_string(),
                rhat: 1.001,
                ess: 1450.0,
                mean: 0.84,
                sd: 0.11,
            }],
            max_rhat: 1.001,
            max_rhat_param: "alpha[Argentina]".to_string(),
            min_ess: 1450.0,
            min_ess_param: "alpha[Argentina]".to_string(),
            divergences: 0,
            total_draws: 4500,
        };

        let path = std::env::temp_dir().join(format!(
            "natrank_export_test_{}.xlsx",
            std::process::id()
        ));
        export_workbook(&path, &rows, &convergence).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.len() > 0);
        let _ = std::fs::remove_file(&path);
    }
}
