use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Split potential scale reduction over a set of chains for one parameter.
/// Each chain is split in half so a trend inside a single chain shows up
/// the same way disagreement between chains does. Values near 1.0 mean the
/// chains are mixing over the same distribution.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let mut halves: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let half = chain.len() / 2;
        if half < 2 {
            return f64::INFINITY;
        }
        halves.push(&chain[..half]);
        halves.push(&chain[chain.len() - half..]);
    }
    let m = halves.len() as f64;
    let n = halves[0].len() as f64;

    let means: Vec<f64> = halves
        .iter()
        .map(|h| h.iter().sum::<f64>() / h.len() as f64)
        .collect();
    let grand_mean = means.iter().sum::<f64>() / m;
    let between = means
        .iter()
        .map(|&mean| (mean - grand_mean) * (mean - grand_mean))
        .sum::<f64>()
        * n
        / (m - 1.0);
    let within = halves
        .iter()
        .zip(&means)
        .map(|(h, &mean)| {
            h.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / (h.len() as f64 - 1.0)
        })
        .sum::<f64>()
        / m;

    if within < 1e-12 {
        return if between < 1e-12 { 1.0 } else { f64::INFINITY };
    }
    let var_plus = (n - 1.0) / n * within + between / n;
    (var_plus / within).sqrt()
}

/// Effective sample size over all chains: per-chain N / (1 + 2 Σ ρ_k) with
/// the autocorrelation sum cut off once ρ drops below 0.05, summed across
/// chains (independent chains add information).
pub fn effective_sample_size(chains: &[Vec<f64>]) -> f64 {
    chains.iter().map(|chain| chain_ess(chain)).sum()
}

fn chain_ess(chain: &[f64]) -> f64 {
    let n = chain.len();
    if n < 2 {
        return n as f64;
    }
    let mean = chain.iter().sum::<f64>() / n as f64;
    let var = chain.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
    if var < 1e-12 {
        return n as f64;
    }
    let mut sum_rho = 0.0;
    for k in 1..=50.min(n / 2) {
        let rho = autocorrelation(chain, k, mean, var);
        if rho < 0.05 {
            break;
        }
        sum_rho += rho;
    }
    n as f64 / (1.0 + 2.0 * sum_rho)
}

fn autocorrelation(chain: &[f64], k: usize, mean: f64, var: f64) -> f64 {
    let n = chain.len();
    if k >= n {
        return 0.0;
    }
    let cov = (0..n - k)
        .map(|i| (chain[i] - mean) * (chain[i + k] - mean))
        .sum::<f64>()
        / (n - k) as f64;
    cov / var
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDiagnostic {
    pub name: String,
    pub rhat: f64,
    pub ess: f64,
    pub mean: f64,
    pub sd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceSummary {
    pub per_param: Vec<ParamDiagnostic>,
    pub max_rhat: f64,
    pub max_rhat_param: String,
    pub min_ess: f64,
    pub min_ess_param: String,
    pub divergences: usize,
    pub total_draws: usize,
}

impl ConvergenceSummary {
    /// `chains[c][i][p]` is parameter `p` of draw `i` in chain `c`; `names`
    /// is aligned with the parameter axis.
    pub fn evaluate(chains: &[Vec<Vec<f64>>], names: &[String], divergences: usize) -> Self {
        let dim = names.len();
        let total_draws: usize = chains.iter().map(Vec::len).sum();
        let mut per_param = Vec::with_capacity(dim);
        let mut max_rhat = f64::NEG_INFINITY;
        let mut max_rhat_param = String::new();
        let mut min_ess = f64::INFINITY;
        let mut min_ess_param = String::new();

        for (p, name) in names.iter().enumerate() {
            let columns: Vec<Vec<f64>> = chains
                .iter()
                .map(|chain| chain.iter().map(|draw| draw[p]).collect())
                .collect();
            let rhat = split_rhat(&columns);
            let ess = effective_sample_size(&columns);

            let pooled: Vec<f64> = columns.iter().flatten().copied().collect();
            let n = pooled.len().max(1) as f64;
            let mean = pooled.iter().sum::<f64>() / n;
            let sd = (pooled.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / n).sqrt();

            if rhat > max_rhat {
                max_rhat = rhat;
                max_rhat_param = name.clone();
            }
            if ess < min_ess {
                min_ess = ess;
                min_ess_param = name.clone();
            }
            per_param.push(ParamDiagnostic {
                name: name.clone(),
                rhat,
                ess,
                mean,
                sd,
            });
        }

        Self {
            per_param,
            max_rhat,
            max_rhat_param,
            min_ess,
            min_ess_param,
            divergences,
            total_draws,
        }
    }

    /// The gate between sampling and any output: refuse to certify a run
    /// whose worst split R-hat or divergence count is out of bounds.
    pub fn check(&self, max_rhat: f64, max_divergence_fraction: f64) -> Result<()> {
        if !(self.max_rhat <= max_rhat) {
            return Err(PipelineError::NotConverged {
                detail: format!(
                    "split R-hat {:.4} on {} exceeds the {:.2} ceiling",
                    self.max_rhat, self.max_rhat_param, max_rhat
                ),
            }
            .into());
        }
        let allowed = (self.total_draws as f64 * max_divergence_fraction).floor() as usize;
        if self.divergences > allowed {
            return Err(PipelineError::NotConverged {
                detail: format!(
                    "{} divergent transitions in {} retained draws (allowed {})",
                    self.divergences, self.total_draws, allowed
                ),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn normal_chain(rng: &mut ChaCha8Rng, n: usize, mean: f64, sd: f64) -> Vec<f64> {
        let dist = Normal::new(mean, sd).unwrap();
        (0..n).map(|_| dist.sample(rng)).collect()
    }

    #[test]
    fn rhat_near_one_for_well_mixed_chains() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let chains = vec![
            normal_chain(&mut rng, 500, 0.0, 1.0),
            normal_chain(&mut rng, 500, 0.0, 1.0),
            normal_chain(&mut rng, 500, 0.0, 1.0),
        ];
        let rhat = split_rhat(&chains);
        assert!(rhat < 1.02, "rhat {rhat}");
    }

    #[test]
    fn rhat_flags_disagreeing_chains() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let chains = vec![
            normal_chain(&mut rng, 500, 0.0, 1.0),
            normal_chain(&mut rng, 500, 5.0, 1.0),
        ];
        assert!(split_rhat(&chains) > 1.5);
    }

    #[test]
    fn rhat_flags_a_trend_inside_a_single_run() {
        // both chains drift the same way; only the split catches it
        let drift: Vec<f64> = (0..500).map(|i| i as f64 / 100.0).collect();
        let chains = vec![drift.clone(), drift];
        assert!(split_rhat(&chains) > 1.1);
    }

    #[test]
    fn rhat_of_constant_chains_is_one() {
        let chains = vec![vec![2.5; 100], vec![2.5; 100]];
        assert_eq!(split_rhat(&chains), 1.0);
    }

    #[test]
    fn tiny_chains_cannot_be_certified() {
        let chains = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
        assert_eq!(split_rhat(&chains), f64::INFINITY);
    }

    #[test]
    fn ess_shrinks_with_autocorrelation_and_adds_across_chains() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let white = normal_chain(&mut rng, 1000, 0.0, 1.0);
        let mut sticky = vec![0.0f64; 1000];
        for i in 1..sticky.len() {
            sticky[i] = 0.9 * sticky[i - 1] + 0.1 * normal_chain(&mut rng, 1, 0.0, 1.0)[0];
        }

        let ess_white = effective_sample_size(std::slice::from_ref(&white));
        let ess_sticky = effective_sample_size(&[sticky]);
        assert!(ess_white > 500.0, "ess_white {ess_white}");
        assert!(ess_sticky < ess_white / 3.0, "ess_sticky {ess_sticky}");

        let two = effective_sample_size(&[white.clone(), white.clone()]);
        assert!((two - 2.0 * ess_white).abs() < 1e-9);
    }

    #[test]
    fn summary_names_the_worst_offenders_and_gates_on_them() {
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        // parameter 0 mixes, parameter 1 does not
        let mut chains = Vec::new();
        for c in 0..2 {
            let good = normal_chain(&mut rng, 200, 0.0, 1.0);
            let offset = c as f64 * 4.0;
            let bad = normal_chain(&mut rng, 200, offset, 1.0);
            let draws: Vec<Vec<f64>> = good
                .into_iter()
                .zip(bad)
                .map(|(g, b)| vec![g, b])
                .collect();
            chains.push(draws);
        }
        let names = vec!["alpha[Brazil]".to_string(), "alpha[Panama]".to_string()];
        let summary = ConvergenceSummary::evaluate(&chains, &names, 0);

        assert_eq!(summary.max_rhat_param, "alpha[Panama]");
        assert_eq!(summary.total_draws, 400);
        assert!(summary.check(1.05, 0.0).is_err());

        let detail = summary.check(1.05, 0.0).unwrap_err().to_string();
        assert!(detail.contains("alpha[Panama]"));
    }

    #[test]
    fn divergence_budget_is_enforced() {
        let chains = vec![vec![vec![0.0]; 100], vec![vec![0.0]; 100]];
        let names = vec!["mu_delta".to_string()];
        let clean = ConvergenceSummary::evaluate(&chains, &names, 0);
        assert!(clean.check(1.05, 0.001).is_ok());

        let dirty = ConvergenceSummary::evaluate(&chains, &names, 5);
        let err = dirty.check(1.05, 0.001).unwrap_err().to_string();
        assert!(err.contains("divergent transitions"));
    }
}
