use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::match_data::MatchRecord;
use crate::registry::TeamRegistry;
use crate::weighting::{DateSpan, match_weight};

/// Scale of the soft sum-to-zero pull on the ability block. Tight enough
/// to pin the overall level, loose enough not to distort the geometry the
/// sampler sees.
const CENTER_SCALE: f64 = 0.05;

/// Half-Normal scale shared by both pooling hyperpriors.
const HYPER_SCALE: f64 = 1.0;

/// Index map over the flattened unconstrained parameter vector:
/// `[alpha(T), delta(T), mu_delta, log_sigma_alpha, log_sigma_delta]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamLayout {
    pub num_teams: usize,
}

impl ParamLayout {
    pub fn new(num_teams: usize) -> Self {
        Self { num_teams }
    }

    pub fn dim(&self) -> usize {
        2 * self.num_teams + 3
    }

    pub fn alpha(&self, team: usize) -> usize {
        team
    }

    pub fn delta(&self, team: usize) -> usize {
        self.num_teams + team
    }

    pub fn mu_delta(&self) -> usize {
        2 * self.num_teams
    }

    pub fn log_sigma_alpha(&self) -> usize {
        2 * self.num_teams + 1
    }

    pub fn log_sigma_delta(&self) -> usize {
        2 * self.num_teams + 2
    }

    /// Human-readable name per coordinate, aligned with the layout. The
    /// scale parameters are named on the scale they are sampled on.
    pub fn parameter_names(&self, registry: &TeamRegistry) -> Vec<String> {
        let mut names = Vec::with_capacity(self.dim());
        for team in registry.names() {
            names.push(format!("alpha[{team}]"));
        }
        for team in registry.names() {
            names.push(format!("delta[{team}]"));
        }
        names.push("mu_delta".to_string());
        names.push("log_sigma_alpha".to_string());
        names.push("log_sigma_delta".to_string());
        names
    }
}

/// One training match resolved to dense team indices, with everything the
/// density evaluation needs precomputed.
#[derive(Debug, Clone)]
struct ObservedMatch {
    home: usize,
    away: usize,
    home_goals: f64,
    away_goals: f64,
    /// 1.0 when the home side actually played at home, 0.0 on neutral soil.
    home_indicator: f64,
    weight: f64,
    /// ln(home_goals!) + ln(away_goals!), constant per match.
    ln_factorials: f64,
}

/// Id-resolved, weighted training data. Read-only once built; chains share
/// it by reference.
#[derive(Debug, Clone)]
pub struct ModelInput {
    num_teams: usize,
    matches: Vec<ObservedMatch>,
}

impl ModelInput {
    pub fn build(
        matches: &[MatchRecord],
        registry: &TeamRegistry,
        span: &DateSpan,
    ) -> Result<Self> {
        let mut observed = Vec::with_capacity(matches.len());
        for m in matches {
            let home = registry.id_of(&m.home_team)? as usize - 1;
            let away = registry.id_of(&m.away_team)? as usize - 1;
            let weight = match_weight(m, span)?;
            observed.push(ObservedMatch {
                home,
                away,
                home_goals: f64::from(m.home_score),
                away_goals: f64::from(m.away_score),
                home_indicator: if m.neutral { 0.0 } else { 1.0 },
                weight,
                ln_factorials: ln_factorial(m.home_score) + ln_factorial(m.away_score),
            });
        }
        Ok(Self {
            num_teams: registry.num_teams(),
            matches: observed,
        })
    }

    pub fn num_teams(&self) -> usize {
        self.num_teams
    }

    pub fn num_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn layout(&self) -> ParamLayout {
        ParamLayout::new(self.num_teams)
    }

    /// Smallest and largest per-match weight, for the run summary.
    pub fn weight_range(&self) -> Option<(f64, f64)> {
        let mut weights = self.matches.iter().map(|m| m.weight);
        let first = weights.next()?;
        let (lo, hi) = weights.fold((first, first), |(lo, hi), w| (lo.min(w), hi.max(w)));
        Some((lo, hi))
    }

    /// SHA-256 over the resolved matches and weights, hex encoded. Stored
    /// in the fit artifact so a reload can prove it belongs to this input.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.num_teams as u64).to_le_bytes());
        hasher.update((self.matches.len() as u64).to_le_bytes());
        for m in &self.matches {
            hasher.update((m.home as u64).to_le_bytes());
            hasher.update((m.away as u64).to_le_bytes());
            hasher.update(m.home_goals.to_le_bytes());
            hasher.update(m.away_goals.to_le_bytes());
            hasher.update(m.home_indicator.to_le_bytes());
            hasher.update(m.weight.to_le_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Joint log-density of the weighted Poisson likelihood and all priors,
    /// with its analytic gradient written into `grad`. When the return
    /// value is not finite the gradient buffer is unspecified; callers must
    /// treat such points as off the posterior.
    pub fn log_posterior_and_grad(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
        let layout = self.layout();
        debug_assert_eq!(theta.len(), layout.dim());
        debug_assert_eq!(grad.len(), layout.dim());
        grad.fill(0.0);

        let t = self.num_teams;
        let (alpha, rest) = theta.split_at(t);
        let (delta, hyper) = rest.split_at(t);
        let mu_delta = hyper[0];
        let zeta_alpha = hyper[1];
        let zeta_delta = hyper[2];
        let sigma_alpha = zeta_alpha.exp();
        let sigma_delta = zeta_delta.exp();
        if !sigma_alpha.is_finite() || !sigma_delta.is_finite() {
            return f64::NEG_INFINITY;
        }
        let var_alpha = sigma_alpha * sigma_alpha;
        let var_delta = sigma_delta * sigma_delta;
        if var_alpha == 0.0 || var_delta == 0.0 {
            return f64::NEG_INFINITY;
        }

        let mut lp = 0.0_f64;

        for m in &self.matches {
            let eta_home = alpha[m.home] - alpha[m.away] + delta[m.home] * m.home_indicator;
            let eta_away = alpha[m.away] - alpha[m.home];
            let lambda_home = eta_home.exp();
            let lambda_away = eta_away.exp();
            if !lambda_home.is_finite() || !lambda_away.is_finite() {
                return f64::NEG_INFINITY;
            }
            lp += m.weight
                * (m.home_goals * eta_home - lambda_home + m.away_goals * eta_away
                    - lambda_away
                    - m.ln_factorials);
            let resid_home = m.weight * (m.home_goals - lambda_home);
            let resid_away = m.weight * (m.away_goals - lambda_away);
            grad[layout.alpha(m.home)] += resid_home - resid_away;
            grad[layout.alpha(m.away)] += resid_away - resid_home;
            grad[layout.delta(m.home)] += resid_home * m.home_indicator;
        }

        // alpha ~ Normal(0, sigma_alpha), partially pooled
        let mut alpha_sum = 0.0_f64;
        let mut alpha_sq_sum = 0.0_f64;
        for (i, &a) in alpha.iter().enumerate() {
            lp += -0.5 * a * a / var_alpha - zeta_alpha;
            grad[layout.alpha(i)] += -a / var_alpha;
            alpha_sum += a;
            alpha_sq_sum += a * a;
        }

        // delta ~ Normal(mu_delta, sigma_delta)
        let mut delta_dev_sum = 0.0_f64;
        let mut delta_dev_sq_sum = 0.0_f64;
        for (i, &d) in delta.iter().enumerate() {
            let dev = d - mu_delta;
            lp += -0.5 * dev * dev / var_delta - zeta_delta;
            grad[layout.delta(i)] += -dev / var_delta;
            delta_dev_sum += dev;
            delta_dev_sq_sum += dev * dev;
        }

        // soft sum-to-zero identification of the ability block
        lp += -0.5 * (alpha_sum / CENTER_SCALE) * (alpha_sum / CENTER_SCALE);
        let center_pull = -alpha_sum / (CENTER_SCALE * CENTER_SCALE);
        for g in grad[..t].iter_mut() {
            *g += center_pull;
        }

        // mu_delta ~ Normal(0, 1)
        lp += -0.5 * mu_delta * mu_delta;
        grad[layout.mu_delta()] = delta_dev_sum / var_delta - mu_delta;

        // sigma ~ HalfNormal(HYPER_SCALE), sampled as log sigma with the
        // change-of-variable term folded in.
        let hyper_var = HYPER_SCALE * HYPER_SCALE;
        lp += -0.5 * var_alpha / hyper_var + zeta_alpha;
        lp += -0.5 * var_delta / hyper_var + zeta_delta;
        let teams = t as f64;
        grad[layout.log_sigma_alpha()] =
            alpha_sq_sum / var_alpha - teams - var_alpha / hyper_var + 1.0;
        grad[layout.log_sigma_delta()] =
            delta_dev_sq_sum / var_delta - teams - var_delta / hyper_var + 1.0;

        lp
    }

    pub fn log_posterior(&self, theta: &[f64]) -> f64 {
        let mut grad = vec![0.0; self.layout().dim()];
        self.log_posterior_and_grad(theta, &mut grad)
    }
}

fn ln_factorial(n: u32) -> f64 {
    (1..=n).map(|k| f64::from(k).ln()).sum()
}
