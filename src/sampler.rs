use anyhow::{Result, anyhow};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp1, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::model::ModelInput;

/// Energy error beyond which a leapfrog trajectory counts as divergent.
const DELTA_MAX: f64 = 1000.0;

/// Dual-averaging constants from the no-U-turn paper.
const DA_GAMMA: f64 = 0.05;
const DA_T0: f64 = 10.0;
const DA_KAPPA: f64 = 0.75;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub chains: usize,
    /// Total iterations per chain, warmup included.
    pub iterations: usize,
    /// Leading iterations used for adaptation and discarded from output.
    pub warmup: usize,
    pub target_accept: f64,
    pub max_treedepth: usize,
    pub seed: u64,
    /// Starting points are drawn uniformly from this interval around zero.
    pub init_jitter: f64,
    pub max_init_retries: usize,
    /// Convergence gate: largest tolerated split R-hat.
    pub max_rhat: f64,
    /// Convergence gate: tolerated fraction of divergent retained draws.
    pub max_divergence_fraction: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 3,
            iterations: 2000,
            warmup: 500,
            target_accept: 0.95,
            max_treedepth: 10,
            seed: 42,
            init_jitter: 0.1,
            max_init_retries: 100,
            max_rhat: 1.05,
            max_divergence_fraction: 0.001,
        }
    }
}

impl SamplerConfig {
    pub fn retained_per_chain(&self) -> usize {
        self.iterations.saturating_sub(self.warmup)
    }

    fn validate(&self) -> Result<()> {
        if self.chains == 0 {
            return Err(anyhow!("sampler needs at least one chain"));
        }
        if self.iterations <= self.warmup {
            return Err(anyhow!(
                "iterations ({}) must exceed warmup ({})",
                self.iterations,
                self.warmup
            ));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(anyhow!(
                "target acceptance {} must lie strictly inside (0, 1)",
                self.target_accept
            ));
        }
        if self.max_treedepth == 0 || self.max_treedepth > 30 {
            return Err(anyhow!(
                "max tree depth {} out of range 1..=30",
                self.max_treedepth
            ));
        }
        Ok(())
    }
}

/// Post-warmup output of one chain plus the adaptation facts an operator
/// needs to judge the run.
#[derive(Debug, Clone)]
pub struct ChainRun {
    pub draws: Vec<Vec<f64>>,
    pub divergences: usize,
    pub accept_rate: f64,
    pub step_size: f64,
    pub mean_tree_depth: f64,
    pub max_depth_hits: usize,
}

#[derive(Debug, Clone)]
pub struct SampleOutput {
    pub chains: Vec<ChainRun>,
}

impl SampleOutput {
    pub fn total_divergences(&self) -> usize {
        self.chains.iter().map(|c| c.divergences).sum()
    }
}

/// Run the configured number of no-U-turn chains over the model input.
/// Chains are independent: each gets its own deterministic RNG stream
/// derived from the seed, and they only share the read-only input, so the
/// result does not depend on how rayon schedules them.
pub fn sample_posterior(input: &ModelInput, config: &SamplerConfig) -> Result<SampleOutput> {
    config.validate()?;
    let chains: Vec<ChainRun> = (0..config.chains)
        .into_par_iter()
        .map(|chain_idx| run_chain(input, config, chain_idx))
        .collect::<Result<Vec<_>>>()?;
    Ok(SampleOutput { chains })
}

fn run_chain(input: &ModelInput, config: &SamplerConfig, chain_idx: usize) -> Result<ChainRun> {
    let dim = input.layout().dim();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    rng.set_stream(chain_idx as u64);

    let position = find_initial_position(input, config, &mut rng)?;
    let mut current = Point::at(input, position);

    let mut inv_mass = vec![1.0; dim];
    let mut step_size = find_reasonable_epsilon(input, &current, &inv_mass, &mut rng);
    let mut dual = DualAveraging::new(step_size, config.target_accept);
    let mut welford = Welford::new(dim);

    // variance collection window inside warmup; the metric switches over
    // halfway through and step-size adaptation restarts against it
    let collect_from = config.warmup / 4;
    let metric_update_at = config.warmup / 2;

    let retained = config.retained_per_chain();
    let mut draws = Vec::with_capacity(retained);
    let mut divergences = 0usize;
    let mut accept_sum = 0.0f64;
    let mut depth_sum = 0usize;
    let mut max_depth_hits = 0usize;

    for iter in 0..config.iterations {
        let step = nuts_step(
            input,
            &current,
            step_size,
            &inv_mass,
            config.max_treedepth,
            &mut rng,
        );
        current = step.point;

        if iter < config.warmup {
            dual.update(step.accept_prob);
            step_size = dual.current();
            if iter >= collect_from && iter < metric_update_at {
                welford.add(&current.position);
            }
            if iter + 1 == metric_update_at && welford.count >= 10 {
                inv_mass = welford.regularized_variance();
                step_size = find_reasonable_epsilon(input, &current, &inv_mass, &mut rng);
                dual = DualAveraging::new(step_size, config.target_accept);
            }
            if iter + 1 == config.warmup {
                step_size = dual.adapted();
            }
        } else {
            if step.divergent {
                divergences += 1;
            }
            accept_sum += step.accept_prob;
            depth_sum += step.depth;
            if step.depth >= config.max_treedepth {
                max_depth_hits += 1;
            }
            draws.push(current.position.clone());
        }
    }

    let n = retained.max(1) as f64;
    Ok(ChainRun {
        draws,
        divergences,
        accept_rate: accept_sum / n,
        step_size,
        mean_tree_depth: depth_sum as f64 / n,
        max_depth_hits,
    })
}

fn find_initial_position(
    input: &ModelInput,
    config: &SamplerConfig,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<f64>> {
    let dim = input.layout().dim();
    let jitter = config.init_jitter.abs().max(1e-3);
    for _ in 0..config.max_init_retries {
        let theta: Vec<f64> = (0..dim).map(|_| rng.gen_range(-jitter..jitter)).collect();
        if input.log_posterior(&theta).is_finite() {
            return Ok(theta);
        }
    }
    Err(PipelineError::BadInitialization {
        reason: format!(
            "no finite log-density found in {} jittered starts",
            config.max_init_retries
        ),
    }
    .into())
}

/// A phase-space point with its cached density and gradient.
#[derive(Debug, Clone)]
struct Point {
    position: Vec<f64>,
    momentum: Vec<f64>,
    grad: Vec<f64>,
    lp: f64,
}

impl Point {
    fn at(input: &ModelInput, position: Vec<f64>) -> Self {
        let mut grad = vec![0.0; position.len()];
        let lp = input.log_posterior_and_grad(&position, &mut grad);
        if !lp.is_finite() {
            grad.fill(0.0);
        }
        Self {
            position,
            momentum: vec![0.0; grad.len()],
            grad,
            lp,
        }
    }

    fn with_momentum(&self, inv_mass: &[f64], rng: &mut ChaCha8Rng) -> Self {
        let mut refreshed = self.clone();
        for (p, &v) in refreshed.momentum.iter_mut().zip(inv_mass) {
            let z: f64 = StandardNormal.sample(rng);
            *p = z / v.sqrt();
        }
        refreshed
    }
}

fn kinetic(momentum: &[f64], inv_mass: &[f64]) -> f64 {
    0.5 * momentum
        .iter()
        .zip(inv_mass)
        .map(|(&p, &v)| v * p * p)
        .sum::<f64>()
}

fn joint(point: &Point, inv_mass: &[f64]) -> f64 {
    point.lp - kinetic(&point.momentum, inv_mass)
}

fn leapfrog(input: &ModelInput, from: &Point, eps: f64, inv_mass: &[f64]) -> Point {
    let dim = from.position.len();
    let mut momentum = from.momentum.clone();
    for i in 0..dim {
        momentum[i] += 0.5 * eps * from.grad[i];
    }
    let mut position = from.position.clone();
    for i in 0..dim {
        position[i] += eps * inv_mass[i] * momentum[i];
    }
    let mut grad = vec![0.0; dim];
    let lp = input.log_posterior_and_grad(&position, &mut grad);
    if lp.is_finite() {
        for i in 0..dim {
            momentum[i] += 0.5 * eps * grad[i];
        }
    } else {
        grad.fill(0.0);
    }
    Point {
        position,
        momentum,
        grad,
        lp,
    }
}

/// Heuristic from the no-U-turn paper: double or halve the step until one
/// leapfrog step moves the joint density by about ln(1/2).
fn find_reasonable_epsilon(
    input: &ModelInput,
    at: &Point,
    inv_mass: &[f64],
    rng: &mut ChaCha8Rng,
) -> f64 {
    let start = at.with_momentum(inv_mass, rng);
    let joint0 = joint(&start, inv_mass);
    if !joint0.is_finite() {
        return 1e-3;
    }

    let mut eps = 1.0f64;
    let mut probe = leapfrog(input, &start, eps, inv_mass);
    let mut log_ratio = joint(&probe, inv_mass) - joint0;
    let direction: f64 = if log_ratio > (0.5f64).ln() { 1.0 } else { -1.0 };

    for _ in 0..100 {
        if !(direction * log_ratio > -direction * (2.0f64).ln()) {
            break;
        }
        eps *= (2.0f64).powf(direction);
        if !(1e-10..=1e3).contains(&eps) {
            break;
        }
        probe = leapfrog(input, &start, eps, inv_mass);
        log_ratio = joint(&probe, inv_mass) - joint0;
    }
    eps.clamp(1e-10, 1e3)
}

struct StepOutcome {
    point: Point,
    accept_prob: f64,
    divergent: bool,
    depth: usize,
}

fn nuts_step(
    input: &ModelInput,
    current: &Point,
    eps: f64,
    inv_mass: &[f64],
    max_depth: usize,
    rng: &mut ChaCha8Rng,
) -> StepOutcome {
    let start = current.with_momentum(inv_mass, rng);
    let joint0 = joint(&start, inv_mass);
    let slice_draw: f64 = Exp1.sample(rng);
    let log_u = joint0 - slice_draw;

    let mut minus = start.clone();
    let mut plus = start.clone();
    let mut proposal = start.clone();
    let mut n_valid = 1usize;
    let mut depth = 0usize;
    let mut divergent = false;
    let mut accept_sum = 0.0f64;
    let mut accept_count = 0usize;

    while depth < max_depth {
        let go_right = rng.gen_bool(0.5);
        let subtree = if go_right {
            build_tree(input, &plus, log_u, 1.0, depth, eps, inv_mass, joint0, rng)
        } else {
            build_tree(input, &minus, log_u, -1.0, depth, eps, inv_mass, joint0, rng)
        };

        accept_sum += subtree.accept_sum;
        accept_count += subtree.accept_count;
        divergent |= subtree.divergent;

        if subtree.stop {
            break;
        }
        if go_right {
            plus = subtree.plus;
        } else {
            minus = subtree.minus;
        }
        if subtree.n_valid > 0
            && rng.gen_range(0.0..1.0) < subtree.n_valid as f64 / n_valid as f64
        {
            proposal = subtree.proposal;
        }
        n_valid += subtree.n_valid;
        depth += 1;

        if !no_u_turn(&minus, &plus, inv_mass) {
            break;
        }
    }

    StepOutcome {
        point: proposal,
        accept_prob: accept_sum / accept_count.max(1) as f64,
        divergent,
        depth,
    }
}

struct Tree {
    minus: Point,
    plus: Point,
    proposal: Point,
    n_valid: usize,
    stop: bool,
    divergent: bool,
    accept_sum: f64,
    accept_count: usize,
}

#[allow(clippy::too_many_arguments)]
fn build_tree(
    input: &ModelInput,
    from: &Point,
    log_u: f64,
    direction: f64,
    depth: usize,
    eps: f64,
    inv_mass: &[f64],
    joint0: f64,
    rng: &mut ChaCha8Rng,
) -> Tree {
    if depth == 0 {
        let point = leapfrog(input, from, direction * eps, inv_mass);
        let point_joint = joint(&point, inv_mass);
        let n_valid = usize::from(log_u <= point_joint);
        let divergent = !(log_u < point_joint + DELTA_MAX);
        let ratio = (point_joint - joint0).exp();
        let accept = if ratio.is_finite() { ratio.min(1.0) } else { 0.0 };
        return Tree {
            minus: point.clone(),
            plus: point.clone(),
            proposal: point,
            n_valid,
            stop: divergent,
            divergent,
            accept_sum: accept,
            accept_count: 1,
        };
    }

    let mut first = build_tree(
        input,
        from,
        log_u,
        direction,
        depth - 1,
        eps,
        inv_mass,
        joint0,
        rng,
    );
    if first.stop {
        return first;
    }

    let edge = if direction > 0.0 { &first.plus } else { &first.minus };
    let second = build_tree(
        input, edge, log_u, direction, depth - 1, eps, inv_mass, joint0, rng,
    );

    let total = first.n_valid + second.n_valid;
    if second.n_valid > 0 && rng.gen_range(0.0..1.0) * (total as f64) < second.n_valid as f64 {
        first.proposal = second.proposal.clone();
    }
    if direction > 0.0 {
        first.plus = second.plus;
    } else {
        first.minus = second.minus;
    }
    first.n_valid = total;
    first.divergent |= second.divergent;
    first.accept_sum += second.accept_sum;
    first.accept_count += second.accept_count;
    first.stop = second.stop || !no_u_turn(&first.minus, &first.plus, inv_mass);
    first
}

/// Keep extending while both trajectory ends still move apart, measured in
/// the metric the momenta were drawn in.
fn no_u_turn(minus: &Point, plus: &Point, inv_mass: &[f64]) -> bool {
    let mut dot_minus = 0.0f64;
    let mut dot_plus = 0.0f64;
    for i in 0..minus.position.len() {
        let dq = plus.position[i] - minus.position[i];
        dot_minus += dq * inv_mass[i] * minus.momentum[i];
        dot_plus += dq * inv_mass[i] * plus.momentum[i];
    }
    dot_minus >= 0.0 && dot_plus >= 0.0
}

struct DualAveraging {
    mu: f64,
    log_eps: f64,
    log_eps_bar: f64,
    h_bar: f64,
    m: f64,
    target: f64,
}

impl DualAveraging {
    fn new(initial_eps: f64, target: f64) -> Self {
        let eps = initial_eps.max(1e-10);
        Self {
            mu: (10.0 * eps).ln(),
            log_eps: eps.ln(),
            log_eps_bar: 0.0,
            h_bar: 0.0,
            m: 0.0,
            target,
        }
    }

    fn update(&mut self, accept_prob: f64) {
        self.m += 1.0;
        let frac = 1.0 / (self.m + DA_T0);
        self.h_bar = (1.0 - frac) * self.h_bar + frac * (self.target - accept_prob);
        self.log_eps = self.mu - self.m.sqrt() / DA_GAMMA * self.h_bar;
        let weight = self.m.powf(-DA_KAPPA);
        self.log_eps_bar = weight * self.log_eps + (1.0 - weight) * self.log_eps_bar;
    }

    fn current(&self) -> f64 {
        self.log_eps.exp()
    }

    fn adapted(&self) -> f64 {
        if self.m > 0.0 {
            self.log_eps_bar.exp()
        } else {
            self.current()
        }
    }
}

struct Welford {
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl Welford {
    fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    fn add(&mut self, x: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for i in 0..x.len() {
            let delta = x[i] - self.mean[i];
            self.mean[i] += delta / n;
            self.m2[i] += delta * (x[i] - self.mean[i]);
        }
    }

    /// Sample variance shrunk toward a small constant, so a short
    /// collection window cannot produce a degenerate metric.
    fn regularized_variance(&self) -> Vec<f64> {
        let n = self.count as f64;
        self.m2
            .iter()
            .map(|&m2| {
                let var = if self.count > 1 { m2 / (n - 1.0) } else { 1.0 };
                (n / (n + 5.0)) * var + 1e-3 * (5.0 / (n + 5.0))
            })
            .collect()
    }
}
