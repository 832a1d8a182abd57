//! Population-based search for evoplan.
//!
//! A [`Problem`] declares the solution length, optional box bounds, the
//! objective sense and a batch evaluation entry point. A [`SearchAlgorithm`]
//! refines a sampling distribution over solutions and exposes its progress
//! through a [`SearchStatus`].
//!
//! - CEM: cross-entropy method (refit a diagonal Gaussian to the elites)
//! - PGPE: policy gradients with parameter-based exploration
//!   (Sehnke et al. 2010), with centered-rank fitness shaping.

use super::policy::randn;
use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

/// Whether lower or higher objective values are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectiveSense {
    Minimize,
    Maximize,
}

impl ObjectiveSense {
    /// Maps an objective value to a utility where higher is always better.
    /// NaN counts as the worst possible value.
    pub fn utility(self, value: f64) -> f64 {
        if value.is_nan() {
            return f64::NEG_INFINITY;
        }
        match self {
            ObjectiveSense::Minimize => -value,
            ObjectiveSense::Maximize => value,
        }
    }

    pub fn is_better(self, a: f64, b: f64) -> bool {
        self.utility(a) > self.utility(b)
    }
}

/// Something a search algorithm can optimize.
pub trait Problem {
    /// Length of every candidate solution vector.
    fn solution_length(&self) -> usize;

    /// Inclusive bounds applied to every component, if any.
    fn bounds(&self) -> Option<(f64, f64)> {
        None
    }

    fn sense(&self) -> ObjectiveSense;

    /// Evaluate a batch of candidates, one objective value per row.
    fn evaluate_batch(&self, batch: &[Vec<f64>]) -> Result<Vec<f64>>;
}

/// Progress of a search run, read by callers after `run`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchStatus {
    /// Completed iterations.
    pub iter: usize,
    /// Best solution evaluated so far.
    pub best: Vec<f64>,
    pub best_eval: f64,
    /// Current center of the sampling distribution.
    pub center: Vec<f64>,
    /// Mean standard deviation of the sampling distribution.
    pub stdev: f64,
    /// Best and mean objective value of the latest population.
    pub pop_best_eval: f64,
    pub mean_eval: f64,
}

impl SearchStatus {
    fn new(center: &[f64], stdev: &[f64]) -> Self {
        SearchStatus {
            iter: 0,
            best: Vec::new(),
            best_eval: f64::NAN,
            center: center.to_vec(),
            stdev: mean(stdev),
            pop_best_eval: f64::NAN,
            mean_eval: f64::NAN,
        }
    }

    fn record(&mut self, sense: ObjectiveSense, population: &[Vec<f64>], evals: &[f64], center: &[f64], stdev: &[f64]) {
        let idx = best_index(sense, evals);
        if self.best.is_empty() || sense.is_better(evals[idx], self.best_eval) {
            self.best = population[idx].clone();
            self.best_eval = evals[idx];
        }
        self.pop_best_eval = evals[idx];
        self.mean_eval = mean(evals);
        self.center = center.to_vec();
        self.stdev = mean(stdev);
        self.iter += 1;
    }
}

/// Iterative population refinement.
pub trait SearchAlgorithm {
    /// Sample one population, evaluate it, update the distribution.
    fn step<P: Problem + ?Sized>(&mut self, problem: &P) -> Result<()>;

    fn run<P: Problem + ?Sized>(&mut self, problem: &P, iterations: usize) -> Result<()> {
        for _ in 0..iterations {
            self.step(problem)?;
        }
        Ok(())
    }

    fn status(&self) -> &SearchStatus;
}

fn mean(x: &[f64]) -> f64 {
    if x.is_empty() { return 0.0; }
    x.iter().sum::<f64>() / x.len() as f64
}

fn best_index(sense: ObjectiveSense, evals: &[f64]) -> usize {
    evals.iter()
        .enumerate()
        .max_by(|a, b| sense.utility(*a.1).total_cmp(&sense.utility(*b.1)))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn clip(x: &mut [f64], bounds: Option<(f64, f64)>) {
    if let Some((lo, hi)) = bounds {
        for v in x {
            *v = v.clamp(lo, hi);
        }
    }
}

fn check_problem<P: Problem + ?Sized>(problem: &P, center: &[f64]) -> Result<()> {
    ensure!(
        problem.solution_length() == center.len(),
        "solution length {} does not match search dimension {}",
        problem.solution_length(),
        center.len()
    );
    Ok(())
}

fn evaluate<P: Problem + ?Sized>(problem: &P, population: &[Vec<f64>]) -> Result<Vec<f64>> {
    let evals = problem.evaluate_batch(population)?;
    ensure!(
        evals.len() == population.len(),
        "problem returned {} evaluations for {} candidates",
        evals.len(),
        population.len()
    );
    Ok(evals)
}

// ─── CEM ──────────────────────────────────────────────────────────────

/// Cross-entropy method with a diagonal Gaussian.
pub struct Cem {
    pub center: Vec<f64>,
    pub stdev: Vec<f64>,
    pub pop_size: usize,
    /// Fraction of the population used to refit the distribution.
    pub elite_ratio: f64,
    rng: StdRng,
    status: SearchStatus,
}

impl Cem {
    pub fn new(center: Vec<f64>, stdev_init: f64, pop_size: usize, elite_ratio: f64, seed: u64) -> Self {
        let stdev = vec![stdev_init; center.len()];
        let status = SearchStatus::new(&center, &stdev);
        Cem {
            center,
            stdev,
            pop_size: pop_size.max(1),
            elite_ratio: elite_ratio.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
            status,
        }
    }

    fn n_elites(&self) -> usize {
        ((self.pop_size as f64 * self.elite_ratio).round() as usize).clamp(1, self.pop_size)
    }

    /// Sample a population of candidates.
    pub fn ask(&mut self, bounds: Option<(f64, f64)>) -> Vec<Vec<f64>> {
        (0..self.pop_size)
            .map(|_| {
                let mut x: Vec<f64> = self.center.iter()
                    .zip(&self.stdev)
                    .map(|(&c, &s)| c + s * randn(&mut self.rng))
                    .collect();
                clip(&mut x, bounds);
                x
            })
            .collect()
    }

    /// Refit the distribution to the elites of an evaluated population.
    pub fn tell(&mut self, sense: ObjectiveSense, population: &[Vec<f64>], evals: &[f64]) {
        let mut indices: Vec<usize> = (0..population.len()).collect();
        indices.sort_by(|&a, &b| sense.utility(evals[b]).total_cmp(&sense.utility(evals[a])));
        let elites = &indices[..self.n_elites().min(indices.len())];
        let k = elites.len() as f64;

        for i in 0..self.center.len() {
            let m = elites.iter().map(|&e| population[e][i]).sum::<f64>() / k;
            let var = elites.iter().map(|&e| (population[e][i] - m).powi(2)).sum::<f64>() / k;
            self.center[i] = m;
            self.stdev[i] = var.sqrt().max(1e-8);
        }

        self.status.record(sense, population, evals, &self.center, &self.stdev);
    }
}

impl SearchAlgorithm for Cem {
    fn step<P: Problem + ?Sized>(&mut self, problem: &P) -> Result<()> {
        check_problem(problem, &self.center)?;
        let population = self.ask(problem.bounds());
        let evals = evaluate(problem, &population)?;
        self.tell(problem.sense(), &population, &evals);
        Ok(())
    }

    fn status(&self) -> &SearchStatus {
        &self.status
    }
}

// ─── PGPE ─────────────────────────────────────────────────────────────

/// PGPE with symmetric (mirrored) sampling.
pub struct Pgpe {
    pub center: Vec<f64>,
    pub stdev: Vec<f64>,
    /// Number of mirrored pairs; the population is twice this.
    pub n_pairs: usize,
    pub center_lr: f64,
    pub stdev_lr: f64,
    /// Largest relative change of any stdev component per generation.
    pub stdev_max_change: f64,
    rng: StdRng,
    status: SearchStatus,
}

impl Pgpe {
    pub fn new(
        center: Vec<f64>,
        stdev_init: f64,
        pop_size: usize,
        center_lr: f64,
        stdev_lr: f64,
        stdev_max_change: f64,
        seed: u64,
    ) -> Self {
        let stdev = vec![stdev_init; center.len()];
        let status = SearchStatus::new(&center, &stdev);
        Pgpe {
            center,
            stdev,
            n_pairs: (pop_size / 2).max(1),
            center_lr,
            stdev_lr,
            stdev_max_change,
            rng: StdRng::seed_from_u64(seed),
            status,
        }
    }

    pub fn pop_size(&self) -> usize {
        2 * self.n_pairs
    }
}

impl SearchAlgorithm for Pgpe {
    fn step<P: Problem + ?Sized>(&mut self, problem: &P) -> Result<()> {
        check_problem(problem, &self.center)?;
        let n = self.center.len();
        let bounds = problem.bounds();

        let epsilons: Vec<Vec<f64>> = (0..self.n_pairs)
            .map(|_| self.stdev.iter().map(|&s| s * randn(&mut self.rng)).collect())
            .collect();

        // population[2i] = center + ε_i, population[2i+1] = center − ε_i
        let mut population = Vec::with_capacity(2 * self.n_pairs);
        for eps in &epsilons {
            let mut plus: Vec<f64> = (0..n).map(|j| self.center[j] + eps[j]).collect();
            let mut minus: Vec<f64> = (0..n).map(|j| self.center[j] - eps[j]).collect();
            clip(&mut plus, bounds);
            clip(&mut minus, bounds);
            population.push(plus);
            population.push(minus);
        }

        let evals = evaluate(problem, &population)?;
        let sense = problem.sense();
        let utilities: Vec<f64> = evals.iter().map(|&e| sense.utility(e)).collect();
        let ranks = compute_centered_ranks(&utilities);
        let base = mean(&ranks);

        let mut grad_center = vec![0.0f64; n];
        let mut grad_stdev = vec![0.0f64; n];
        for (i, eps) in epsilons.iter().enumerate() {
            let diff = 0.5 * (ranks[2 * i] - ranks[2 * i + 1]);
            let avg = 0.5 * (ranks[2 * i] + ranks[2 * i + 1]) - base;
            for j in 0..n {
                grad_center[j] += diff * eps[j];
                grad_stdev[j] += avg * (eps[j] * eps[j] - self.stdev[j] * self.stdev[j]) / self.stdev[j];
            }
        }

        let pairs = self.n_pairs as f64;
        for j in 0..n {
            self.center[j] += self.center_lr * grad_center[j] / pairs;

            let old = self.stdev[j];
            let max_delta = self.stdev_max_change * old;
            let delta = (self.stdev_lr * grad_stdev[j] / pairs).clamp(-max_delta, max_delta);
            self.stdev[j] = (old + delta).max(1e-8);
        }
        clip(&mut self.center, bounds);

        self.status.record(sense, &population, &evals, &self.center, &self.stdev);
        Ok(())
    }

    fn status(&self) -> &SearchStatus {
        &self.status
    }
}

/// Compute centered ranks: maps fitness values to [-0.5, 0.5] based on rank.
/// Reference: OpenAI's evolution-strategies-starter/es.py
pub fn compute_centered_ranks(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n <= 1 { return vec![0.0; n]; }
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
    let mut ranks = vec![0.0; n];
    for (rank, &idx) in indices.iter().enumerate() {
        ranks[idx] = rank as f64 / (n - 1) as f64 - 0.5;
    }
    ranks
}
