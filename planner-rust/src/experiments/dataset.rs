//! Transition datasets for forward-model training.
//!
//! Random-action rollouts are spread over a dedicated rayon pool. Every
//! episode is seeded from its index, so the collected rows do not depend
//! on how many workers ran them.

use super::env;
use super::reacher;
use crate::config::CollectConfig;
use anyhow::{ensure, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Projection from a raw observation to the state a model predicts.
pub type StateFn = fn(&[f32]) -> Vec<f64>;

fn raw_state(obs: &[f32]) -> Vec<f64> {
    obs.iter().map(|&v| v as f64).collect()
}

/// State projection used for an environment.
pub fn state_fn(env_name: &str) -> StateFn {
    match env_name {
        "Reacher-v1" => reacher::extract_state,
        _ => raw_state,
    }
}

/// Paired model inputs (`state ++ action`) and targets (`next_state − state`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub inputs: Vec<Vec<f64>>,
    pub targets: Vec<Vec<f64>>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn append(&mut self, mut other: Dataset) {
        self.inputs.append(&mut other.inputs);
        self.targets.append(&mut other.targets);
    }
}

/// Per-column mean and standard deviation.
/// The standard deviation is stored already clipped to the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormStats {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl NormStats {
    pub fn fit(rows: &[Vec<f64>], std_floor: f64) -> Result<Self> {
        ensure!(std_floor > 0.0, "std_floor must be positive, got {std_floor}");
        ensure!(!rows.is_empty(), "cannot fit normalization statistics to an empty dataset");
        let dim = rows[0].len();
        ensure!(rows.iter().all(|r| r.len() == dim), "rows have inconsistent lengths");

        let n = rows.len() as f64;
        let mut mean = vec![0.0; dim];
        for row in rows {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; dim];
        for row in rows {
            for j in 0..dim {
                var[j] += (row[j] - mean[j]).powi(2);
            }
        }
        let std = var.iter().map(|v| (v / n).sqrt().max(std_floor)).collect();

        Ok(NormStats { mean, std })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn normalize(&self, x: &[f64]) -> Vec<f64> {
        x.iter().zip(&self.mean).zip(&self.std).map(|((v, m), s)| (v - m) / s).collect()
    }

    pub fn denormalize(&self, x: &[f64]) -> Vec<f64> {
        x.iter().zip(&self.mean).zip(&self.std).map(|((v, m), s)| v * s + m).collect()
    }
}

/// Run one random-action episode and record its transitions.
pub fn collect_episode(env_name: &str, seed: u64, project: StateFn) -> Result<Dataset> {
    let mut env = env::make(env_name, Some(seed))?;
    let action_space = env.config().action_space;
    let max_steps = env.config().max_steps;
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(0x9E37_79B9_7F4A_7C15));

    let mut obs = env.reset(Some(seed));
    let mut data = Dataset::default();
    for _ in 0..max_steps {
        let action = action_space.sample(&mut rng);
        let result = env.step(&action);

        let state = project(&obs);
        let next_state = project(&result.observation);
        let mut input = state.clone();
        input.extend(action.to_vec());
        data.inputs.push(input);
        data.targets.push(next_state.iter().zip(&state).map(|(n, s)| n - s).collect());

        if result.done() { break; }
        obs = result.observation;
    }
    Ok(data)
}

/// Split `0..n` into `parts` contiguous ranges whose sizes differ by at most one.
fn partition(n: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let (base, extra) = (n / parts, n % parts);
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .filter(|r| !r.is_empty())
        .collect()
}

/// Collect `cfg.episodes` random-action episodes on `cfg.workers` threads.
pub fn collect(env_name: &str, cfg: &CollectConfig) -> Result<Dataset> {
    // Fail fast on unknown names before spinning up the pool
    env::get_env_config(env_name).with_context(|| format!("Unknown environment: {env_name}"))?;
    let project = state_fn(env_name);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.workers.max(1))
        .build()
        .context("Failed to build collection thread pool")?;

    let chunks = partition(cfg.episodes, cfg.workers);
    tracing::info!(env = env_name, episodes = cfg.episodes, workers = chunks.len(), "Collecting random rollouts");

    let parts: Vec<Dataset> = pool.install(|| {
        chunks
            .par_iter()
            .map(|range| -> Result<Dataset> {
                let mut part = Dataset::default();
                for ep in range.clone() {
                    part.append(collect_episode(env_name, cfg.seed.wrapping_add(ep as u64), project)?);
                }
                tracing::debug!(episodes = range.len(), rows = part.len(), "Worker finished");
                Ok(part)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let mut data = Dataset::default();
    for part in parts {
        data.append(part);
    }
    tracing::info!(rows = data.len(), "Collected transitions");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(episodes: usize, workers: usize) -> CollectConfig {
        CollectConfig { episodes, workers, seed: 11 }
    }

    #[test]
    fn test_partition_covers_all() {
        let parts = partition(10, 3);
        assert_eq!(parts, vec![0..4, 4..7, 7..10]);
        assert_eq!(partition(2, 4), vec![0..1, 1..2]);
        assert!(partition(0, 3).is_empty());
    }

    #[test]
    fn test_row_count_is_sum_of_episode_lengths() {
        let expected: usize = (0..6)
            .map(|ep| collect_episode("CartPole-v1", 11 + ep, raw_state).unwrap().len())
            .sum();
        let data = collect("CartPole-v1", &cfg(6, 4)).unwrap();
        assert_eq!(data.len(), expected);
        assert_eq!(data.targets.len(), expected);
    }

    #[test]
    fn test_worker_count_does_not_change_data() {
        let one = collect("Reacher-v1", &cfg(5, 1)).unwrap();
        let three = collect("Reacher-v1", &cfg(5, 3)).unwrap();
        assert_eq!(one.len(), 5 * 50);
        assert_eq!(one, three);
    }

    #[test]
    fn test_targets_are_state_deltas() {
        let data = collect_episode("Reacher-v1", 3, reacher::extract_state).unwrap();
        let sd = reacher::STATE_DIM;
        assert_eq!(data.inputs[0].len(), sd + reacher::ACTION_DIM);
        for i in 0..data.len() - 1 {
            for j in 0..sd {
                let predicted = data.inputs[i][j] + data.targets[i][j];
                assert!((predicted - data.inputs[i + 1][j]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_unknown_env_fails() {
        assert!(collect("Nope-v0", &cfg(2, 2)).is_err());
    }

    #[test]
    fn test_norm_stats() {
        let rows: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64, 3.0, -2.0 * i as f64 + 1.0]).collect();
        let stats = NormStats::fit(&rows, 1e-4).unwrap();
        assert_eq!(stats.std[1], 1e-4);

        let normed: Vec<Vec<f64>> = rows.iter().map(|r| stats.normalize(r)).collect();
        for j in [0, 2] {
            let m = normed.iter().map(|r| r[j]).sum::<f64>() / 100.0;
            let v = normed.iter().map(|r| (r[j] - m).powi(2)).sum::<f64>() / 100.0;
            assert!(m.abs() < 1e-9);
            assert!((v - 1.0).abs() < 1e-9);
        }
        // Constant column: divided by the floor, not blown up
        assert!(normed.iter().all(|r| r[1] == 0.0));

        let back = stats.denormalize(&normed[17]);
        for (a, b) in back.iter().zip(&rows[17]) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_norm_stats_rejects_empty() {
        assert!(NormStats::fit(&[], 1e-4).is_err());
    }

    #[test]
    fn test_norm_stats_rejects_non_positive_floor() {
        let rows = vec![vec![2.0, 1.0], vec![2.0, 3.0]];
        for floor in [0.0, -1.0, f64::NAN] {
            assert!(NormStats::fit(&rows, floor).is_err(), "floor {floor} accepted");
        }
    }
}
