//! Immutable run configuration.
//!
//! Every record has defaults, can be set from CLI flags, and can be
//! overlaid with a JSON object (`--params`) whose keys match field names.

use anyhow::{ensure, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Overlay the keys of `params` on `base`. Unknown keys are rejected.
pub fn overlay<T: Serialize + DeserializeOwned>(base: T, params: &Value) -> Result<T> {
    let mut merged = serde_json::to_value(base)?;
    match (merged.as_object_mut(), params) {
        (_, Value::Null) => {}
        (Some(target), Value::Object(extra)) => {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }
        _ => anyhow::bail!("params must be a JSON object"),
    }
    serde_json::from_value(merged).context("Invalid params")
}

/// Random-rollout data collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectConfig {
    pub episodes: usize,
    pub workers: usize,
    /// Episode `i` is seeded with `seed + i`.
    pub seed: u64,
}

impl Default for CollectConfig {
    fn default() -> Self {
        CollectConfig { episodes: 200, workers: 4, seed: 0 }
    }
}

/// Forward-model training.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub hidden: Vec<usize>,
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f64,
    /// Lower clip for normalization standard deviations.
    pub std_floor: f64,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig { hidden: vec![64, 64], epochs: 30, batch_size: 64, lr: 1e-3, std_floor: 1e-4, seed: 0 }
    }
}

/// Per-timestep CEM planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    pub horizon: usize,
    pub pop_size: usize,
    pub elite_ratio: f64,
    pub stdev_init: f64,
    pub iterations: usize,
    pub action_low: f64,
    pub action_high: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            horizon: 4,
            pop_size: 200,
            elite_ratio: 0.5,
            stdev_init: 0.5,
            iterations: 10,
            action_low: -1.0,
            action_high: 1.0,
        }
    }
}

impl PlannerConfig {
    pub fn bounds(&self) -> (f64, f64) {
        (self.action_low, self.action_high)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.horizon > 0, "horizon must be positive");
        ensure!(self.pop_size > 0, "pop_size must be positive");
        ensure!(self.action_low <= self.action_high, "action_low exceeds action_high");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Pgpe,
    Cem,
}

/// Policy search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub algorithm: Algorithm,
    pub generations: usize,
    pub pop_size: usize,
    pub eval_episodes: usize,
    /// Hidden layers; `None` uses the environment default.
    pub hidden: Option<Vec<usize>>,
    pub stdev_init: f64,
    pub center_lr: f64,
    pub stdev_lr: f64,
    pub stdev_max_change: f64,
    pub elite_ratio: f64,
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            algorithm: Algorithm::Pgpe,
            generations: 50,
            pop_size: 50,
            eval_episodes: 3,
            hidden: None,
            stdev_init: 0.5,
            center_lr: 0.5,
            stdev_lr: 0.1,
            stdev_max_change: 0.2,
            elite_ratio: 0.5,
            seed: 42,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overlay_replaces_present_keys() {
        let cfg = overlay(PlannerConfig::default(), &json!({"horizon": 8, "stdev_init": 0.2})).unwrap();
        assert_eq!(cfg.horizon, 8);
        assert_eq!(cfg.stdev_init, 0.2);
        assert_eq!(cfg.pop_size, PlannerConfig::default().pop_size);
    }

    #[test]
    fn test_overlay_null_is_noop() {
        let cfg = overlay(CollectConfig { episodes: 3, ..Default::default() }, &Value::Null).unwrap();
        assert_eq!(cfg.episodes, 3);
    }

    #[test]
    fn test_overlay_rejects_unknown_and_non_objects() {
        assert!(overlay(TrainConfig::default(), &json!({"epochz": 3})).is_err());
        assert!(overlay(TrainConfig::default(), &json!([1, 2])).is_err());
    }

    #[test]
    fn test_algorithm_from_params() {
        let cfg = overlay(SearchConfig::default(), &json!({"algorithm": "cem", "hidden": [8]})).unwrap();
        assert_eq!(cfg.algorithm, Algorithm::Cem);
        assert_eq!(cfg.hidden, Some(vec![8]));
    }

    #[test]
    fn test_planner_validate() {
        assert!(PlannerConfig::default().validate().is_ok());
        assert!(PlannerConfig { horizon: 0, ..Default::default() }.validate().is_err());
    }
}
