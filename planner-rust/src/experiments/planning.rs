//! Model-predictive control for the Reacher.
//!
//! Every timestep builds a fresh [`ReachProblem`] from the current
//! observation, runs a short CEM search over action plans scored through
//! the forward model, applies the first action of the best plan and
//! throws the rest away.

use super::env::{Action, Environment};
use super::reacher::{self, Reacher};
use super::rollout::{rollout, Dynamics};
use super::search::{Cem, ObjectiveSense, Problem, SearchAlgorithm};
use crate::config::PlannerConfig;
use anyhow::{ensure, Result};
use serde::Serialize;

/// Scores candidate plans by how far the predicted tip ends up from the goal.
pub struct ReachProblem<'a, D: Dynamics + ?Sized> {
    model: &'a D,
    state: Vec<f64>,
    goal: [f64; 2],
    horizon: usize,
    bounds: (f64, f64),
}

impl<'a, D: Dynamics + ?Sized> ReachProblem<'a, D> {
    /// Fix the current state and goal from a Reacher observation.
    pub fn new(model: &'a D, obs: &[f32], cfg: &PlannerConfig) -> Result<Self> {
        ensure!(obs.len() == reacher::OBS_DIM, "expected a Reacher observation, got {} values", obs.len());
        Self::from_state(model, reacher::extract_state(obs), reacher::goal(obs), cfg)
    }

    pub fn from_state(model: &'a D, state: Vec<f64>, goal: [f64; 2], cfg: &PlannerConfig) -> Result<Self> {
        cfg.validate()?;
        ensure!(
            state.len() == model.state_dim() && state.len() >= reacher::TIP.end,
            "state has {} components, model expects {}",
            state.len(),
            model.state_dim()
        );
        Ok(ReachProblem { model, state, goal, horizon: cfg.horizon, bounds: cfg.bounds() })
    }
}

impl<D: Dynamics + ?Sized> Problem for ReachProblem<'_, D> {
    fn solution_length(&self) -> usize {
        self.horizon * self.model.action_dim()
    }

    fn bounds(&self) -> Option<(f64, f64)> {
        Some(self.bounds)
    }

    fn sense(&self) -> ObjectiveSense {
        ObjectiveSense::Minimize
    }

    fn evaluate_batch(&self, batch: &[Vec<f64>]) -> Result<Vec<f64>> {
        let finals = rollout(self.model, &self.state, batch, self.bounds)?;
        Ok(finals
            .iter()
            .map(|s| {
                let tip = &s[reacher::TIP];
                ((tip[0] - self.goal[0]).powi(2) + (tip[1] - self.goal[1]).powi(2)).sqrt()
            })
            .collect())
    }
}

/// Plan from scratch for the current observation and return the action to apply now.
pub fn plan_action<D: Dynamics + ?Sized>(model: &D, obs: &[f32], cfg: &PlannerConfig, seed: u64) -> Result<Vec<f64>> {
    let problem = ReachProblem::new(model, obs, cfg)?;
    let mut cem = Cem::new(vec![0.0; problem.solution_length()], cfg.stdev_init, cfg.pop_size, cfg.elite_ratio, seed);
    cem.run(&problem, cfg.iterations)?;

    let status = cem.status();
    let action_dim = model.action_dim();
    ensure!(status.best.len() >= action_dim, "search produced no plan");
    tracing::trace!(predicted_distance = status.best_eval, "Planned");

    let (lo, hi) = cfg.bounds();
    Ok(status.best[..action_dim].iter().map(|a| a.clamp(lo, hi)).collect())
}

/// Outcome of one closed-loop episode.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeReport {
    pub seed: u64,
    pub steps: usize,
    pub total_reward: f64,
    pub final_distance: f64,
}

/// Drive a Reacher episode with the planner, re-planning at every step.
pub fn run_episode<D: Dynamics + ?Sized>(model: &D, cfg: &PlannerConfig, seed: u64) -> Result<EpisodeReport> {
    let mut env = Reacher::new(Some(seed));
    let mut obs = env.reset(Some(seed));
    let max_steps = env.config().max_steps;
    let mut total_reward = 0.0;
    let mut steps = 0;

    tracing::info!(seed, target = ?env.target(), distance = env.distance(), "MPC episode start");

    while steps < max_steps {
        let action = plan_action(model, &obs, cfg, seed.wrapping_mul(1_000_003).wrapping_add(steps as u64))?;
        let result = env.step(&Action::Continuous(action.iter().map(|&a| a as f32).collect()));
        total_reward += result.reward;
        steps += 1;
        tracing::debug!(step = steps, distance = env.distance(), reward = result.reward, "MPC step");

        if result.done() { break; }
        obs = result.observation;
    }

    let report = EpisodeReport { seed, steps, total_reward, final_distance: env.distance() };
    tracing::info!(
        seed, steps, total_reward = report.total_reward, final_distance = report.final_distance,
        "MPC episode finished"
    );
    Ok(report)
}

/// Run `episodes` consecutive episodes; episode `i` uses seed `seed + i`.
pub fn run_episodes<D: Dynamics + ?Sized>(model: &D, cfg: &PlannerConfig, episodes: usize, seed: u64) -> Result<Vec<EpisodeReport>> {
    (0..episodes)
        .map(|i| run_episode(model, cfg, seed.wrapping_add(i as u64)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectConfig, TrainConfig};
    use crate::experiments::dataset;
    use crate::experiments::forward_model::{self, ForwardModel};
    use crate::experiments::reacher::{ACTION_DIM, STATE_DIM};

    /// The tip moves by `gain × action` per step; nothing else changes.
    struct TipMover {
        gain: f64,
    }

    impl Dynamics for TipMover {
        fn state_dim(&self) -> usize { STATE_DIM }
        fn action_dim(&self) -> usize { ACTION_DIM }
        fn predict_delta(&self, _state: &[f64], action: &[f64]) -> Vec<f64> {
            let mut d = vec![0.0; STATE_DIM];
            d[6] = self.gain * action[0];
            d[7] = self.gain * action[1];
            d
        }
    }

    /// Observation whose tip sits at `tip` and whose target sits at `goal`.
    fn obs_with(tip: [f64; 2], goal: [f64; 2]) -> Vec<f32> {
        vec![
            1.0, 1.0, 0.0, 0.0,
            goal[0] as f32, goal[1] as f32,
            0.0, 0.0,
            (tip[0] - goal[0]) as f32, (tip[1] - goal[1]) as f32,
        ]
    }

    #[test]
    fn test_zero_error_at_goal() {
        let model = TipMover { gain: 0.0 };
        let obs = obs_with([0.125, -0.0625], [0.125, -0.0625]);
        let problem = ReachProblem::new(&model, &obs, &PlannerConfig::default()).unwrap();
        let evals = problem.evaluate_batch(&[vec![0.3; 8], vec![-1.0; 8]]).unwrap();
        assert_eq!(evals, vec![0.0, 0.0]);
    }

    #[test]
    fn test_errors_non_negative() {
        let model = TipMover { gain: 0.05 };
        let obs = obs_with([0.2, 0.0], [-0.1, 0.1]);
        let problem = ReachProblem::new(&model, &obs, &PlannerConfig::default()).unwrap();
        assert_eq!(problem.solution_length(), 8);

        let batch: Vec<Vec<f64>> = (0..20)
            .map(|i| (0..8).map(|j| ((i * 5 + j * 3) % 7) as f64 / 3.0 - 1.0).collect())
            .collect();
        let evals = problem.evaluate_batch(&batch).unwrap();
        assert_eq!(evals.len(), 20);
        assert!(evals.iter().all(|&e| e >= 0.0));
    }

    #[test]
    fn test_plan_moves_toward_goal() {
        let model = TipMover { gain: 0.05 };
        // Needs Δx = -0.11 (beyond one step, so saturates) and Δy = +0.025
        let obs = obs_with([0.21, 0.0], [0.1, 0.025]);
        let cfg = PlannerConfig { horizon: 1, ..Default::default() };
        let action = plan_action(&model, &obs, &cfg, 3).unwrap();
        assert_eq!(action.len(), ACTION_DIM);
        assert!(action[0] < -0.9, "x action {}", action[0]);
        assert!((action[1] - 0.5).abs() < 0.1, "y action {}", action[1]);
    }

    #[test]
    fn test_rejects_wrong_observation() {
        let model = TipMover { gain: 0.05 };
        assert!(ReachProblem::new(&model, &[0.0; 4], &PlannerConfig::default()).is_err());
    }

    #[test]
    fn test_episode_runs_to_truncation() {
        let model = TipMover { gain: 0.0 };
        let cfg = PlannerConfig { pop_size: 10, iterations: 2, ..Default::default() };
        let report = run_episode(&model, &cfg, 9).unwrap();
        assert_eq!(report.steps, 50);
        assert!(report.final_distance.is_finite());
        assert!(report.total_reward < 0.0);
    }

    #[test]
    fn test_episode_seeds_wrap() {
        let model = TipMover { gain: 0.0 };
        let cfg = PlannerConfig { pop_size: 4, iterations: 1, horizon: 1, ..Default::default() };
        let reports = run_episodes(&model, &cfg, 2, u64::MAX).unwrap();
        assert_eq!(reports.iter().map(|r| r.seed).collect::<Vec<_>>(), vec![u64::MAX, 0]);
    }

    #[test]
    fn test_plan_with_trained_model() {
        let data = dataset::collect("Reacher-v1", &CollectConfig { episodes: 4, workers: 2, seed: 5 }).unwrap();
        let train_cfg = TrainConfig { hidden: vec![8], epochs: 2, batch_size: 32, ..Default::default() };
        let (model, _) = forward_model::train(&data, &train_cfg).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reacher.json");
        model.save(&path).unwrap();
        let model = ForwardModel::load(&path).unwrap();
        assert_eq!(model.state_dim(), STATE_DIM);
        assert_eq!(model.action_dim(), ACTION_DIM);

        let mut env = Reacher::new(Some(2));
        let obs = env.reset(Some(2));
        let cfg = PlannerConfig { pop_size: 20, iterations: 3, ..Default::default() };

        let problem = ReachProblem::new(&model, &obs, &cfg).unwrap();
        let plans = vec![vec![0.5; cfg.horizon * ACTION_DIM], vec![-0.5; cfg.horizon * ACTION_DIM]];
        let finals = rollout(&model, &reacher::extract_state(&obs), &plans, cfg.bounds()).unwrap();
        assert_eq!(finals.len(), 2);
        assert!(finals.iter().all(|s| s.len() == STATE_DIM && s.iter().all(|v| v.is_finite())));
        assert!(problem.evaluate_batch(&plans).unwrap().iter().all(|e| e.is_finite() && *e >= 0.0));

        let action = plan_action(&model, &obs, &cfg, 1).unwrap();
        assert_eq!(action.len(), ACTION_DIM);
        assert!(action.iter().all(|a| (-1.0..=1.0).contains(a)));
    }
}
