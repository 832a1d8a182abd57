//! Autoregressive plan rollout through a dynamics model.

use anyhow::{ensure, Result};
use rayon::prelude::*;

/// A model predicting how a state changes under an action.
pub trait Dynamics: Sync {
    fn state_dim(&self) -> usize;
    fn action_dim(&self) -> usize;
    /// Predicted `next_state − state`.
    fn predict_delta(&self, state: &[f64], action: &[f64]) -> Vec<f64>;
}

/// Roll every plan in `plans` forward from `state` and return the final
/// state of each row.
///
/// A plan row holds `horizon × action_dim` values, one action after the
/// other. Each action is clamped into `bounds` before it reaches the model.
/// Rows are independent: row `i` of the output depends only on row `i` of
/// the input.
pub fn rollout<D: Dynamics + ?Sized>(
    model: &D,
    state: &[f64],
    plans: &[Vec<f64>],
    bounds: (f64, f64),
) -> Result<Vec<Vec<f64>>> {
    let action_dim = model.action_dim();
    ensure!(
        state.len() == model.state_dim(),
        "state has {} components, model expects {}",
        state.len(),
        model.state_dim()
    );
    ensure!(action_dim > 0, "model has no action inputs");

    let width = plans.first().map_or(0, Vec::len);
    ensure!(
        width % action_dim == 0,
        "plan length {width} is not a multiple of action dimension {action_dim}"
    );
    ensure!(plans.iter().all(|p| p.len() == width), "plans in a batch differ in length");

    let horizon = width / action_dim;
    let (lo, hi) = bounds;

    Ok(plans
        .par_iter()
        .map(|plan| {
            let mut s = state.to_vec();
            for action in plan.chunks_exact(action_dim).take(horizon) {
                let action: Vec<f64> = action.iter().map(|a| a.clamp(lo, hi)).collect();
                let delta = model.predict_delta(&s, &action);
                debug_assert_eq!(delta.len(), s.len());
                for (si, d) in s.iter_mut().zip(delta) {
                    *si += d;
                }
            }
            s
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// next = state + Σ action, on every component.
    struct ActionSum {
        state_dim: usize,
        action_dim: usize,
    }

    impl Dynamics for ActionSum {
        fn state_dim(&self) -> usize { self.state_dim }
        fn action_dim(&self) -> usize { self.action_dim }
        fn predict_delta(&self, state: &[f64], action: &[f64]) -> Vec<f64> {
            vec![action.iter().sum(); state.len()]
        }
    }

    /// Delta depends on the state, so row mixing would show up.
    struct Decay;

    impl Dynamics for Decay {
        fn state_dim(&self) -> usize { 2 }
        fn action_dim(&self) -> usize { 1 }
        fn predict_delta(&self, state: &[f64], action: &[f64]) -> Vec<f64> {
            vec![-0.5 * state[0] + action[0], state[0] * action[0]]
        }
    }

    const BOUNDS: (f64, f64) = (-1.0, 1.0);

    #[test]
    fn test_empty_plan_keeps_state() {
        let model = ActionSum { state_dim: 3, action_dim: 2 };
        let state = [0.5, -1.0, 2.0];
        let out = rollout(&model, &state, &[vec![], vec![]], BOUNDS).unwrap();
        assert_eq!(out, vec![state.to_vec(), state.to_vec()]);
    }

    #[test]
    fn test_scripted_plan_horizon_3() {
        let model = ActionSum { state_dim: 2, action_dim: 2 };
        // Actions (0.1, 0.2), (0.3, -0.4), (0.5, 0.5): sums 0.3, -0.1, 1.0
        let plan = vec![0.1, 0.2, 0.3, -0.4, 0.5, 0.5];
        let out = rollout(&model, &[1.0, -2.0], &[plan], BOUNDS).unwrap();
        assert!((out[0][0] - 2.2).abs() < 1e-12);
        assert!((out[0][1] - (-0.8)).abs() < 1e-12);
    }

    #[test]
    fn test_actions_are_clamped() {
        let model = ActionSum { state_dim: 1, action_dim: 1 };
        let out = rollout(&model, &[0.0], &[vec![5.0, -3.0, 0.25]], BOUNDS).unwrap();
        // 1.0 - 1.0 + 0.25
        assert!((out[0][0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_row_order_invariance() {
        let plans: Vec<Vec<f64>> = (0..8)
            .map(|i| (0..4).map(|t| ((i * 7 + t * 3) % 11) as f64 / 5.5 - 1.0).collect())
            .collect();
        let state = [0.4, -0.2];
        let out = rollout(&Decay, &state, &plans, BOUNDS).unwrap();

        let order = [5, 2, 7, 0, 3, 6, 1, 4];
        let shuffled: Vec<Vec<f64>> = order.iter().map(|&i| plans[i].clone()).collect();
        let out_shuffled = rollout(&Decay, &state, &shuffled, BOUNDS).unwrap();

        for (k, &i) in order.iter().enumerate() {
            assert_eq!(out_shuffled[k], out[i]);
        }
    }

    #[test]
    fn test_shape_errors() {
        let model = ActionSum { state_dim: 2, action_dim: 2 };
        assert!(rollout(&model, &[0.0, 0.0], &[vec![0.0; 3]], BOUNDS).is_err());
        assert!(rollout(&model, &[0.0, 0.0], &[vec![0.0; 2], vec![0.0; 4]], BOUNDS).is_err());
        assert!(rollout(&model, &[0.0], &[vec![0.0; 2]], BOUNDS).is_err());
    }
}
