//! Feed-forward policy network — pure Rust, no backprop needed.
//!
//! Weights are stored as flat f32 vectors, manipulated by the search
//! algorithms. With no hidden layers this is a plain linear policy.

use super::env::{Action, ActionSpace};
use rand::Rng;

/// Network architecture description.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub obs_dim: usize,
    pub act_dim: usize,
    pub hidden: Vec<usize>,
    pub action_space: ActionSpace,
}

/// Feed-forward policy network.
#[derive(Debug, Clone)]
pub struct Policy {
    pub config: PolicyConfig,
    /// Layer shapes: [(in, out), ...] for weights, [out, ...] for biases
    pub layer_dims: Vec<(usize, usize)>,
    /// Total number of parameters (weights + biases)
    pub n_params: usize,
}

impl Policy {
    pub fn new(obs_dim: usize, act_dim: usize, hidden: &[usize], action_space: ActionSpace) -> Self {
        let mut dims = Vec::new();
        let mut prev = obs_dim;
        for &h in hidden {
            dims.push((prev, h));
            prev = h;
        }
        dims.push((prev, act_dim));

        let n_params: usize = dims.iter().map(|(i, o)| i * o + o).sum();

        Policy {
            config: PolicyConfig {
                obs_dim,
                act_dim,
                hidden: hidden.to_vec(),
                action_space,
            },
            layer_dims: dims,
            n_params,
        }
    }

    /// Forward pass: observation → action.
    /// `params` is a flat f32 slice of length `n_params`.
    pub fn forward(&self, obs: &[f32], params: &[f32]) -> Action {
        debug_assert_eq!(params.len(), self.n_params);
        debug_assert_eq!(obs.len(), self.config.obs_dim);

        let mut x: Vec<f32> = obs.to_vec();
        let mut offset = 0;

        for (layer_idx, &(fan_in, fan_out)) in self.layer_dims.iter().enumerate() {
            let w_size = fan_in * fan_out;
            let weights = &params[offset..offset + w_size];
            offset += w_size;
            let biases = &params[offset..offset + fan_out];
            offset += fan_out;

            // x (1×fan_in) @ W (fan_in×fan_out) + b
            let mut out = biases.to_vec();
            for (i, &xi) in x.iter().enumerate() {
                let row = &weights[i * fan_out..(i + 1) * fan_out];
                for (o, &w) in out.iter_mut().zip(row) {
                    *o += xi * w;
                }
            }

            // Activation: tanh for hidden layers, none for output
            if layer_idx + 1 < self.layer_dims.len() {
                for v in &mut out {
                    *v = v.tanh();
                }
            }

            x = out;
        }

        match self.config.action_space {
            ActionSpace::Discrete(_) => {
                let best = x.iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                Action::Discrete(best)
            }
            // Tanh squash to [-1, 1]
            ActionSpace::Continuous(_) => Action::Continuous(x.iter().map(|v| v.tanh()).collect()),
        }
    }

    /// Format network architecture as string.
    pub fn arch_string(&self) -> String {
        let mut parts = vec![self.config.obs_dim.to_string()];
        for &h in &self.config.hidden {
            parts.push(h.to_string());
        }
        parts.push(self.config.act_dim.to_string());
        parts.join("→")
    }
}

/// Standard normal sample via Box-Muller.
pub fn randn<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-10); // avoid log(0)
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_param_count() {
        // 8→64→32→4 = (8*64+64) + (64*32+32) + (32*4+4) = 576+2080+132 = 2788
        let p = Policy::new(8, 4, &[64, 32], ActionSpace::Discrete(4));
        assert_eq!(p.n_params, 2788);
    }

    #[test]
    fn test_linear_policy() {
        // 4→2 linear: 8 weights + 2 biases
        let p = Policy::new(4, 2, &[], ActionSpace::Discrete(2));
        assert_eq!(p.n_params, 10);
        assert_eq!(p.arch_string(), "4→2");

        // Weight column 1 picks up obs[0]
        let mut params = vec![0.0f32; p.n_params];
        params[1] = 1.0;
        match p.forward(&[1.0, 0.0, 0.0, 0.0], &params) {
            Action::Discrete(a) => assert_eq!(a, 1),
            _ => panic!("Expected discrete action"),
        }
    }

    #[test]
    fn test_forward_continuous() {
        let p = Policy::new(4, 2, &[8], ActionSpace::Continuous(2));
        let params = vec![0.1f32; p.n_params];
        let obs = vec![1.0, 0.5, -0.5, 0.0];
        match p.forward(&obs, &params) {
            Action::Continuous(v) => {
                assert_eq!(v.len(), 2);
                for a in &v {
                    assert!(*a >= -1.0 && *a <= 1.0);
                }
            }
            _ => panic!("Expected continuous action"),
        }
    }
}
