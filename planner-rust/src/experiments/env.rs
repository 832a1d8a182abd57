//! Environment abstraction for evoplan.
//!
//! Mirrors gymnasium's API but in pure Rust.
//! Each environment defines its observation/action spaces
//! and step/reset dynamics.

use anyhow::{bail, Result};
use rand::Rng;
use std::fmt;

/// Action space type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionSpace {
    /// Discrete actions: 0..n
    Discrete(usize),
    /// Continuous actions: n-dimensional vector in [-1, 1]
    Continuous(usize),
}

impl ActionSpace {
    /// Lower and upper bound of every continuous action component.
    pub const BOUNDS: (f64, f64) = (-1.0, 1.0);

    pub fn size(&self) -> usize {
        match self {
            ActionSpace::Discrete(n) => *n,
            ActionSpace::Continuous(n) => *n,
        }
    }

    /// Uniformly random valid action.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Action {
        match *self {
            ActionSpace::Discrete(n) => Action::Discrete(rng.gen_range(0..n)),
            ActionSpace::Continuous(n) => {
                let (lo, hi) = Self::BOUNDS;
                Action::Continuous((0..n).map(|_| rng.gen_range(lo..=hi) as f32).collect())
            }
        }
    }
}

/// Action passed to environment.
#[derive(Debug, Clone)]
pub enum Action {
    Discrete(usize),
    Continuous(Vec<f32>),
}

impl Action {
    /// Numeric view of the action, as fed to a dynamics model.
    /// Discrete actions become a one-element vector holding the index.
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Action::Discrete(a) => vec![*a as f64],
            Action::Continuous(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }
}

/// Result of a step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub observation: Vec<f32>,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
}

impl StepResult {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Environment configuration — enough to construct any environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub name: String,
    pub obs_dim: usize,
    pub action_space: ActionSpace,
    pub max_steps: usize,
    pub solved_threshold: f64,
}

/// The core Environment trait.
/// Not required to be Send: for parallelism, create one environment per task.
pub trait Environment {
    /// Reset the environment to initial state, returns observation.
    fn reset(&mut self, seed: Option<u64>) -> Vec<f32>;

    /// Take an action, returns step result.
    fn step(&mut self, action: &Action) -> StepResult;

    /// Environment configuration.
    fn config(&self) -> &EnvConfig;
}

/// Registry of known environments.
pub fn get_env_config(name: &str) -> Option<EnvConfig> {
    match name {
        "CartPole-v1" => Some(EnvConfig {
            name: name.to_string(),
            obs_dim: 4,
            action_space: ActionSpace::Discrete(2),
            max_steps: 500,
            solved_threshold: 475.0,
        }),
        "Reacher-v1" => Some(super::reacher::config()),
        _ => None,
    }
}

/// Hidden layer configs for policies on each environment.
/// An empty list means a linear policy.
pub fn default_hidden(name: &str) -> Vec<usize> {
    match name {
        "CartPole-v1" => vec![],
        "Reacher-v1" => vec![16],
        _ => vec![32, 16],
    }
}

/// Factory: create an environment by name.
pub fn make(name: &str, seed: Option<u64>) -> Result<Box<dyn Environment>> {
    match name {
        "CartPole-v1" => Ok(Box::new(cartpole::CartPole::new(seed))),
        "Reacher-v1" => Ok(Box::new(super::reacher::Reacher::new(seed))),
        _ => bail!("Unknown environment: {name}"),
    }
}

// ─── CartPole (pure Rust, no dependencies) ────────────────────────────

pub mod cartpole {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const GRAVITY: f64 = 9.8;
    const CART_MASS: f64 = 1.0;
    const POLE_MASS: f64 = 0.1;
    const TOTAL_MASS: f64 = CART_MASS + POLE_MASS;
    const POLE_HALF_LENGTH: f64 = 0.5;
    const FORCE_MAG: f64 = 10.0;
    const TAU: f64 = 0.02; // timestep
    const X_THRESHOLD: f64 = 2.4;
    const THETA_THRESHOLD: f64 = 12.0 * std::f64::consts::PI / 180.0;

    pub struct CartPole {
        config: EnvConfig,
        state: [f64; 4], // x, x_dot, theta, theta_dot
        step_count: usize,
        rng: StdRng,
    }

    impl CartPole {
        pub fn new(seed: Option<u64>) -> Self {
            let config = EnvConfig {
                name: "CartPole-v1".to_string(),
                obs_dim: 4,
                action_space: ActionSpace::Discrete(2),
                max_steps: 500,
                solved_threshold: 475.0,
            };
            let mut env = CartPole {
                config,
                state: [0.0; 4],
                step_count: 0,
                rng: StdRng::seed_from_u64(seed.unwrap_or(42)),
            };
            env.reset(seed);
            env
        }

        fn observation(&self) -> Vec<f32> {
            self.state.iter().map(|&v| v as f32).collect()
        }
    }

    impl Environment for CartPole {
        fn reset(&mut self, seed: Option<u64>) -> Vec<f32> {
            if let Some(s) = seed {
                self.rng = StdRng::seed_from_u64(s);
            }
            for v in &mut self.state {
                *v = self.rng.gen_range(-0.05..0.05);
            }
            self.step_count = 0;
            self.observation()
        }

        fn step(&mut self, action: &Action) -> StepResult {
            let force = match action {
                Action::Discrete(a) => if *a == 1 { FORCE_MAG } else { -FORCE_MAG },
                Action::Continuous(v) => v[0].clamp(-1.0, 1.0) as f64 * FORCE_MAG,
            };

            let [x, x_dot, theta, theta_dot] = self.state;
            let cos_theta = theta.cos();
            let sin_theta = theta.sin();

            let temp = (force + POLE_MASS * POLE_HALF_LENGTH * theta_dot * theta_dot * sin_theta) / TOTAL_MASS;
            let theta_acc = (GRAVITY * sin_theta - cos_theta * temp)
                / (POLE_HALF_LENGTH * (4.0 / 3.0 - POLE_MASS * cos_theta * cos_theta / TOTAL_MASS));
            let x_acc = temp - POLE_MASS * POLE_HALF_LENGTH * theta_acc * cos_theta / TOTAL_MASS;

            // Euler integration
            self.state = [
                x + TAU * x_dot,
                x_dot + TAU * x_acc,
                theta + TAU * theta_dot,
                theta_dot + TAU * theta_acc,
            ];
            self.step_count += 1;

            let terminated = self.state[0].abs() > X_THRESHOLD || self.state[2].abs() > THETA_THRESHOLD;
            let truncated = self.step_count >= self.config.max_steps;

            StepResult {
                observation: self.observation(),
                reward: if terminated { 0.0 } else { 1.0 },
                terminated,
                truncated,
            }
        }

        fn config(&self) -> &EnvConfig {
            &self.config
        }
    }
}

impl fmt::Display for EnvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (obs={}, act={:?}, solved≥{})",
            self.name, self.obs_dim, self.action_space, self.solved_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_make_unknown_env() {
        assert!(make("Nope-v0", None).is_err());
    }

    #[test]
    fn test_cartpole_reset_deterministic() {
        let mut a = make("CartPole-v1", Some(7)).unwrap();
        let mut b = make("CartPole-v1", Some(7)).unwrap();
        assert_eq!(a.reset(Some(3)), b.reset(Some(3)));
        assert_eq!(a.reset(Some(3)).len(), 4);
    }

    #[test]
    fn test_cartpole_terminates() {
        let mut env = cartpole::CartPole::new(Some(0));
        let mut steps = 0;
        loop {
            let r = env.step(&Action::Discrete(1));
            steps += 1;
            if r.done() { break; }
        }
        // Constant push topples the pole long before truncation.
        assert!(steps < 500);
    }

    #[test]
    fn test_sample_in_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            match ActionSpace::Continuous(3).sample(&mut rng) {
                Action::Continuous(v) => {
                    assert_eq!(v.len(), 3);
                    assert!(v.iter().all(|a| (-1.0..=1.0).contains(a)));
                }
                _ => panic!("Expected continuous action"),
            }
            match ActionSpace::Discrete(2).sample(&mut rng) {
                Action::Discrete(a) => assert!(a < 2),
                _ => panic!("Expected discrete action"),
            }
        }
    }
}
