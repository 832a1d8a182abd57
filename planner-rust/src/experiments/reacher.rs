//! Reacher — planar two-link arm that must bring its tip to a target.
//!
//! Pure ODE physics, no contacts. Joints are torque driven with viscous
//! damping; the target is resampled on every reset.
//!
//! Observation (10): [cos q1, cos q2, sin q1, sin q2, target_x, target_y,
//!                    q̇1, q̇2, tip_x − target_x, tip_y − target_y]
//! Action (2): joint torques in [-1, 1]
//! Reward: −‖tip − target‖ − Σa²
//!
//! The planner works on a compact state (see [`extract_state`]) where the
//! tip is stored in absolute coordinates.

use super::env::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ─── Constants ────────────────────────────────────────────────────────
pub const LINK1_LENGTH: f64 = 0.1;
pub const LINK2_LENGTH: f64 = 0.11;
const DT: f64 = 0.02; // 50 Hz
const TORQUE_GAIN: f64 = 20.0;
const DAMPING: f64 = 1.0;
const MAX_VEL: f64 = 10.0;
const TARGET_RADIUS: f64 = 0.2;
const MAX_STEPS: usize = 50;

pub const OBS_DIM: usize = 10;
pub const STATE_DIM: usize = 8;
pub const ACTION_DIM: usize = 2;

/// Environment configuration for the registry.
pub fn config() -> EnvConfig {
    EnvConfig {
        name: "Reacher-v1".to_string(),
        obs_dim: OBS_DIM,
        action_space: ActionSpace::Continuous(ACTION_DIM),
        max_steps: MAX_STEPS,
        solved_threshold: -3.75,
    }
}

/// Forward kinematics: absolute tip position for joint angles (q1, q2).
pub fn tip_position(q1: f64, q2: f64) -> [f64; 2] {
    [
        LINK1_LENGTH * q1.cos() + LINK2_LENGTH * (q1 + q2).cos(),
        LINK1_LENGTH * q1.sin() + LINK2_LENGTH * (q1 + q2).sin(),
    ]
}

/// Project an observation onto the planner state:
/// `[cos q1, cos q2, sin q1, sin q2, q̇1, q̇2, tip_x, tip_y]`.
pub fn extract_state(obs: &[f32]) -> Vec<f64> {
    debug_assert_eq!(obs.len(), OBS_DIM);
    let o: Vec<f64> = obs.iter().map(|&v| v as f64).collect();
    let state: [f64; STATE_DIM] = [o[0], o[1], o[2], o[3], o[6], o[7], o[8] + o[4], o[9] + o[5]];
    state.to_vec()
}

/// Target coordinates carried by an observation.
pub fn goal(obs: &[f32]) -> [f64; 2] {
    [obs[4] as f64, obs[5] as f64]
}

/// Indices of the absolute tip coordinates inside the planner state.
pub const TIP: std::ops::Range<usize> = 6..8;

pub struct Reacher {
    config: EnvConfig,
    angles: [f64; 2],
    velocities: [f64; 2],
    target: [f64; 2],
    step_count: usize,
    rng: StdRng,
}

impl Reacher {
    pub fn new(seed: Option<u64>) -> Self {
        let mut env = Reacher {
            config: config(),
            angles: [0.0; 2],
            velocities: [0.0; 2],
            target: [0.0; 2],
            step_count: 0,
            rng: StdRng::seed_from_u64(seed.unwrap_or(42)),
        };
        env.do_reset();
        env
    }

    pub fn target(&self) -> [f64; 2] {
        self.target
    }

    pub fn tip(&self) -> [f64; 2] {
        tip_position(self.angles[0], self.angles[1])
    }

    /// Distance between tip and target.
    pub fn distance(&self) -> f64 {
        let tip = self.tip();
        ((tip[0] - self.target[0]).powi(2) + (tip[1] - self.target[1]).powi(2)).sqrt()
    }

    fn do_reset(&mut self) -> Vec<f32> {
        for i in 0..2 {
            self.angles[i] = self.rng.gen_range(-0.1..0.1);
            self.velocities[i] = self.rng.gen_range(-0.005..0.005);
        }
        // Rejection-sample the target inside the reachable disk
        loop {
            let x = self.rng.gen_range(-TARGET_RADIUS..TARGET_RADIUS);
            let y = self.rng.gen_range(-TARGET_RADIUS..TARGET_RADIUS);
            if (x * x + y * y).sqrt() < TARGET_RADIUS {
                self.target = [x, y];
                break;
            }
        }
        self.step_count = 0;
        self.get_obs()
    }

    fn get_obs(&self) -> Vec<f32> {
        let tip = self.tip();
        let [q1, q2] = self.angles;
        [
            q1.cos(),
            q2.cos(),
            q1.sin(),
            q2.sin(),
            self.target[0],
            self.target[1],
            self.velocities[0],
            self.velocities[1],
            tip[0] - self.target[0],
            tip[1] - self.target[1],
        ]
        .iter()
        .map(|&v| v as f32)
        .collect()
    }

    fn do_step(&mut self, actions: &[f32]) -> StepResult {
        let torques: Vec<f64> = (0..ACTION_DIM)
            .map(|i| actions.get(i).copied().unwrap_or(0.0).clamp(-1.0, 1.0) as f64)
            .collect();

        // Semi-implicit Euler per joint
        for i in 0..2 {
            let alpha = TORQUE_GAIN * torques[i] - DAMPING * self.velocities[i];
            self.velocities[i] = (self.velocities[i] + alpha * DT).clamp(-MAX_VEL, MAX_VEL);
            self.angles[i] += self.velocities[i] * DT;
        }

        let ctrl_cost: f64 = torques.iter().map(|a| a * a).sum();
        let reward = -self.distance() - ctrl_cost;

        self.step_count += 1;
        StepResult {
            observation: self.get_obs(),
            reward,
            terminated: false,
            truncated: self.step_count >= MAX_STEPS,
        }
    }
}

impl Environment for Reacher {
    fn reset(&mut self, seed: Option<u64>) -> Vec<f32> {
        if let Some(s) = seed {
            self.rng = StdRng::seed_from_u64(s);
        }
        self.do_reset()
    }

    fn step(&mut self, action: &Action) -> StepResult {
        match action {
            Action::Continuous(v) => self.do_step(v),
            Action::Discrete(_) => self.do_step(&[0.0; ACTION_DIM]),
        }
    }

    fn config(&self) -> &EnvConfig { &self.config }
}
