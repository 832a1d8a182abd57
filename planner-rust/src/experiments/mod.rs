//! evoplan experiments: model-based planning and policy search in pure Rust.
//!
//! Architecture:
//! - `env`, `reacher`: Environment trait + implementations
//! - `policy`: policy network forward pass (flat params, no backprop)
//! - `search`: CEM and PGPE over a batch-evaluated `Problem`
//! - `policy_search`: evolve policy parameters against episodes
//! - `dataset`, `forward_model`: random-rollout data and the learned dynamics
//! - `rollout`, `planning`: plan evaluation through the model and MPC

pub mod env;
pub mod reacher;
pub mod policy;
pub mod search;
pub mod policy_search;
pub mod dataset;
pub mod forward_model;
pub mod rollout;
pub mod planning;
