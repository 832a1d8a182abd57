//! Learned forward dynamics: (state, action) → next-state delta.
//!
//! Manual forward + backward pass for a small FF network, trained with
//! Adam on normalized data. No autograd framework needed.
//!
//! The persisted [`ModelRecord`] carries the weights together with the
//! exact normalization statistics computed from the training data; the
//! model is only ever used through those statistics.

use super::dataset::{Dataset, NormStats};
use super::policy::randn;
use super::rollout::Dynamics;
use crate::config::TrainConfig;
use anyhow::{ensure, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ─── Network ────────────────────────────────────────────────────────

/// Tanh hidden layers, linear output.
#[derive(Debug, Clone)]
pub struct Mlp {
    layer_dims: Vec<(usize, usize)>,
    weights: Vec<Vec<f64>>, // [layer][fan_in * fan_out]  (row-major)
    biases: Vec<Vec<f64>>,  // [layer][fan_out]
}

/// Intermediate activations kept for the backward pass.
struct ForwardTrace {
    output: Vec<f64>,
    pre_activations: Vec<Vec<f64>>,
    post_activations: Vec<Vec<f64>>,
}

fn layer_dims(input: usize, output: usize, hidden: &[usize]) -> Vec<(usize, usize)> {
    let mut dims = Vec::new();
    let mut prev = input;
    for &h in hidden {
        dims.push((prev, h));
        prev = h;
    }
    dims.push((prev, output));
    dims
}

impl Mlp {
    pub fn new(input: usize, output: usize, hidden: &[usize], seed: u64) -> Self {
        let dims = layer_dims(input, output, hidden);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut weights = Vec::new();
        let mut biases = Vec::new();

        for &(fan_in, fan_out) in &dims {
            let std = (2.0 / (fan_in + fan_out) as f64).sqrt();
            weights.push((0..fan_in * fan_out).map(|_| randn(&mut rng) * std).collect());
            biases.push(vec![0.0; fan_out]);
        }

        Mlp { layer_dims: dims, weights, biases }
    }

    pub fn input_dim(&self) -> usize {
        self.layer_dims[0].0
    }

    pub fn output_dim(&self) -> usize {
        self.layer_dims[self.layer_dims.len() - 1].1
    }

    pub fn hidden(&self) -> Vec<usize> {
        self.layer_dims[1..].iter().map(|&(fan_in, _)| fan_in).collect()
    }

    pub fn n_params(&self) -> usize {
        self.layer_dims.iter().map(|(i, o)| i * o + o).sum()
    }

    fn affine(&self, layer_idx: usize, x: &[f64]) -> Vec<f64> {
        let (_, fan_out) = self.layer_dims[layer_idx];
        let w = &self.weights[layer_idx];
        // z = x @ W + b
        let mut z = self.biases[layer_idx].clone();
        for (i, &xi) in x.iter().enumerate() {
            let row = &w[i * fan_out..(i + 1) * fan_out];
            for (zj, &wij) in z.iter_mut().zip(row) {
                *zj += xi * wij;
            }
        }
        z
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        debug_assert_eq!(input.len(), self.input_dim());
        let last = self.layer_dims.len() - 1;
        let mut x = input.to_vec();
        for layer_idx in 0..self.layer_dims.len() {
            let mut z = self.affine(layer_idx, &x);
            if layer_idx != last {
                z.iter_mut().for_each(|v| *v = v.tanh());
            }
            x = z;
        }
        x
    }

    fn forward_trace(&self, input: &[f64]) -> ForwardTrace {
        let last = self.layer_dims.len() - 1;
        let mut x = input.to_vec();
        let mut pre_activations = Vec::with_capacity(self.layer_dims.len());
        let mut post_activations = vec![x.clone()]; // input layer

        for layer_idx in 0..self.layer_dims.len() {
            let z = self.affine(layer_idx, &x);
            let a: Vec<f64> = if layer_idx != last {
                z.iter().map(|v| v.tanh()).collect()
            } else {
                z.clone()
            };
            pre_activations.push(z);
            post_activations.push(a.clone());
            x = a;
        }

        ForwardTrace { output: x, pre_activations, post_activations }
    }

    /// Gradients of the loss w.r.t. all weights and biases, flattened in
    /// layer order (weights then biases). `d_output` is dL/d(output).
    fn backward(&self, trace: &ForwardTrace, d_output: &[f64]) -> Vec<f64> {
        let n_layers = self.layer_dims.len();
        let mut per_layer: Vec<(Vec<f64>, Vec<f64>)> = vec![(Vec::new(), Vec::new()); n_layers];
        let mut delta = d_output.to_vec();

        for layer_idx in (0..n_layers).rev() {
            let (fan_in, fan_out) = self.layer_dims[layer_idx];

            if layer_idx != n_layers - 1 {
                let z = &trace.pre_activations[layer_idx];
                for j in 0..fan_out {
                    let t = z[j].tanh();
                    delta[j] *= 1.0 - t * t; // dtanh/dz = 1 - tanh²
                }
            }

            // dL/dW = a_prev^T @ delta
            let a_prev = &trace.post_activations[layer_idx];
            let mut dw = vec![0.0; fan_in * fan_out];
            for i in 0..fan_in {
                for j in 0..fan_out {
                    dw[i * fan_out + j] = a_prev[i] * delta[j];
                }
            }

            let next_delta = if layer_idx > 0 {
                // delta_prev = delta @ W^T
                let w = &self.weights[layer_idx];
                (0..fan_in)
                    .map(|i| (0..fan_out).map(|j| w[i * fan_out + j] * delta[j]).sum())
                    .collect()
            } else {
                Vec::new()
            };

            per_layer[layer_idx] = (dw, std::mem::replace(&mut delta, next_delta));
        }

        let mut flat = Vec::with_capacity(self.n_params());
        for (dw, db) in per_layer {
            flat.extend(dw);
            flat.extend(db);
        }
        flat
    }

    /// Subtract a flat update vector laid out like [`Mlp::backward`]'s output.
    fn apply_updates(&mut self, updates: &[f64]) {
        let mut offset = 0;
        for layer_idx in 0..self.layer_dims.len() {
            for w in &mut self.weights[layer_idx] {
                *w -= updates[offset];
                offset += 1;
            }
            for b in &mut self.biases[layer_idx] {
                *b -= updates[offset];
                offset += 1;
            }
        }
    }
}

// ─── Adam Optimizer ─────────────────────────────────────────────────

struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: usize,
}

impl Adam {
    fn new(n_params: usize, lr: f64) -> Self {
        Adam {
            lr, beta1: 0.9, beta2: 0.999, eps: 1e-8,
            m: vec![0.0; n_params],
            v: vec![0.0; n_params],
            t: 0,
        }
    }

    fn step(&mut self, grads: &[f64]) -> Vec<f64> {
        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);

        grads.iter().enumerate().map(|(i, &g)| {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bias_correction1;
            let v_hat = self.v[i] / bias_correction2;
            self.lr * m_hat / (v_hat.sqrt() + self.eps)
        }).collect()
    }
}

// ─── Forward model ──────────────────────────────────────────────────

/// Trained network plus the statistics it was trained under.
#[derive(Debug, Clone)]
pub struct ForwardModel {
    net: Mlp,
    input_stats: NormStats,
    target_stats: NormStats,
}

impl ForwardModel {
    pub fn new(net: Mlp, input_stats: NormStats, target_stats: NormStats) -> Result<Self> {
        ensure!(
            input_stats.dim() == net.input_dim() && target_stats.dim() == net.output_dim(),
            "normalization statistics ({} in, {} out) do not match network ({} in, {} out)",
            input_stats.dim(), target_stats.dim(), net.input_dim(), net.output_dim()
        );
        ensure!(
            net.input_dim() > net.output_dim(),
            "network input must hold the state plus at least one action component"
        );
        Ok(ForwardModel { net, input_stats, target_stats })
    }

    pub fn net(&self) -> &Mlp {
        &self.net
    }

    pub fn to_record(&self) -> ModelRecord {
        ModelRecord {
            hidden: self.net.hidden(),
            weights: self.net.weights.clone(),
            biases: self.net.biases.clone(),
            input_mean: self.input_stats.mean.clone(),
            input_std: self.input_stats.std.clone(),
            target_mean: self.target_stats.mean.clone(),
            target_std: self.target_stats.std.clone(),
        }
    }

    pub fn from_record(record: ModelRecord) -> Result<Self> {
        ensure!(
            record.input_mean.len() == record.input_std.len()
                && record.target_mean.len() == record.target_std.len(),
            "mean and std arrays differ in length"
        );
        ensure!(
            record.input_std.iter().chain(&record.target_std).all(|&s| s > 0.0),
            "standard deviations must be positive"
        );

        let dims = layer_dims(record.input_mean.len(), record.target_mean.len(), &record.hidden);
        ensure!(
            record.weights.len() == dims.len() && record.biases.len() == dims.len(),
            "expected {} layers, found {} weight and {} bias arrays",
            dims.len(), record.weights.len(), record.biases.len()
        );
        for (l, &(fan_in, fan_out)) in dims.iter().enumerate() {
            ensure!(
                record.weights[l].len() == fan_in * fan_out && record.biases[l].len() == fan_out,
                "layer {l} does not have shape {fan_in}×{fan_out}"
            );
        }

        let net = Mlp { layer_dims: dims, weights: record.weights, biases: record.biases };
        ForwardModel::new(
            net,
            NormStats { mean: record.input_mean, std: record.input_std },
            NormStats { mean: record.target_mean, std: record.target_std },
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_record())?;
        std::fs::write(path, json).with_context(|| format!("Failed to write model to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model from {}", path.display()))?;
        let record: ModelRecord = serde_json::from_str(&data)
            .with_context(|| format!("Malformed model file {}", path.display()))?;
        ForwardModel::from_record(record)
    }
}

impl Dynamics for ForwardModel {
    fn state_dim(&self) -> usize {
        self.net.output_dim()
    }

    fn action_dim(&self) -> usize {
        self.net.input_dim() - self.net.output_dim()
    }

    fn predict_delta(&self, state: &[f64], action: &[f64]) -> Vec<f64> {
        let mut input = Vec::with_capacity(state.len() + action.len());
        input.extend_from_slice(state);
        input.extend_from_slice(action);
        let out = self.net.forward(&self.input_stats.normalize(&input));
        self.target_stats.denormalize(&out)
    }
}

/// Serialized form of a [`ForwardModel`]. No version field: readers and
/// writers must agree on the layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub hidden: Vec<usize>,
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<Vec<f64>>,
    pub input_mean: Vec<f64>,
    pub input_std: Vec<f64>,
    pub target_mean: Vec<f64>,
    pub target_std: Vec<f64>,
}

// ─── Training ───────────────────────────────────────────────────────

/// Mean normalized MSE per epoch.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub rows: usize,
    pub epoch_losses: Vec<f64>,
}

/// Fit a forward model to a transition dataset.
pub fn train(data: &Dataset, cfg: &TrainConfig) -> Result<(ForwardModel, TrainReport)> {
    ensure!(!data.is_empty(), "training dataset is empty");
    ensure!(data.inputs.len() == data.targets.len(), "inputs and targets differ in length");
    ensure!(cfg.batch_size > 0, "batch_size must be positive");
    ensure!(cfg.std_floor > 0.0, "std_floor must be positive, got {}", cfg.std_floor);

    let input_stats = NormStats::fit(&data.inputs, cfg.std_floor)?;
    let target_stats = NormStats::fit(&data.targets, cfg.std_floor)?;
    let xs: Vec<Vec<f64>> = data.inputs.iter().map(|x| input_stats.normalize(x)).collect();
    let ys: Vec<Vec<f64>> = data.targets.iter().map(|y| target_stats.normalize(y)).collect();

    let mut net = Mlp::new(input_stats.dim(), target_stats.dim(), &cfg.hidden, cfg.seed);
    let mut adam = Adam::new(net.n_params(), cfg.lr);
    let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(1));
    let out_dim = target_stats.dim() as f64;

    tracing::info!(
        rows = xs.len(), params = net.n_params(), epochs = cfg.epochs, batch = cfg.batch_size,
        "Training forward model"
    );

    let log_every = (cfg.epochs / 10).max(1);
    let mut indices: Vec<usize> = (0..xs.len()).collect();
    let mut epoch_losses = Vec::with_capacity(cfg.epochs);

    for epoch in 0..cfg.epochs {
        indices.shuffle(&mut rng);
        let mut epoch_loss = 0.0;

        for batch in indices.chunks(cfg.batch_size) {
            let scale = 1.0 / (batch.len() as f64 * out_dim);
            let mut grads = vec![0.0; net.n_params()];

            for &idx in batch {
                let trace = net.forward_trace(&xs[idx]);
                // L = mean((pred - y)²) → dL/dpred = 2 (pred - y) / (batch · out_dim)
                let d_output: Vec<f64> = trace.output.iter().zip(&ys[idx])
                    .map(|(p, y)| {
                        epoch_loss += (p - y).powi(2) / out_dim;
                        2.0 * (p - y) * scale
                    })
                    .collect();
                for (g, d) in grads.iter_mut().zip(net.backward(&trace, &d_output)) {
                    *g += d;
                }
            }

            let updates = adam.step(&grads);
            net.apply_updates(&updates);
        }

        let loss = epoch_loss / xs.len() as f64;
        epoch_losses.push(loss);
        if (epoch + 1) % log_every == 0 || epoch + 1 == cfg.epochs {
            tracing::info!(epoch = epoch + 1, loss, "Forward model epoch");
        }
    }

    let model = ForwardModel::new(net, input_stats, target_stats)?;
    Ok((model, TrainReport { rows: xs.len(), epoch_losses }))
}
