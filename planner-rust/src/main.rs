mod config;
mod experiments;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Algorithm, CollectConfig, PlannerConfig, SearchConfig, TrainConfig};
use experiments::{dataset, forward_model, planning, policy_search};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evoplan", about = "Evolutionary policy search and model-predictive control")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect random rollouts and fit a forward model
    TrainModel {
        #[arg(long, default_value = "Reacher-v1")]
        env: String,

        /// Random-action episodes to collect
        #[arg(long, default_value = "200")]
        episodes: usize,

        /// Collection threads
        #[arg(long, default_value = "4")]
        workers: usize,

        #[arg(long, default_value = "30")]
        epochs: usize,

        /// Where to write the model JSON
        #[arg(long, default_value = "model.json")]
        out: PathBuf,

        /// JSON object with optional "collect" and "train" sections
        #[arg(long)]
        params: Option<String>,
    },

    /// Control the Reacher with CEM planning through a trained model
    Mpc {
        #[arg(long, env = "EVOPLAN_MODEL")]
        model: PathBuf,

        #[arg(long, default_value = "5")]
        episodes: usize,

        /// Episode `i` uses seed `seed + i`
        #[arg(long, default_value = "0")]
        seed: u64,

        /// JSON object overriding planner settings
        #[arg(long)]
        params: Option<String>,

        /// Write episode reports as JSON
        #[arg(long)]
        results: Option<PathBuf>,
    },

    /// Evolve a policy network directly against the environment
    Search {
        #[arg(long, default_value = "CartPole-v1")]
        env: String,

        #[arg(long, value_enum, default_value = "pgpe")]
        algorithm: Algorithm,

        #[arg(long, default_value = "50")]
        generations: usize,

        /// JSON object overriding search settings
        #[arg(long)]
        params: Option<String>,

        /// Write the run summary as JSON
        #[arg(long)]
        results: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Command::TrainModel { env, episodes, workers, epochs, out, params } => {
            let params = parse_params(params.as_deref())?;
            anyhow::ensure!(params.is_null() || params.is_object(), "--params must be a JSON object");
            let collect_cfg = config::overlay(
                CollectConfig { episodes, workers, ..Default::default() },
                params.get("collect").unwrap_or(&Value::Null),
            )?;
            let train_cfg = config::overlay(
                TrainConfig { epochs, ..Default::default() },
                params.get("train").unwrap_or(&Value::Null),
            )?;
            train_model(&env, &collect_cfg, &train_cfg, &out)
        }
        Command::Mpc { model, episodes, seed, params, results } => {
            let cfg = config::overlay(PlannerConfig::default(), &parse_params(params.as_deref())?)?;
            run_mpc(&model, &cfg, episodes, seed, results.as_deref())
        }
        Command::Search { env, algorithm, generations, params, results } => {
            let cfg = config::overlay(
                SearchConfig { algorithm, generations, ..Default::default() },
                &parse_params(params.as_deref())?,
            )?;
            let result = policy_search::run_policy_search(&env, &cfg, |_| {})?;
            tracing::info!(
                method = %result.method, env = %result.environment, best_ever = result.best_ever,
                final_mean = result.final_mean, solved = result.solved, "Search done"
            );
            match results {
                Some(path) => write_json(&path, &result),
                None => Ok(()),
            }
        }
    }
}

fn parse_params(raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(s) => serde_json::from_str(s).context("--params is not valid JSON"),
        None => Ok(Value::Null),
    }
}

fn train_model(env: &str, collect_cfg: &CollectConfig, train_cfg: &TrainConfig, out: &Path) -> Result<()> {
    let data = dataset::collect(env, collect_cfg)?;
    let (model, report) = forward_model::train(&data, train_cfg)?;
    model.save(out)?;
    tracing::info!(
        path = %out.display(), rows = report.rows,
        final_loss = report.epoch_losses.last().copied().unwrap_or(f64::NAN),
        "Forward model saved"
    );
    Ok(())
}

fn run_mpc(model_path: &Path, cfg: &PlannerConfig, episodes: usize, seed: u64, results: Option<&Path>) -> Result<()> {
    let model = forward_model::ForwardModel::load(model_path)?;
    tracing::info!(
        path = %model_path.display(), hidden = ?model.net().hidden(), params = model.net().n_params(),
        horizon = cfg.horizon, pop = cfg.pop_size, "Loaded forward model"
    );

    let reports = planning::run_episodes(&model, cfg, episodes, seed)?;

    if !reports.is_empty() {
        let n = reports.len() as f64;
        let mean_reward = reports.iter().map(|r| r.total_reward).sum::<f64>() / n;
        let mean_distance = reports.iter().map(|r| r.final_distance).sum::<f64>() / n;
        tracing::info!(episodes = reports.len(), mean_reward, mean_distance, "MPC done");
    }

    match results {
        Some(path) => write_json(path, &reports),
        None => Ok(()),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Results written");
    Ok(())
}
