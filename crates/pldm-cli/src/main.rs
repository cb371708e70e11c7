//! PLDM CLI
//!
//! Command-line interface for generating offline data, training world models
//! and evaluating goal-reaching policies.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use pldm::config::PldmConfig;
use pldm::data::{CollectorConfig, DataCollector, ExplorationPolicy};
use pldm::env::{GoalEnv, PldmEnv};
use pldm::eval::{EvalConfig, EvalReport, Evaluator};
use pldm::planning::{GoalPolicy, RandomPolicy};
use pldm::utils::abbreviate;
use pldm_envs::{available_envs, make_env, EnvSpec, ObsMode};

#[derive(Parser)]
#[command(name = "pldm")]
#[command(version, about = "PLDM - Planning with Latent Dynamics Models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CollectPolicy {
    Uniform,
    Momentum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Method {
    Pldm,
    Gcbc,
    Random,
}

#[derive(Subcommand)]
enum Commands {
    /// List available environments
    List,

    /// Run an environment with random actions and print ASCII frames
    Demo {
        /// Environment name
        #[arg(default_value = "wall")]
        env: String,

        /// Number of steps
        #[arg(long, default_value = "20")]
        steps: usize,

        /// Print a frame every N steps
        #[arg(long, default_value = "5")]
        every: usize,

        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Collect an offline dataset with an exploration policy
    Generate {
        /// Environment name
        env: String,

        /// Output JSON file
        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value = "1000")]
        episodes: usize,

        #[arg(long, default_value = "100")]
        episode_len: usize,

        #[arg(long, value_enum, default_value = "momentum")]
        policy: CollectPolicy,

        /// Probability of repeating the previous action (momentum policy)
        #[arg(long, default_value = "0.9")]
        persistence: f32,

        /// Record top-down images instead of positions
        #[arg(long)]
        pixels: bool,

        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Train a world model or the GCBC baseline (requires --features torch)
    Train {
        /// Dataset written by `generate`
        dataset: PathBuf,

        /// Run directory for checkpoints
        #[arg(long)]
        out: PathBuf,

        /// JSON configuration (defaults otherwise)
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "pldm")]
        method: Method,

        /// Override the number of epochs
        #[arg(long)]
        epochs: Option<usize>,
    },

    /// Evaluate a policy on seeded goal-reaching episodes
    Eval {
        /// Environment name
        env: String,

        /// Run directory written by `train`
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "random")]
        method: Method,

        #[arg(long, default_value = "20")]
        episodes: usize,

        /// Use top-down image observations
        #[arg(long)]
        pixels: bool,

        /// Seed of the first episode
        #[arg(long, default_value = "1000")]
        seed: u64,

        /// Write the full report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the default configuration as JSON
    Config,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => list_envs(),
        Commands::Demo {
            env,
            steps,
            every,
            seed,
        } => demo(&env, steps, every, seed)?,
        Commands::Generate {
            env,
            out,
            episodes,
            episode_len,
            policy,
            persistence,
            pixels,
            seed,
        } => {
            let policy = match policy {
                CollectPolicy::Uniform => ExplorationPolicy::Uniform,
                CollectPolicy::Momentum => ExplorationPolicy::momentum(persistence),
            };
            let config = CollectorConfig {
                env_name: env.clone(),
                num_episodes: episodes,
                episode_len,
                seed,
            };
            generate(&env, obs_mode(pixels), config, &policy, &out)?;
        }
        Commands::Train {
            dataset,
            out,
            config,
            method,
            epochs,
        } => {
            let mut config = match config {
                Some(path) => PldmConfig::load(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?,
                None => PldmConfig::default(),
            };
            if let Some(epochs) = epochs {
                config.train.epochs = epochs;
            }
            train(&dataset, &out, config, method)?;
        }
        Commands::Eval {
            env,
            checkpoint,
            method,
            episodes,
            pixels,
            seed,
            report,
        } => {
            let eval_config = EvalConfig {
                episodes,
                base_seed: seed,
                ..Default::default()
            };
            let result = eval(
                &env,
                obs_mode(pixels),
                checkpoint.as_deref(),
                method,
                eval_config,
            )?;
            if let Some(path) = report {
                std::fs::write(&path, serde_json::to_string_pretty(&result)?)
                    .with_context(|| format!("failed to write report {}", path.display()))?;
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&PldmConfig::default())?);
        }
    }

    Ok(())
}

fn obs_mode(pixels: bool) -> ObsMode {
    if pixels {
        ObsMode::Pixels
    } else {
        ObsMode::State
    }
}

fn list_envs() {
    println!("Available environments:");
    println!();
    for name in available_envs() {
        let description = match *name {
            "wall" => "Two rooms joined by a door; goals lie in the other room",
            "point_maze_umaze" => "Point mass in a U-shaped maze (5x5)",
            "point_maze_medium" => "Point mass in a medium maze (8x8)",
            "point_maze_large" => "Point mass in a large maze (9x12)",
            _ => "",
        };
        println!("  {:<20} {}", name, description);
    }
    println!();
    println!("Add --pixels to generate/eval for 64x64 top-down observations.");
    println!("Training requires --features torch and libtorch installed.");
}

fn demo(env_name: &str, steps: usize, every: usize, seed: u64) -> Result<()> {
    tracing::info!(env = env_name, steps, "Running demo");

    let mut env = make_env(env_name, ObsMode::State)?;
    let (mut obs, _) = env.reset(Some(seed));
    let goal = env.goal_observation();
    let mut policy = RandomPolicy::new(env.action_space(), seed);

    for step in 0..steps {
        if step % every.max(1) == 0 {
            if let Some(frame) = env.render() {
                println!("Step {} (distance {:.2}):\n{}", step, env.distance_to_goal(), frame);
            }
        }
        let action = policy.act(&obs, &goal)?;
        let result = env.step(&action);
        let done = result.done();
        obs = result.observation;
        if done {
            tracing::info!(step, "Episode ended");
            break;
        }
    }
    Ok(())
}

fn generate(
    env_name: &str,
    mode: ObsMode,
    config: CollectorConfig,
    policy: &ExplorationPolicy,
    out: &Path,
) -> Result<()> {
    let spec = EnvSpec::from_name(env_name, mode)?;
    let dataset = DataCollector::new(config).collect(|| spec.build(), policy)?;
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    dataset
        .save(out)
        .with_context(|| format!("failed to write dataset {}", out.display()))?;
    println!(
        "Wrote {} trajectories ({} transitions) to {}",
        dataset.num_trajectories(),
        abbreviate(dataset.num_transitions() as u64),
        out.display()
    );
    Ok(())
}

#[cfg(feature = "torch")]
fn device() -> tch::Device {
    if tch::Cuda::is_available() {
        tracing::info!("Using CUDA");
        tch::Device::Cuda(0)
    } else {
        tracing::info!("Using CPU");
        tch::Device::Cpu
    }
}

#[cfg(feature = "torch")]
fn train(dataset_path: &Path, out: &Path, config: PldmConfig, method: Method) -> Result<()> {
    use pldm::checkpoint::CheckpointManager;
    use pldm::data::OfflineDataset;
    use pldm::log::{CompositeLogger, ConsoleLogger};
    use pldm::training::{checkpoint_config, GcbcTrainer, WorldModelTrainer};

    let dataset = OfflineDataset::load(dataset_path)
        .with_context(|| format!("failed to load dataset {}", dataset_path.display()))?;
    std::fs::create_dir_all(out)?;
    config.save(out.join("config.json"))?;

    let mut logger = CompositeLogger::default();
    logger.add(Box::new(ConsoleLogger::new()));
    #[cfg(feature = "tensorboard")]
    logger.add(Box::new(pldm::log::TensorBoardLogger::new(out.join("tensorboard"))));

    let mut manager = CheckpointManager::new(checkpoint_config(out, &config.train));
    let summary = match method {
        Method::Pldm => WorldModelTrainer::new(config, &dataset, device())?
            .with_logger(Box::new(logger))
            .train(&dataset, Some(&mut manager))?,
        Method::Gcbc => GcbcTrainer::new(config, &dataset, device())?
            .with_logger(Box::new(logger))
            .train(&dataset, Some(&mut manager))?,
        Method::Random => anyhow::bail!("the random policy has nothing to train"),
    };

    tracing::info!(
        method = ?method,
        epochs = summary.epochs,
        steps = summary.global_step,
        final_loss = summary.final_loss,
        best_loss = summary.best_loss,
        elapsed = %pldm::utils::format_duration(summary.elapsed_secs),
        "Training complete"
    );
    Ok(())
}

#[cfg(not(feature = "torch"))]
fn train(_dataset: &Path, _out: &Path, _config: PldmConfig, _method: Method) -> Result<()> {
    tracing::error!("Training requires the 'torch' feature. Rebuild with:");
    tracing::error!("  cargo build --features torch");
    tracing::error!("Note: libtorch must be installed (set LIBTORCH or LIBTORCH_USE_PYTORCH=1).");
    anyhow::bail!("built without the 'torch' feature")
}

fn eval(
    env_name: &str,
    mode: ObsMode,
    checkpoint: Option<&Path>,
    method: Method,
    config: EvalConfig,
) -> Result<EvalReport> {
    tracing::info!(
        env = env_name,
        method = ?method,
        episodes = config.episodes,
        "Starting evaluation"
    );

    let mut env = make_env(env_name, mode)?;
    let mut policy = build_policy(env.as_ref(), checkpoint, method, config.base_seed)?;
    let report = Evaluator::new(config).run(&mut env, policy.as_mut())?;

    println!(
        "{}: success rate {:.1}% over {} episodes (mean final distance {:.2}, mean length {:.1})",
        report.policy,
        100.0 * report.success_rate,
        report.episodes.len(),
        report.mean_final_distance,
        report.mean_episode_length
    );
    Ok(report)
}

fn build_policy(
    env: &dyn GoalEnv,
    checkpoint: Option<&Path>,
    method: Method,
    seed: u64,
) -> Result<Box<dyn GoalPolicy>> {
    if method == Method::Random {
        return Ok(Box::new(RandomPolicy::new(env.action_space(), seed)));
    }
    let dir = checkpoint.context("--checkpoint is required for learned policies")?;
    load_policy(env, dir, method)
}

#[cfg(feature = "torch")]
fn load_policy(env: &dyn GoalEnv, dir: &Path, method: Method) -> Result<Box<dyn GoalPolicy>> {
    use pldm::baselines::GcbcPolicy;
    use pldm::checkpoint::{CheckpointConfig, CheckpointManager};
    use pldm::models::PldmModel;
    use pldm::planning::{build_planner, PlanningAgent};
    use pldm::spaces::Space;

    let path = CheckpointManager::new(CheckpointConfig::new(dir))
        .resolve("checkpoint_final")
        .with_context(|| format!("no checkpoint in {}", dir.display()))?;
    tracing::info!(path = %path.display(), "Loading checkpoint");

    let obs_shape = env.observation_space().shape().to_vec();
    match method {
        Method::Pldm => {
            let (model, state) = PldmModel::from_checkpoint(&path, device())?;
            if model.meta().obs_shape != obs_shape {
                anyhow::bail!(
                    "checkpoint expects observations of shape {:?} but the environment \
                     produces {:?} (check --pixels)",
                    model.meta().obs_shape,
                    obs_shape
                );
            }
            let planner_config = serde_json::from_value::<PldmConfig>(state.config)
                .context("invalid config in checkpoint")?
                .planner
                .fit_action_space(&env.action_space());
            let replan_every = planner_config.replan_every;
            let agent = PlanningAgent::new(model, build_planner(&planner_config), replan_every);
            Ok(Box::new(agent))
        }
        Method::Gcbc => {
            let (policy, _) = GcbcPolicy::from_checkpoint(&path, device())?;
            if policy.meta().obs_dim != obs_shape.iter().product::<usize>() {
                anyhow::bail!(
                    "checkpoint observation size does not match the environment (check --pixels)"
                );
            }
            Ok(Box::new(policy))
        }
        Method::Random => unreachable!("random policies are built without a checkpoint"),
    }
}

#[cfg(not(feature = "torch"))]
fn load_policy(_env: &dyn GoalEnv, _dir: &Path, method: Method) -> Result<Box<dyn GoalPolicy>> {
    anyhow::bail!(
        "evaluating {:?} checkpoints requires the 'torch' feature (use --method random otherwise)",
        method
    )
}
