use std::{
    fs,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Context};
use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    config::Config,
};
use clap::{Parser, ValueEnum};
use ddpg_momentum::{
    algo::ddpg::{DdpgConfig, GradientSubstitution},
    gym,
    metrics::{CsvSink, FanOut, LogSink},
    trainer::Trainer,
};

type Backend = Autodiff<NdArray>;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Substitution {
    /// Apply the reshaped gradient R
    Reshaped,
    /// RMSProp step on M with R, then apply M
    Momentum,
}

impl From<Substitution> for GradientSubstitution {
    fn from(value: Substitution) -> Self {
        match value {
            Substitution::Reshaped => GradientSubstitution::Reshaped,
            Substitution::Momentum => GradientSubstitution::Momentum,
        }
    }
}

/// Train a DDPG agent whose critic follows a curvature-weighted momentum
///
/// Every flag overrides the value from `--config` (or the built-in default).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration to start from
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the run folder is created in
    #[arg(long, default_value = "runs")]
    runs_dir: PathBuf,

    /// Environment id (Pendulum-v1, PointMass-v0)
    #[arg(long)]
    env_id: Option<String>,

    #[arg(long)]
    exp_name: Option<String>,

    #[arg(long)]
    total_timesteps: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    buffer_size: Option<usize>,

    #[arg(long)]
    gamma: Option<f32>,

    #[arg(long)]
    tau: Option<f32>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    exploration_noise: Option<f32>,

    #[arg(long)]
    learning_starts: Option<usize>,

    #[arg(long)]
    policy_frequency: Option<usize>,

    #[arg(long)]
    noise_clip: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,

    /// Seed the tensor backend too
    #[arg(long)]
    deterministic: Option<bool>,

    /// Hidden layer sizes, comma separated
    #[arg(long, value_delimiter = ',')]
    hidden_sizes: Option<Vec<usize>>,

    /// Clamp g, G and R to ±value
    #[arg(long)]
    grad_clip: Option<f32>,

    #[arg(long, value_enum)]
    substitution: Option<Substitution>,

    /// Differentiate the bootstrap term through the critic
    #[arg(long)]
    residual_gradient: Option<bool>,

    /// Store time-limit truncations as non-terminal
    #[arg(long)]
    handle_timeout_termination: Option<bool>,

    /// Stop on a non-finite loss or gradient
    #[arg(long)]
    abort_on_non_finite: Option<bool>,

    /// Steps between metric reports
    #[arg(long)]
    metrics_interval: Option<usize>,
}

impl Args {
    fn to_config(&self) -> anyhow::Result<DdpgConfig> {
        let mut config = match &self.config {
            Some(path) => DdpgConfig::load(path)
                .map_err(|err| anyhow!("failed to load {}: {err:?}", path.display()))?,
            None => DdpgConfig::new(),
        };

        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field.clone() {
                    config.$field = value;
                })*
            };
        }
        apply!(
            env_id,
            exp_name,
            total_timesteps,
            learning_rate,
            buffer_size,
            gamma,
            tau,
            batch_size,
            exploration_noise,
            learning_starts,
            policy_frequency,
            noise_clip,
            seed,
            deterministic,
            hidden_sizes,
            residual_gradient,
            handle_timeout_termination,
            abort_on_non_finite,
            metrics_interval,
        );
        if let Some(clip) = self.grad_clip {
            config.grad_clip = Some(clip);
        }
        if let Some(substitution) = self.substitution {
            config.substitution = substitution.into();
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.to_config()?;

    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let run_dir = args.runs_dir.join(config.run_name(timestamp));
    fs::create_dir_all(&run_dir).with_context(|| format!("creating {}", run_dir.display()))?;
    config
        .save(run_dir.join("config.json"))
        .context("writing config.json")?;
    log::info!("run directory: {}", run_dir.display());

    let sink = FanOut::new()
        .with(LogSink)
        .with(CsvSink::create(run_dir.join("metrics.csv"))?);
    let env = gym::make(&config.env_id, config.seed)?;

    let mut trainer = Trainer::<Backend, _, _>::new(config, env, sink, NdArrayDevice::default())?;
    let episodes = trainer.run()?;

    let tail = &episodes[episodes.len().saturating_sub(10)..];
    if !tail.is_empty() {
        let mean = tail.iter().map(|e| e.episode_return).sum::<f32>() / tail.len() as f32;
        log::info!("mean return of the last {} episodes: {mean:.2}", tail.len());
    }

    Ok(())
}
