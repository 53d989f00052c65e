//! Deep Deterministic Policy Gradient with a momentum-reshaped critic update
//!
//! The actor and the target networks follow plain DDPG. The critic is not
//! stepped along its batch gradient `g`: `g` only feeds the momentum `M`, and
//! the critic's Adam optimizer receives the curvature-weighted gradient `R`
//! built from `M` and the per-sample Bellman-residual gradients (see
//! [`super::momentum`]).
//!
//! # Algorithm Overview
//!
//! Per learning step, on a batch of N transitions:
//! - **Target**: `y = r + γ(1 − done)·Q′(s′, μ′(s′))`, no gradient
//! - **Ordinary gradient**: `g = ∇ mean((Q(s, a) − y)²)`
//! - **Per-sample gradients**: `G_i = ∇δ_i`, `δ_i = y_i − Q(s_i, a_i)`,
//!   against the same critic snapshot as `g`
//! - **Momentum**: `M ← 0.999·M + 0.001·g`, then `R = mean_i(⟨M, G_i⟩·G_i)`
//! - **Critic step**: Adam applied to `R`
//! - **Every `policy_frequency` steps**: actor step on `−mean Q(s, μ(s))` and
//!   soft updates `θ′ ← τθ + (1 − τ)θ′` of both targets
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};
//! use ddpg_momentum::algo::ddpg::{DdpgAgent, DdpgConfig};
//!
//! let config = DdpgConfig::new().with_batch_size(64);
//! let bounds = env.action_space().bounds()?;
//! let mut agent = DdpgAgent::<Autodiff<NdArray>>::new(
//!     config,
//!     env.observation_dim(),
//!     bounds,
//!     NdArrayDevice::default(),
//! )?;
//!
//! let action = agent.act(&observation, &mut rng)?;
//! let stats = agent.learn(&replay.sample(64, &mut rng)?, global_step)?;
//! ```

use burn::{
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::{
    momentum::{Momentum, RmsProp},
    per_sample::{bellman_residual_grads, BellmanBatch},
};
use crate::{
    env::ActionBounds,
    error::{self, Error},
    memory::Batch,
    nn::{mlp::l1_mean, MLPConfig, MLPCritic, MLP},
    traits::{to_vec, Rows, ToTensor},
};

const ADAM_EPSILON: f32 = 1e-8;

/// What the critic optimizer is handed once `R` is known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientSubstitution {
    /// Apply `R` directly
    Reshaped,
    /// Take an RMSProp step on `M` with `R` as its gradient, then apply `M`
    Momentum,
}

/// Configuration for a DDPG run
#[derive(Config, Debug)]
pub struct DdpgConfig {
    /// Environment id, see [`crate::gym::make`]
    #[config(default = "String::from(\"Pendulum-v1\")")]
    pub env_id: String,
    /// Experiment name, part of the run name
    #[config(default = "String::from(\"ddpg_momentum\")")]
    pub exp_name: String,
    #[config(default = 1_000_000)]
    pub total_timesteps: usize,
    /// Adam learning rate for both networks
    #[config(default = 3e-4)]
    pub learning_rate: f64,
    /// Replay capacity
    #[config(default = 1_000_000)]
    pub buffer_size: usize,
    /// Discount factor γ
    #[config(default = 0.99)]
    pub gamma: f32,
    /// Target smoothing coefficient τ
    #[config(default = 0.005)]
    pub tau: f32,
    #[config(default = 256)]
    pub batch_size: usize,
    /// Std of the exploration noise, relative to the action scale
    #[config(default = 0.1)]
    pub exploration_noise: f32,
    /// Steps of uniform random actions before learning starts
    #[config(default = 25_000)]
    pub learning_starts: usize,
    /// Actor and target updates happen when `global_step % policy_frequency == 0`
    #[config(default = 2)]
    pub policy_frequency: usize,
    /// Exploration noise is clipped to `±noise_clip·action_scale`
    #[config(default = 0.5)]
    pub noise_clip: f32,
    #[config(default = 1)]
    pub seed: u64,
    /// Seed the tensor backend as well as the host RNG
    #[config(default = "true")]
    pub deterministic: bool,
    /// Hidden layer sizes of both actor and critic
    #[config(default = "vec![256, 256]")]
    pub hidden_sizes: Vec<usize>,
    /// Clamp `g`, `G` and `R` to `±grad_clip`
    pub grad_clip: Option<f32>,
    #[config(default = "GradientSubstitution::Reshaped")]
    pub substitution: GradientSubstitution,
    /// Differentiate the bootstrap term through the critic in the per-sample gradients
    #[config(default = "false")]
    pub residual_gradient: bool,
    /// Store time-limit truncations as non-terminal
    #[config(default = "true")]
    pub handle_timeout_termination: bool,
    /// Stop with [`Error::NonFinite`] on a non-finite loss or gradient
    #[config(default = "true")]
    pub abort_on_non_finite: bool,
    /// Emit training metrics every this many steps
    #[config(default = 100)]
    pub metrics_interval: usize,
}

impl DdpgConfig {
    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> error::Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("buffer_size", self.buffer_size),
            ("policy_frequency", self.policy_frequency),
            ("metrics_interval", self.metrics_interval),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(Error::InvalidConfig(format!("gamma must be in [0, 1], got {}", self.gamma)));
        }
        if !(0.0..=1.0).contains(&self.tau) {
            return Err(Error::InvalidConfig(format!("tau must be in [0, 1], got {}", self.tau)));
        }
        if !(self.exploration_noise >= 0.0) || !(self.noise_clip >= 0.0) {
            return Err(Error::InvalidConfig(
                "exploration_noise and noise_clip must be non-negative".into(),
            ));
        }
        if let Some(clip) = self.grad_clip {
            if !(clip > 0.0) {
                return Err(Error::InvalidConfig(format!("grad_clip must be positive, got {clip}")));
            }
        }
        Ok(())
    }

    /// `{env_id}__{exp_name}__{seed}__{timestamp}`
    pub fn run_name(&self, timestamp: u64) -> String {
        format!("{}__{}__{}__{}", self.env_id, self.exp_name, self.seed, timestamp)
    }
}

/// Scalars from one learning step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearnStats {
    pub critic_loss: f32,
    /// Mean Q(s, a) over the batch
    pub q_mean: f32,
    /// Set on steps where the actor was updated
    pub actor_loss: Option<f32>,
    /// Mean |g|
    pub grad_l1: f32,
    /// Mean |gradient handed to the critic optimizer|
    pub applied_l1: f32,
}

/// DDPG agent whose critic follows the momentum-reshaped gradient
pub struct DdpgAgent<B: AutodiffBackend> {
    actor: MLP<B>,
    target_actor: MLP<B>,
    critic: MLPCritic<B>,
    target_critic: MLPCritic<B>,

    momentum: Momentum<B::InnerBackend>,
    momentum_optimizer: Option<RmsProp<B::InnerBackend>>,

    optimizer_actor: OptimizerAdaptor<Adam, MLP<B>, B>,
    optimizer_critic: OptimizerAdaptor<Adam, MLPCritic<B>, B>,

    obs_dim: usize,
    bounds: ActionBounds,
    action_scale: Vec<f32>,
    action_bias: Vec<f32>,

    config: DdpgConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> DdpgAgent<B> {
    /// Create a new agent; targets start as exact copies of the live networks
    pub fn new(config: DdpgConfig, obs_dim: usize, bounds: ActionBounds, device: B::Device) -> error::Result<Self> {
        config.validate()?;
        if obs_dim == 0 {
            return Err(Error::InvalidConfig("observation dimension must be positive".into()));
        }
        if config.deterministic {
            B::seed(config.seed);
        }

        let act_dim = bounds.dim();
        let actor = MLPConfig::new(obs_dim, config.hidden_sizes.clone(), act_dim).init::<B>(&device);
        let critic = MLPCritic::new(obs_dim, act_dim, config.hidden_sizes.clone(), &device);
        let target_actor = actor.clone();
        let target_critic = critic.clone();

        let slots = critic.param_slots();
        let momentum_optimizer = match config.substitution {
            GradientSubstitution::Reshaped => None,
            GradientSubstitution::Momentum => Some(RmsProp::new(
                &slots,
                0.5 * config.learning_rate as f32,
                &device,
            )),
        };
        let momentum = Momentum::zeros(slots, &device);

        log::debug!(
            "ddpg agent: obs_dim={obs_dim} act_dim={act_dim} hidden={:?} critic slots={}",
            config.hidden_sizes,
            momentum.slots().len()
        );

        Ok(Self {
            actor,
            target_actor,
            critic,
            target_critic,
            momentum,
            momentum_optimizer,
            optimizer_actor: AdamConfig::new().with_epsilon(ADAM_EPSILON).init(),
            optimizer_critic: AdamConfig::new().with_epsilon(ADAM_EPSILON).init(),
            obs_dim,
            action_scale: bounds.scale(),
            action_bias: bounds.bias(),
            bounds,
            config,
            device,
        })
    }

    pub fn config(&self) -> &DdpgConfig {
        &self.config
    }

    pub fn bounds(&self) -> &ActionBounds {
        &self.bounds
    }

    pub fn actor(&self) -> &MLP<B> {
        &self.actor
    }

    pub fn target_actor(&self) -> &MLP<B> {
        &self.target_actor
    }

    pub fn critic(&self) -> &MLPCritic<B> {
        &self.critic
    }

    pub fn target_critic(&self) -> &MLPCritic<B> {
        &self.target_critic
    }

    pub fn momentum(&self) -> &Momentum<B::InnerBackend> {
        &self.momentum
    }

    /// Deterministic policy action `μ(s)`, inside the bounds
    pub fn policy_action(&self, observation: &[f32]) -> error::Result<Vec<f32>> {
        if observation.len() != self.obs_dim {
            return Err(Error::DimensionMismatch {
                what: "observation",
                expected: self.obs_dim,
                actual: observation.len(),
            });
        }
        let state: Tensor<B, 2> = Rows::single(observation).to_tensor(&self.device);
        to_vec(self.scaled_action(&self.actor, state))
    }

    /// Exploration action: `μ(s)` plus clipped Gaussian noise, clipped to the bounds
    pub fn act<R: Rng + ?Sized>(&self, observation: &[f32], rng: &mut R) -> error::Result<Vec<f32>> {
        let mut action = self.policy_action(observation)?;

        for (i, value) in action.iter_mut().enumerate() {
            let scale = self.action_scale[i];
            let limit = self.config.noise_clip * scale;
            let noise: f32 = rng.sample(StandardNormal);
            *value += (noise * self.config.exploration_noise * scale).clamp(-limit, limit);
        }
        self.bounds.clip(&mut action);

        Ok(action)
    }

    /// One critic update, plus the actor and target updates when
    /// `global_step % policy_frequency == 0`
    pub fn learn(&mut self, batch: &Batch, global_step: usize) -> error::Result<LearnStats> {
        if batch.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let tensors = batch.to_tensors::<B>(&self.device);

        let (critic_loss, q_mean, grad_l1, applied_l1) = self.update_critic(
            tensors.observations.clone(),
            tensors.actions,
            tensors.rewards,
            tensors.next_observations,
            tensors.dones,
            global_step,
        )?;

        let actor_loss = if global_step % self.config.policy_frequency == 0 {
            let loss = self.update_actor(tensors.observations);
            self.soft_update_targets();
            Some(loss)
        } else {
            None
        };

        Ok(LearnStats {
            critic_loss,
            q_mean,
            actor_loss,
            grad_l1,
            applied_l1,
        })
    }

    /// Critic step along the momentum-reshaped gradient
    ///
    /// Returns `(loss, mean Q, mean |g|, mean |applied|)`.
    fn update_critic(
        &mut self,
        observations: Tensor<B, 2>,
        actions: Tensor<B, 2>,
        rewards: Tensor<B, 2>,
        next_observations: Tensor<B, 2>,
        dones: Tensor<B, 2>,
        step: usize,
    ) -> error::Result<(f32, f32, f32, f32)> {
        let gamma = self.config.gamma;
        let clip = self.config.grad_clip;

        let not_done = dones.neg().add_scalar(1.0);
        let next_actions = self
            .scaled_action(&self.target_actor, next_observations.clone())
            .detach();
        let next_q = self
            .target_critic
            .forward(&next_observations, &next_actions)
            .detach();
        let target = rewards
            .add(next_q.mul(not_done.clone()).mul_scalar(gamma))
            .detach();

        let q = self.critic.forward(&observations, &actions);
        let q_mean = q.clone().mean().into_scalar().elem::<f32>();
        let loss = (q - target).powf_scalar(2.0).mean();
        let loss_value = loss.clone().into_scalar().elem::<f32>();
        self.check_finite(loss_value, "critic loss", step)?;

        let grads = GradientsParams::from_grads(loss.backward(), &self.critic);
        let g = clip_all(self.critic.flat_grads(&grads), clip);

        // Per-sample gradients against the same parameters g was taken at
        let snapshot = self.critic.valid();
        let bellman = BellmanBatch {
            observations: observations.inner(),
            actions: actions.inner(),
            next_observations: next_observations.inner(),
            next_actions: next_actions.inner(),
            not_done: not_done.inner(),
        };
        let per_sample =
            bellman_residual_grads(&snapshot, &bellman, gamma, self.config.residual_gradient)?.clipped(clip);

        self.momentum.check_slots(&snapshot.param_slots())?;
        self.momentum.accumulate(&g)?;
        let mut applied = clip_all(self.momentum.reshape(&per_sample)?, clip);

        if let Some(optimizer) = self.momentum_optimizer.as_mut() {
            self.momentum.descend(optimizer, &applied)?;
            applied = self.momentum.values().to_vec();
        }

        if self.config.abort_on_non_finite && applied.iter().any(|t| !is_finite(t)) {
            return Err(Error::NonFinite {
                what: "critic gradient",
                step,
            });
        }

        let grad_l1 = l1_mean(&g);
        let applied_l1 = l1_mean(&applied);

        let grads = self.critic.grads_from_flat(&applied);
        self.critic = self
            .optimizer_critic
            .step(self.config.learning_rate, self.critic.clone(), grads);

        self.momentum.check_slots(&self.critic.param_slots())?;

        Ok((loss_value, q_mean, grad_l1, applied_l1))
    }

    /// Update actor network and return loss value
    fn update_actor(&mut self, observations: Tensor<B, 2>) -> f32 {
        let actions = self.scaled_action(&self.actor, observations.clone());
        let q_values = self.critic.forward(&observations, &actions);

        // Maximize Q-value = minimize -Q
        let loss = q_values.neg().mean();
        let loss_value = loss.clone().into_scalar().elem::<f32>();

        let grads = GradientsParams::from_grads(loss.backward(), &self.actor);
        self.actor = self
            .optimizer_actor
            .step(self.config.learning_rate, self.actor.clone(), grads);

        loss_value
    }

    /// Soft update target networks
    #[inline]
    fn soft_update_targets(&mut self) {
        let tau = self.config.tau;
        self.target_actor.soft_update(&self.actor, tau);
        self.target_critic.soft_update(&self.critic, tau);
    }

    /// `tanh(actor(s))·scale + bias`
    fn scaled_action(&self, actor: &MLP<B>, state: Tensor<B, 2>) -> Tensor<B, 2> {
        let scale: Tensor<B, 2> = Rows::single(&self.action_scale).to_tensor(&self.device);
        let bias: Tensor<B, 2> = Rows::single(&self.action_bias).to_tensor(&self.device);
        actor.forward_tanh(state).mul(scale).add(bias)
    }

    fn check_finite(&self, value: f32, what: &'static str, step: usize) -> error::Result<()> {
        if self.config.abort_on_non_finite && !value.is_finite() {
            return Err(Error::NonFinite { what, step });
        }
        Ok(())
    }
}

fn clip_all<B: Backend>(tensors: Vec<Tensor<B, 1>>, bound: Option<f32>) -> Vec<Tensor<B, 1>> {
    match bound {
        None => tensors,
        Some(c) => tensors.into_iter().map(|t| t.clamp(-c, c)).collect(),
    }
}

/// No element is NaN or infinite
fn is_finite<B: Backend>(tensor: &Tensor<B, 1>) -> bool {
    let nan = tensor.clone().is_nan();
    let inf = tensor.clone().abs().equal_elem(f32::INFINITY);
    !nan.bool_or(inf).any().into_scalar().elem::<bool>()
}
