//! Training loop
//!
//! The trainer owns the environment, the agent, the replay buffer, the metrics
//! sink and the host RNG, and advances them one environment step at a time.
//! It is in one of two phases, decided by the global step alone:
//!
//! - **Warmup** (`global_step < learning_starts`): uniform random actions, the
//!   transitions are stored, nothing is learned.
//! - **Learning**: noisy policy actions and one agent update after every
//!   environment step.

use std::time::Instant;

use burn::tensor::backend::AutodiffBackend;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    algo::ddpg::{DdpgAgent, DdpgConfig, LearnStats},
    env::{EpisodeMonitor, EpisodeStats, Environment},
    error::Result,
    memory::ReplayBuffer,
    metrics::MetricsSink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup,
    Learning,
}

/// What happened during one [`Trainer::step`]
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Phase the step ran in
    pub phase: Phase,
    pub reward: f32,
    pub done: bool,
    /// Set when the step finished an episode
    pub episode: Option<EpisodeStats>,
    /// Set when the agent learned on this step
    pub stats: Option<LearnStats>,
}

/// Drives a [`DdpgAgent`] on an environment
pub struct Trainer<B: AutodiffBackend, E: Environment, S: MetricsSink> {
    env: EpisodeMonitor<E>,
    agent: DdpgAgent<B>,
    replay: ReplayBuffer,
    sink: S,
    rng: StdRng,

    global_step: usize,
    observation: Vec<f32>,
    last_actor_loss: f32,
    episodes: Vec<EpisodeStats>,
    start: Instant,
}

impl<B: AutodiffBackend, E: Environment, S: MetricsSink> Trainer<B, E, S> {
    /// Build the agent and the replay buffer for `env` and reset it
    ///
    /// Fails when the environment's action space is not a box or the
    /// configuration is invalid.
    pub fn new(config: DdpgConfig, env: E, sink: S, device: B::Device) -> Result<Self> {
        config.validate()?;
        let bounds = env.action_space().bounds()?;
        let obs_dim = env.observation_dim();

        let replay = ReplayBuffer::new(
            config.buffer_size,
            obs_dim,
            bounds.dim(),
            config.handle_timeout_termination,
        )?;
        let rng = StdRng::seed_from_u64(config.seed);
        let agent = DdpgAgent::new(config, obs_dim, bounds, device)?;

        let mut env = EpisodeMonitor::new(env);
        let observation = env.reset();

        Ok(Self {
            env,
            agent,
            replay,
            sink,
            rng,
            global_step: 0,
            observation,
            last_actor_loss: 0.0,
            episodes: Vec::new(),
            start: Instant::now(),
        })
    }

    pub fn phase(&self) -> Phase {
        if self.global_step < self.agent.config().learning_starts {
            Phase::Warmup
        } else {
            Phase::Learning
        }
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn agent(&self) -> &DdpgAgent<B> {
        &self.agent
    }

    pub fn replay(&self) -> &ReplayBuffer {
        &self.replay
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn env(&self) -> &E {
        self.env.inner()
    }

    /// Observation the next action will be chosen for
    pub fn observation(&self) -> &[f32] {
        &self.observation
    }

    /// Every finished episode so far
    pub fn episodes(&self) -> &[EpisodeStats] {
        &self.episodes
    }

    /// One environment step, followed by one learning update in the learning phase
    pub fn step(&mut self) -> Result<StepOutcome> {
        let phase = self.phase();

        let action = match phase {
            Phase::Warmup => self.agent.bounds().sample(&mut self.rng),
            Phase::Learning => self.agent.act(&self.observation, &mut self.rng)?,
        };

        let mut step = self.env.step(&action);

        if let Some(episode) = step.info.episode {
            log::info!(
                "global_step={}, episodic_return={}",
                self.global_step,
                episode.episode_return
            );
            self.sink
                .emit("charts/episodic_return", episode.episode_return as f64, self.global_step)?;
            self.sink
                .emit("charts/episodic_length", episode.length as f64, self.global_step)?;
            self.episodes.push(episode);
        }

        // The stored successor of a final step is where the episode ended,
        // not the first observation of the next one
        let next_observation = match step.info.terminal_observation.take() {
            Some(terminal) if step.done => terminal,
            _ => step.observation.clone(),
        };
        self.replay.add(
            &self.observation,
            &next_observation,
            &action,
            step.reward,
            step.done,
            &step.info,
        )?;
        self.observation = step.observation;

        let stats = match phase {
            Phase::Warmup => None,
            Phase::Learning => Some(self.learn()?),
        };

        self.global_step += 1;

        Ok(StepOutcome {
            phase,
            reward: step.reward,
            done: step.done,
            episode: step.info.episode,
            stats,
        })
    }

    /// Step until `total_timesteps` is reached
    pub fn run(&mut self) -> Result<&[EpisodeStats]> {
        let total = self.agent.config().total_timesteps;
        log::info!(
            "training for {total} steps ({} warmup)",
            self.agent.config().learning_starts.min(total)
        );

        while self.global_step < total {
            self.step()?;
        }
        self.sink.flush()?;

        log::info!(
            "training done: {} episodes in {:.1}s",
            self.episodes.len(),
            self.start.elapsed().as_secs_f64()
        );
        Ok(&self.episodes)
    }

    fn learn(&mut self) -> Result<LearnStats> {
        let batch = self.replay.sample(self.agent.config().batch_size, &mut self.rng)?;
        let stats = self.agent.learn(&batch, self.global_step)?;
        if let Some(loss) = stats.actor_loss {
            self.last_actor_loss = loss;
        }

        if self.global_step % self.agent.config().metrics_interval == 0 {
            self.report(&stats)?;
        }
        Ok(stats)
    }

    fn report(&mut self, stats: &LearnStats) -> Result<()> {
        let step = self.global_step;
        let elapsed = self.start.elapsed().as_secs_f64();
        let sps = if elapsed > 0.0 { step as f64 / elapsed } else { 0.0 };

        let scalars = [
            ("losses/qf1_loss", stats.critic_loss as f64),
            ("losses/actor_loss", self.last_actor_loss as f64),
            ("losses/qf1_values", stats.q_mean as f64),
            ("weights/l1_qf1", self.agent.critic().l1_mean() as f64),
            ("weights/l1_m", self.agent.momentum().l1_mean() as f64),
            ("grads/l1_g", stats.grad_l1 as f64),
            ("grads/l1_r", stats.applied_l1 as f64),
            ("charts/SPS", sps),
        ];
        for (tag, value) in scalars {
            self.sink.emit(tag, value, step)?;
        }

        log::debug!("SPS: {}", sps as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::{ActionSpace, Step, StepInfo},
        error::Error,
        gym::PointMass,
        metrics::MemorySink,
        traits::to_vec,
    };
    use burn::backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    };

    type AD = Autodiff<NdArray>;

    fn small_config() -> DdpgConfig {
        DdpgConfig::new()
            .with_env_id("PointMass-v0".to_string())
            .with_hidden_sizes(vec![8, 8])
            .with_batch_size(4)
            .with_buffer_size(1000)
            .with_learning_starts(10)
            .with_metrics_interval(5)
    }

    fn trainer<E: Environment>(config: DdpgConfig, env: E) -> Trainer<AD, E, MemorySink> {
        Trainer::new(config, env, MemorySink::default(), NdArrayDevice::default()).unwrap()
    }

    fn flat(tensors: Vec<burn::tensor::Tensor<AD, 1>>) -> Vec<f32> {
        tensors.into_iter().flat_map(|t| to_vec(t).unwrap()).collect()
    }

    /// Ends every episode after `len` steps in observation `[len]`, or
    /// truncates it there when `truncate` is set.
    struct Corridor {
        t: usize,
        len: usize,
        truncate: bool,
    }

    impl Environment for Corridor {
        fn observation_dim(&self) -> usize {
            1
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::Box {
                low: vec![-1.0],
                high: vec![1.0],
            }
        }

        fn reset(&mut self) -> Vec<f32> {
            self.t = 0;
            vec![0.0]
        }

        fn step(&mut self, _action: &[f32]) -> Step {
            self.t += 1;
            let done = self.t >= self.len;
            Step {
                observation: vec![self.t as f32],
                reward: 1.0,
                done,
                info: StepInfo {
                    truncated: done && self.truncate,
                    ..StepInfo::default()
                },
            }
        }
    }

    struct Buttons;

    impl Environment for Buttons {
        fn observation_dim(&self) -> usize {
            1
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::Discrete(2)
        }

        fn reset(&mut self) -> Vec<f32> {
            vec![0.0]
        }

        fn step(&mut self, _action: &[f32]) -> Step {
            Step {
                observation: vec![0.0],
                reward: 0.0,
                done: false,
                info: StepInfo::default(),
            }
        }
    }

    #[test]
    fn warmup_changes_no_parameters() {
        let mut trainer = trainer(small_config(), PointMass::new(50, 0));
        let actor = flat(trainer.agent().actor().flat_params());
        let critic = flat(trainer.agent().critic().flat_params());

        for _ in 0..10 {
            assert_eq!(trainer.phase(), Phase::Warmup);
            let outcome = trainer.step().unwrap();
            assert!(outcome.stats.is_none());
        }

        assert_eq!(flat(trainer.agent().actor().flat_params()), actor);
        assert_eq!(flat(trainer.agent().critic().flat_params()), critic);
        assert_eq!(trainer.agent().momentum().l1_mean(), 0.0);
        assert_eq!(trainer.replay().len(), 10);
        assert_eq!(trainer.phase(), Phase::Learning);
    }

    #[test]
    fn terminal_observation_reaches_replay() {
        let env = Corridor {
            t: 0,
            len: 3,
            truncate: false,
        };
        let mut trainer = trainer(small_config(), env);

        for _ in 0..3 {
            trainer.step().unwrap();
        }

        // The env was reset after the final step
        assert_eq!(trainer.observation(), &[0.0]);
        let last = trainer.replay().get(2).unwrap();
        assert_eq!(last.observations, vec![2.0]);
        assert_eq!(last.next_observations, vec![3.0]);
        assert_eq!(last.dones, vec![1.0]);

        let first = trainer.replay().get(0).unwrap();
        assert_eq!(first.next_observations, vec![1.0]);
        assert_eq!(first.dones, vec![0.0]);

        assert_eq!(trainer.episodes().len(), 1);
        assert_eq!(trainer.episodes()[0].length, 3);
        assert_eq!(trainer.sink().values("charts/episodic_return"), vec![3.0]);
        assert_eq!(trainer.sink().values("charts/episodic_length"), vec![3.0]);
    }

    #[test]
    fn truncated_episodes_keep_bootstrapping() {
        let env = Corridor {
            t: 0,
            len: 2,
            truncate: true,
        };
        let mut trainer = trainer(small_config(), env);
        trainer.step().unwrap();
        let outcome = trainer.step().unwrap();

        assert!(outcome.done);
        let last = trainer.replay().get(1).unwrap();
        assert_eq!(last.next_observations, vec![2.0]);
        assert_eq!(last.dones, vec![0.0]);
    }

    #[test]
    fn discrete_action_space_is_rejected() {
        let result = Trainer::<AD, _, _>::new(
            small_config(),
            Buttons,
            MemorySink::default(),
            NdArrayDevice::default(),
        );
        assert!(matches!(result, Err(Error::UnsupportedActionSpace(_))));
    }

    #[test]
    fn learning_keeps_momentum_layout_and_reports() {
        let mut trainer = trainer(small_config().with_total_timesteps(20), PointMass::new(50, 1));

        while trainer.global_step() < 20 {
            let outcome = trainer.step().unwrap();
            assert_eq!(outcome.stats.is_some(), outcome.phase == Phase::Learning);

            let agent = trainer.agent();
            assert!(agent.momentum().check_slots(&agent.critic().param_slots()).is_ok());
        }

        // Learning steps 10 and 15 are reported
        let sink = trainer.sink();
        assert_eq!(sink.values("losses/qf1_loss").len(), 2);
        for tag in [
            "losses/actor_loss",
            "losses/qf1_values",
            "weights/l1_qf1",
            "weights/l1_m",
            "grads/l1_g",
            "grads/l1_r",
            "charts/SPS",
        ] {
            assert_eq!(sink.values(tag).len(), 2, "{tag}");
        }
        assert!(trainer.agent().momentum().l1_mean() > 0.0);
    }

    #[test]
    #[ignore = "30k environment steps, run with `cargo test --release -- --ignored`"]
    fn point_mass_return_improves() {
        let config = DdpgConfig::new()
            .with_env_id("PointMass-v0".to_string())
            .with_hidden_sizes(vec![64, 64])
            .with_batch_size(32)
            .with_learning_starts(1000)
            .with_total_timesteps(30_000)
            .with_metrics_interval(1000);
        let mut trainer = trainer(config, PointMass::new(50, 0));

        // (step the episode ended at, its return)
        let mut returns = Vec::new();
        while trainer.global_step() < 30_000 {
            let outcome = trainer.step().unwrap();
            if let Some(episode) = outcome.episode {
                returns.push((trainer.global_step(), episode.episode_return));
            }
        }

        let mean_between = |from: usize, to: usize| {
            let window: Vec<f32> = returns
                .iter()
                .filter(|(step, _)| (from..to).contains(step))
                .map(|(_, ret)| *ret)
                .collect();
            assert!(!window.is_empty(), "no episode ended in {from}..{to}");
            window.iter().sum::<f32>() / window.len() as f32
        };
        let early = mean_between(1000, 6000);
        let late = mean_between(25_000, 30_001);
        assert!(late > early, "late {late} vs early {early}");
    }
}
