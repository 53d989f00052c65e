//! Environment interface used by the trainer
//!
//! Environments expose flat `f32` observations and actions. The trainer only
//! accepts continuous (box) action spaces; anything else is rejected when the
//! trainer is built.

use rand::Rng;

use crate::error::{Error, Result};

/// Action space advertised by an environment
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpace {
    /// Continuous actions bounded per dimension by `[low, high]`
    Box { low: Vec<f32>, high: Vec<f32> },
    /// `n` discrete actions
    Discrete(usize),
}

impl ActionSpace {
    /// Validated bounds of a box space
    ///
    /// Fails with [`Error::UnsupportedActionSpace`] for any other kind of space.
    pub fn bounds(&self) -> Result<ActionBounds> {
        match self {
            ActionSpace::Box { low, high } => ActionBounds::new(low.clone(), high.clone()),
            ActionSpace::Discrete(n) => Err(Error::UnsupportedActionSpace(format!("Discrete({n})"))),
        }
    }
}

/// Per-dimension bounds of a continuous action space
#[derive(Debug, Clone, PartialEq)]
pub struct ActionBounds {
    low: Vec<f32>,
    high: Vec<f32>,
}

impl ActionBounds {
    pub fn new(low: Vec<f32>, high: Vec<f32>) -> Result<Self> {
        if low.is_empty() {
            return Err(Error::InvalidBounds("action space has no dimensions".into()));
        }
        if low.len() != high.len() {
            return Err(Error::InvalidBounds(format!(
                "low has {} dimensions, high has {}",
                low.len(),
                high.len()
            )));
        }
        for (i, (l, h)) in low.iter().zip(high.iter()).enumerate() {
            if !l.is_finite() || !h.is_finite() || l >= h {
                return Err(Error::InvalidBounds(format!("dimension {i}: [{l}, {h}]")));
            }
        }
        Ok(Self { low, high })
    }

    pub fn dim(&self) -> usize {
        self.low.len()
    }

    pub fn low(&self) -> &[f32] {
        &self.low
    }

    pub fn high(&self) -> &[f32] {
        &self.high
    }

    /// Half-width of each dimension, `(high - low) / 2`
    pub fn scale(&self) -> Vec<f32> {
        self.low.iter().zip(&self.high).map(|(l, h)| (h - l) / 2.0).collect()
    }

    /// Center of each dimension, `(high + low) / 2`
    pub fn bias(&self) -> Vec<f32> {
        self.low.iter().zip(&self.high).map(|(l, h)| (h + l) / 2.0).collect()
    }

    /// Uniformly random action inside the bounds
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32> {
        self.low
            .iter()
            .zip(&self.high)
            .map(|(&l, &h)| rng.gen_range(l..h))
            .collect()
    }

    pub fn clip(&self, action: &mut [f32]) {
        for (i, a) in action.iter_mut().enumerate() {
            *a = a.clamp(self.low[i], self.high[i]);
        }
    }
}

/// Episode summary attached to the step that ends an episode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeStats {
    pub episode_return: f32,
    pub length: usize,
}

/// Side information returned with every step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Observation the episode actually ended in (set on `done`)
    pub terminal_observation: Option<Vec<f32>>,
    /// The episode was cut by a time limit rather than reaching a terminal state
    pub truncated: bool,
    /// Return and length of the finished episode (set on `done`)
    pub episode: Option<EpisodeStats>,
}

/// Result of [`Environment::step`]
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub observation: Vec<f32>,
    pub reward: f32,
    pub done: bool,
    pub info: StepInfo,
}

/// A single-agent environment with flat continuous observations
pub trait Environment {
    /// Length of every observation vector
    fn observation_dim(&self) -> usize;

    fn action_space(&self) -> ActionSpace;

    /// Start a new episode and return its first observation
    fn reset(&mut self) -> Vec<f32>;

    /// Apply an action
    ///
    /// Raw environments only fill `info.truncated`; [`EpisodeMonitor`] adds the
    /// terminal observation and the episode statistics.
    fn step(&mut self, action: &[f32]) -> Step;
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn observation_dim(&self) -> usize {
        (**self).observation_dim()
    }

    fn action_space(&self) -> ActionSpace {
        (**self).action_space()
    }

    fn reset(&mut self) -> Vec<f32> {
        (**self).reset()
    }

    fn step(&mut self, action: &[f32]) -> Step {
        (**self).step(action)
    }
}

/// Records episode statistics and resets the wrapped environment when an
/// episode ends.
///
/// On `done` the returned observation is already the first observation of the
/// next episode; the observation the episode ended in is moved to
/// `info.terminal_observation`.
#[derive(Debug, Clone)]
pub struct EpisodeMonitor<E> {
    inner: E,
    episode_return: f32,
    length: usize,
}

impl<E: Environment> EpisodeMonitor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            episode_return: 0.0,
            length: 0,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Environment> Environment for EpisodeMonitor<E> {
    fn observation_dim(&self) -> usize {
        self.inner.observation_dim()
    }

    fn action_space(&self) -> ActionSpace {
        self.inner.action_space()
    }

    fn reset(&mut self) -> Vec<f32> {
        self.episode_return = 0.0;
        self.length = 0;
        self.inner.reset()
    }

    fn step(&mut self, action: &[f32]) -> Step {
        let mut step = self.inner.step(action);
        self.episode_return += step.reward;
        self.length += 1;

        if step.done {
            step.info.episode = Some(EpisodeStats {
                episode_return: self.episode_return,
                length: self.length,
            });
            let first = self.reset();
            step.info.terminal_observation = Some(std::mem::replace(&mut step.observation, first));
        }

        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    /// Counts steps; ends after `len` steps with observation `[len]`.
    struct Counter {
        t: usize,
        len: usize,
    }

    impl Environment for Counter {
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
            Step {
                observation: vec![self.t as f32],
                reward: 1.0,
                done: self.t >= self.len,
                info: StepInfo::default(),
            }
        }
    }

    #[test]
    fn monitor_moves_terminal_observation_to_info() {
        let mut env = EpisodeMonitor::new(Counter { t: 0, len: 3 });
        env.reset();

        assert!(!env.step(&[0.0]).done);
        assert!(!env.step(&[0.0]).done);
        let last = env.step(&[0.0]);

        assert!(last.done);
        assert_eq!(last.observation, vec![0.0], "observation should come from the reset");
        assert_eq!(last.info.terminal_observation, Some(vec![3.0]));
        assert_eq!(
            last.info.episode,
            Some(EpisodeStats {
                episode_return: 3.0,
                length: 3
            })
        );

        // Counters restart with the new episode
        let next = env.step(&[0.0]);
        assert!(next.info.episode.is_none());
        assert_eq!(next.observation, vec![1.0]);
    }

    #[test]
    fn discrete_space_is_rejected() {
        let err = ActionSpace::Discrete(4).bounds().unwrap_err();
        assert!(matches!(err, Error::UnsupportedActionSpace(_)));
    }

    #[test]
    fn malformed_bounds_are_rejected() {
        assert!(ActionBounds::new(vec![1.0], vec![1.0]).is_err());
        assert!(ActionBounds::new(vec![0.0, 0.0], vec![1.0]).is_err());
        assert!(ActionBounds::new(vec![f32::NEG_INFINITY], vec![1.0]).is_err());
        assert!(ActionBounds::new(vec![], vec![]).is_err());
    }

    #[test]
    fn bounds_sample_and_clip() {
        let bounds = ActionBounds::new(vec![-2.0, 0.0], vec![2.0, 1.0]).unwrap();
        assert_eq!(bounds.scale(), vec![2.0, 0.5]);
        assert_eq!(bounds.bias(), vec![0.0, 0.5]);

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let a = bounds.sample(&mut rng);
            assert!(a[0] >= -2.0 && a[0] < 2.0);
            assert!(a[1] >= 0.0 && a[1] < 1.0);
        }

        let mut a = vec![5.0, -3.0];
        bounds.clip(&mut a);
        assert_eq!(a, vec![2.0, 0.0]);
    }
}
