//! Experience replay
//!
//! A fixed-capacity ring buffer of transitions stored in flat, row-major
//! `f32` arrays. Once full, the oldest transition is overwritten first.

use burn::prelude::*;
use rand::Rng;

use crate::{
    env::StepInfo,
    error::{Error, Result},
    traits::{Rows, ToTensor},
};

/// Fixed-capacity FIFO store of transitions
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    capacity: usize,
    obs_dim: usize,
    act_dim: usize,
    handle_timeout_termination: bool,

    observations: Vec<f32>,
    next_observations: Vec<f32>,
    actions: Vec<f32>,
    rewards: Vec<f32>,
    dones: Vec<f32>,

    ptr: usize,
    len: usize,
}

impl ReplayBuffer {
    /// Create an empty buffer
    ///
    /// With `handle_timeout_termination`, transitions whose episode was cut by a
    /// time limit (`info.truncated`) are stored as not done so that their value
    /// keeps being bootstrapped.
    pub fn new(
        capacity: usize,
        obs_dim: usize,
        act_dim: usize,
        handle_timeout_termination: bool,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig("replay buffer capacity must be positive".into()));
        }

        Ok(Self {
            capacity,
            obs_dim,
            act_dim,
            handle_timeout_termination,
            observations: vec![0.0; capacity * obs_dim],
            next_observations: vec![0.0; capacity * obs_dim],
            actions: vec![0.0; capacity * act_dim],
            rewards: vec![0.0; capacity],
            dones: vec![0.0; capacity],
            ptr: 0,
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store one transition
    ///
    /// `next_obs` must be the observation the transition actually led to, i.e.
    /// the terminal observation when `done` is set.
    pub fn add(
        &mut self,
        obs: &[f32],
        next_obs: &[f32],
        action: &[f32],
        reward: f32,
        done: bool,
        info: &StepInfo,
    ) -> Result<()> {
        check_len("observation", self.obs_dim, obs.len())?;
        check_len("next observation", self.obs_dim, next_obs.len())?;
        check_len("action", self.act_dim, action.len())?;

        let i = self.ptr;
        self.observations[i * self.obs_dim..(i + 1) * self.obs_dim].copy_from_slice(obs);
        self.next_observations[i * self.obs_dim..(i + 1) * self.obs_dim].copy_from_slice(next_obs);
        self.actions[i * self.act_dim..(i + 1) * self.act_dim].copy_from_slice(action);
        self.rewards[i] = reward;

        let terminal = done && !(self.handle_timeout_termination && info.truncated);
        self.dones[i] = if terminal { 1.0 } else { 0.0 };

        self.ptr = (self.ptr + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
        Ok(())
    }

    /// Draw `batch_size` transitions independently and uniformly (with replacement)
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<Batch> {
        if self.is_empty() {
            return Err(Error::EmptyReplay);
        }
        if batch_size == 0 {
            return Err(Error::EmptyBatch);
        }

        let mut batch = Batch::with_capacity(batch_size, self.obs_dim, self.act_dim);
        for _ in 0..batch_size {
            let i = rng.gen_range(0..self.len);
            self.push_row(i, &mut batch);
        }
        Ok(batch)
    }

    /// Transition at storage slot `index` as a batch of one
    pub fn get(&self, index: usize) -> Option<Batch> {
        if index >= self.len {
            return None;
        }
        let mut batch = Batch::with_capacity(1, self.obs_dim, self.act_dim);
        self.push_row(index, &mut batch);
        Some(batch)
    }

    fn push_row(&self, i: usize, batch: &mut Batch) {
        batch
            .observations
            .extend_from_slice(&self.observations[i * self.obs_dim..(i + 1) * self.obs_dim]);
        batch
            .next_observations
            .extend_from_slice(&self.next_observations[i * self.obs_dim..(i + 1) * self.obs_dim]);
        batch
            .actions
            .extend_from_slice(&self.actions[i * self.act_dim..(i + 1) * self.act_dim]);
        batch.rewards.push(self.rewards[i]);
        batch.dones.push(self.dones[i]);
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// A sampled set of transitions in row-major layout
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub obs_dim: usize,
    pub act_dim: usize,
    pub observations: Vec<f32>,
    pub next_observations: Vec<f32>,
    pub actions: Vec<f32>,
    pub rewards: Vec<f32>,
    /// 1.0 for terminal transitions, 0.0 otherwise
    pub dones: Vec<f32>,
}

impl Batch {
    fn with_capacity(n: usize, obs_dim: usize, act_dim: usize) -> Self {
        Self {
            obs_dim,
            act_dim,
            observations: Vec::with_capacity(n * obs_dim),
            next_observations: Vec::with_capacity(n * obs_dim),
            actions: Vec::with_capacity(n * act_dim),
            rewards: Vec::with_capacity(n),
            dones: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    pub fn next_observation(&self, i: usize) -> &[f32] {
        &self.next_observations[i * self.obs_dim..(i + 1) * self.obs_dim]
    }

    /// Move the batch to `device` as `[N, _]` tensors
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> BatchTensors<B> {
        BatchTensors {
            observations: Rows::new(&self.observations, self.obs_dim).to_tensor(device),
            actions: Rows::new(&self.actions, self.act_dim).to_tensor(device),
            rewards: Rows::new(&self.rewards, 1).to_tensor(device),
            next_observations: Rows::new(&self.next_observations, self.obs_dim).to_tensor(device),
            dones: Rows::new(&self.dones, 1).to_tensor(device),
        }
    }
}

/// Tensor view of a [`Batch`]; rewards and dones are `[N, 1]`
#[derive(Debug, Clone)]
pub struct BatchTensors<B: Backend> {
    pub observations: Tensor<B, 2>,
    pub actions: Tensor<B, 2>,
    pub rewards: Tensor<B, 2>,
    pub next_observations: Tensor<B, 2>,
    pub dones: Tensor<B, 2>,
}
