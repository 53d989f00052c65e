//! Per-sample gradients of the critic's Bellman residual
//!
//! For every transition `i` of a batch this computes, separately, the gradient
//! w.r.t. each critic parameter of
//!
//! `δ_i = r_i + (1 − done_i)·γ·Q_target(s'_i, μ_target(s'_i)) − Q(s_i, a_i)`
//!
//! The bootstrap term comes from frozen target networks, so by default
//! `∇δ_i = −∇Q(s_i, a_i)`. In residual-gradient mode the bootstrap value is
//! taken from the critic itself and its gradient is kept:
//! `∇δ_i = γ(1 − done_i)·∇Q(s'_i, μ_target(s'_i)) − ∇Q(s_i, a_i)`.
//!
//! Everything here runs on a detached snapshot of the critic (no autodiff
//! graph), so it never touches the optimizer's state.

use burn::{prelude::*, tensor::backend::Backend};

use crate::{
    error::{Error, Result},
    nn::{MLPCritic, ParamSlot},
};

/// Inputs of the per-sample computation, all `[N, _]`
#[derive(Debug, Clone)]
pub struct BellmanBatch<B: Backend> {
    pub observations: Tensor<B, 2>,
    pub actions: Tensor<B, 2>,
    pub next_observations: Tensor<B, 2>,
    /// Target-actor actions for `next_observations`
    pub next_actions: Tensor<B, 2>,
    /// `1 − done`, `[N, 1]`
    pub not_done: Tensor<B, 2>,
}

/// Per-sample gradients, one `[N, numel]` tensor per critic parameter slot
///
/// Row `i` of the tensor for slot `k` is the flattened gradient of `δ_i`
/// w.r.t. that parameter, i.e. a `[N, *shape(slot)]` tensor stored row-major.
#[derive(Debug, Clone)]
pub struct PerSampleGrads<B: Backend> {
    slots: Vec<ParamSlot>,
    grads: Vec<Tensor<B, 2>>,
    batch_size: usize,
}

impl<B: Backend> PerSampleGrads<B> {
    /// Assemble from precomputed per-slot gradients
    pub fn new(slots: Vec<ParamSlot>, grads: Vec<Tensor<B, 2>>) -> Result<Self> {
        if slots.len() != grads.len() {
            return Err(Error::DimensionMismatch {
                what: "per-sample gradient slots",
                expected: slots.len(),
                actual: grads.len(),
            });
        }
        let batch_size = grads.first().map(|g| g.dims()[0]).unwrap_or(0);
        if batch_size == 0 {
            return Err(Error::EmptyBatch);
        }
        for (slot, grad) in slots.iter().zip(grads.iter()) {
            let [rows, numel] = grad.dims();
            if rows != batch_size || numel != slot.numel() {
                return Err(Error::ShapeMismatch {
                    name: slot.name.clone(),
                    expected: vec![batch_size, slot.numel()],
                    actual: vec![rows, numel],
                });
            }
        }

        Ok(Self {
            slots,
            grads,
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    pub fn grads(&self) -> &[Tensor<B, 2>] {
        &self.grads
    }

    /// Full shape of one slot's gradients, `[N, *shape(slot)]`
    pub fn shape_of(&self, index: usize) -> Option<Vec<usize>> {
        self.slots.get(index).map(|slot| {
            let mut shape = Vec::with_capacity(slot.shape.len() + 1);
            shape.push(self.batch_size);
            shape.extend_from_slice(&slot.shape);
            shape
        })
    }

    /// Clamp every entry to `[-bound, bound]`
    pub fn clipped(self, bound: Option<f32>) -> Self {
        match bound {
            None => self,
            Some(c) => Self {
                grads: self.grads.into_iter().map(|g| g.clamp(-c, c)).collect(),
                ..self
            },
        }
    }
}

/// Per-sample gradients of the Bellman residual w.r.t. every critic parameter
///
/// `critic` must be a detached snapshot; `residual_gradient` selects whether
/// the bootstrap term is differentiated through the critic.
pub fn bellman_residual_grads<B: Backend>(
    critic: &MLPCritic<B>,
    batch: &BellmanBatch<B>,
    gamma: f32,
    residual_gradient: bool,
) -> Result<PerSampleGrads<B>> {
    let [n, _] = batch.observations.dims();
    if n == 0 {
        return Err(Error::EmptyBatch);
    }
    let device = batch.observations.device();

    // δ_i depends on Q(s_i, a_i) with coefficient −1
    let seed = Tensor::<B, 2>::ones([n, 1], &device).neg();
    let mut grads = critic.per_sample_grads(&batch.observations, &batch.actions, seed);

    if residual_gradient {
        let seed = batch.not_done.clone().mul_scalar(gamma);
        let bootstrap = critic.per_sample_grads(&batch.next_observations, &batch.next_actions, seed);
        grads = grads
            .into_iter()
            .zip(bootstrap)
            .map(|(g, b)| g.add(b))
            .collect();
    }

    PerSampleGrads::new(critic.param_slots(), grads)
}
