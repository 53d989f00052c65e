//! Critic momentum `M` and the curvature-weighted gradient `R`
//!
//! `M` is a leaky EMA of the ordinary critic gradient. Projected onto every
//! sample's Bellman-residual gradient it gives one scalar per sample,
//! `c_i = Σ_k ⟨M_k, G_k,i⟩`, and the critic is then moved along
//! `R_k = mean_i(c_i · G_k,i)`.

use burn::{
    prelude::*,
    tensor::{backend::Backend, TensorData},
};

use super::per_sample::PerSampleGrads;
use crate::{
    error::{Error, Result},
    nn::{mlp::l1_mean, ParamSlot},
    traits::to_vec,
};

/// Weight of the previous momentum in the EMA
pub const MOMENTUM_DECAY: f32 = 0.999;
/// Weight of the new gradient in the EMA
pub const MOMENTUM_GAIN: f32 = 0.001;

/// Per-slot momentum of the critic, stored flattened in slot order
#[derive(Debug, Clone)]
pub struct Momentum<B: Backend> {
    slots: Vec<ParamSlot>,
    values: Vec<Tensor<B, 1>>,
}

impl<B: Backend> Momentum<B> {
    /// Zero momentum for the given parameter layout
    pub fn zeros(slots: Vec<ParamSlot>, device: &B::Device) -> Self {
        let values = slots
            .iter()
            .map(|slot| Tensor::zeros([slot.numel()], device))
            .collect();
        Self { slots, values }
    }

    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    pub fn values(&self) -> &[Tensor<B, 1>] {
        &self.values
    }

    /// Check that `slots` describes exactly the layout this momentum was built for
    pub fn check_slots(&self, slots: &[ParamSlot]) -> Result<()> {
        if slots.len() != self.slots.len() {
            return Err(Error::DimensionMismatch {
                what: "momentum slots",
                expected: self.slots.len(),
                actual: slots.len(),
            });
        }
        for ((own, other), value) in self.slots.iter().zip(slots).zip(&self.values) {
            if own.name != other.name || own.shape != other.shape {
                return Err(Error::ShapeMismatch {
                    name: other.name.clone(),
                    expected: own.shape.clone(),
                    actual: other.shape.clone(),
                });
            }
            let numel = value.dims()[0];
            if numel != own.numel() {
                return Err(Error::ShapeMismatch {
                    name: own.name.clone(),
                    expected: own.shape.clone(),
                    actual: vec![numel],
                });
            }
        }
        Ok(())
    }

    /// `M ← λ·M + β·g`
    pub fn accumulate(&mut self, grads: &[Tensor<B, 1>]) -> Result<()> {
        self.check_flat(grads, "ordinary gradient")?;
        for (value, grad) in self.values.iter_mut().zip(grads) {
            *value = value
                .clone()
                .mul_scalar(MOMENTUM_DECAY)
                .add(grad.clone().mul_scalar(MOMENTUM_GAIN));
        }
        Ok(())
    }

    /// Projection of `M` on every sample's gradient, `c` as `[N, 1]`
    pub fn projections(&self, per_sample: &PerSampleGrads<B>) -> Result<Tensor<B, 2>> {
        self.check_slots(per_sample.slots())?;

        let mut projection: Option<Tensor<B, 2>> = None;
        for (grad, value) in per_sample.grads().iter().zip(&self.values) {
            let numel = value.dims()[0];
            let term = grad.clone().matmul(value.clone().reshape([numel, 1]));
            projection = Some(match projection {
                Some(sum) => sum.add(term),
                None => term,
            });
        }
        projection.ok_or(Error::EmptyBatch)
    }

    /// Curvature-weighted gradient `R`, flattened in slot order
    pub fn reshape(&self, per_sample: &PerSampleGrads<B>) -> Result<Vec<Tensor<B, 1>>> {
        let weights = self.projections(per_sample)?.transpose();
        let n = per_sample.batch_size() as f32;

        Ok(per_sample
            .grads()
            .iter()
            .zip(&self.values)
            .map(|(grad, value)| {
                weights
                    .clone()
                    .matmul(grad.clone())
                    .div_scalar(n)
                    .reshape([value.dims()[0]])
            })
            .collect())
    }

    /// One RMSProp step on `M` itself, with `grads` as its gradient
    pub fn descend(&mut self, optimizer: &mut RmsProp<B>, grads: &[Tensor<B, 1>]) -> Result<()> {
        self.check_flat(grads, "momentum gradient")?;
        optimizer.step(&mut self.values, grads)
    }

    /// Value of one slot with its true shape
    pub fn to_data(&self, name: &str) -> Result<Option<TensorData>> {
        let Some(index) = self.slots.iter().position(|slot| slot.name == name) else {
            return Ok(None);
        };
        let values = to_vec(self.values[index].clone())?;
        Ok(Some(TensorData::new(values, self.slots[index].shape.clone())))
    }

    /// Mean absolute momentum
    pub fn l1_mean(&self) -> f32 {
        l1_mean(&self.values)
    }

    fn check_flat(&self, grads: &[Tensor<B, 1>], what: &'static str) -> Result<()> {
        if grads.len() != self.slots.len() {
            return Err(Error::DimensionMismatch {
                what,
                expected: self.slots.len(),
                actual: grads.len(),
            });
        }
        for (slot, grad) in self.slots.iter().zip(grads) {
            let numel = grad.dims()[0];
            if numel != slot.numel() {
                return Err(Error::ShapeMismatch {
                    name: slot.name.clone(),
                    expected: vec![slot.numel()],
                    actual: vec![numel],
                });
            }
        }
        Ok(())
    }
}

/// Plain RMSProp over flattened tensors
///
/// `v ← α·v + (1 − α)·g²`, `θ ← θ − lr·g / (√v + ε)`
#[derive(Debug, Clone)]
pub struct RmsProp<B: Backend> {
    lr: f32,
    alpha: f32,
    epsilon: f32,
    square_avg: Vec<Tensor<B, 1>>,
}

impl<B: Backend> RmsProp<B> {
    pub fn new(slots: &[ParamSlot], lr: f32, device: &B::Device) -> Self {
        Self {
            lr,
            alpha: 0.99,
            epsilon: 1e-8,
            square_avg: slots
                .iter()
                .map(|slot| Tensor::zeros([slot.numel()], device))
                .collect(),
        }
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }

    pub fn step(&mut self, params: &mut [Tensor<B, 1>], grads: &[Tensor<B, 1>]) -> Result<()> {
        if params.len() != self.square_avg.len() || grads.len() != self.square_avg.len() {
            return Err(Error::DimensionMismatch {
                what: "rmsprop state",
                expected: self.square_avg.len(),
                actual: params.len().min(grads.len()),
            });
        }

        for ((param, grad), avg) in params.iter_mut().zip(grads).zip(self.square_avg.iter_mut()) {
            *avg = avg
                .clone()
                .mul_scalar(self.alpha)
                .add(grad.clone().powf_scalar(2.0).mul_scalar(1.0 - self.alpha));
            let denom = avg.clone().sqrt().add_scalar(self.epsilon);
            *param = param
                .clone()
                .sub(grad.clone().div(denom).mul_scalar(self.lr));
        }
        Ok(())
    }
}
