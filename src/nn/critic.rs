use burn::{
    module::Module,
    optim::GradientsParams,
    prelude::*,
    tensor::backend::{AutodiffBackend, Backend},
};

use super::{MLPConfig, ParamSlot, MLP};

/// MLP used as a Q-function
///
/// Concatenates state and action, then passes through a single MLP to get the
/// Q-value `[batch, 1]`.
#[derive(Module, Debug)]
pub struct MLPCritic<B: Backend> {
    mlp: MLP<B>,
}

impl<B: Backend> MLPCritic<B> {
    /// Create a new MLP-based critic
    ///
    /// # Arguments
    /// - `state_dim` - Dimension of state
    /// - `action_dim` - Dimension of action
    /// - `hidden_layers` - Hidden layer sizes (e.g., [256, 256])
    /// - `device` - Device to create the network on
    pub fn new(state_dim: usize, action_dim: usize, hidden_layers: Vec<usize>, device: &B::Device) -> Self {
        let mlp = MLPConfig::new(state_dim + action_dim, hidden_layers, 1).init(device);
        Self { mlp }
    }

    pub fn forward(&self, state: &Tensor<B, 2>, action: &Tensor<B, 2>) -> Tensor<B, 2> {
        self.mlp.forward(Self::join(state, action))
    }

    /// Per-sample gradients of `seed_i · Q(s_i, a_i)`, one `[batch, numel]` tensor per slot
    pub fn per_sample_grads(
        &self,
        state: &Tensor<B, 2>,
        action: &Tensor<B, 2>,
        seed: Tensor<B, 2>,
    ) -> Vec<Tensor<B, 2>> {
        self.mlp.per_sample_grads(Self::join(state, action), seed)
    }

    pub fn param_slots(&self) -> Vec<ParamSlot> {
        self.mlp.param_slots("mlp.")
    }

    pub fn flat_params(&self) -> Vec<Tensor<B, 1>> {
        self.mlp.flat_params()
    }

    pub fn l1_mean(&self) -> f32 {
        self.mlp.l1_mean()
    }

    pub fn soft_update(&mut self, other: &Self, tau: f32) {
        self.mlp.soft_update(&other.mlp, tau)
    }

    fn join(state: &Tensor<B, 2>, action: &Tensor<B, 2>) -> Tensor<B, 2> {
        Tensor::cat(vec![state.clone(), action.clone()], 1)
    }
}

impl<B: AutodiffBackend> MLPCritic<B> {
    pub fn flat_grads(&self, grads: &GradientsParams) -> Vec<Tensor<B::InnerBackend, 1>> {
        self.mlp.flat_grads(grads)
    }

    /// Optimizer-ready gradients from flattened per-slot tensors
    pub fn grads_from_flat(&self, flat: &[Tensor<B::InnerBackend, 1>]) -> GradientsParams {
        let mut grads = GradientsParams::new();
        self.mlp.register_grads(flat, &mut grads);
        grads
    }
}
