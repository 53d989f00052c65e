/// Multi-Layer Perceptron (MLP) - Generic feedforward neural network
///
/// This module provides the MLP used for both the actor and the critic, plus
/// the parameter bookkeeping the critic's momentum update needs: a fixed
/// ordering of parameter slots, flattened gradient extraction, and a batched
/// per-sample Jacobian of the network output.

use burn::{
    module::{Module, Param, ParamId},
    nn::{Linear, LinearConfig},
    optim::GradientsParams,
    prelude::*,
    tensor::{
        activation::relu,
        backend::{AutodiffBackend, Backend},
    },
};

use super::ParamSlot;

/// Configuration for Multi-Layer Perceptron
#[derive(Config, Debug)]
pub struct MLPConfig {
    /// Input dimension
    pub input_dim: usize,
    /// Hidden layer dimensions (e.g., [256, 256] for two hidden layers of 256 units each)
    pub hidden_layers: Vec<usize>,
    /// Output dimension
    pub output_dim: usize,
}

/// Multi-Layer Perceptron implementation
///
/// Hidden layers use ReLU activation, the output layer is linear
/// (or tanh through [`MLP::forward_tanh`]).
#[derive(Module, Debug)]
pub struct MLP<B: Backend> {
    layers: Vec<Linear<B>>,
}

impl MLPConfig {
    /// Initialize the MLP with the given configuration
    pub fn init<B: Backend>(&self, device: &B::Device) -> MLP<B> {
        let mut dims = Vec::with_capacity(self.hidden_layers.len() + 2);
        dims.push(self.input_dim);
        dims.extend_from_slice(&self.hidden_layers);
        dims.push(self.output_dim);

        let layers = dims
            .windows(2)
            .map(|pair| LinearConfig::new(pair[0], pair[1]).init(device))
            .collect();

        MLP { layers }
    }
}

impl<B: Backend> MLP<B> {
    /// Forward pass on a batch `[batch, features]`
    ///
    /// Applies ReLU activation to all hidden layers, no activation on output layer.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len() - 1;
        let mut x = input;

        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = relu(x);
            }
        }

        x
    }

    /// Forward pass with tanh output activation
    ///
    /// Used by the actor: outputs are bounded in [-1, 1].
    pub fn forward_tanh(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward(input).tanh()
    }

    /// Soft update: θ′ ← τθ + (1 − τ)θ′
    ///
    /// Updates `self` (target) toward `other` (live network) by factor `tau`.
    pub fn soft_update(&mut self, other: &Self, tau: f32) {
        for (target_layer, live_layer) in self.layers.iter_mut().zip(other.layers.iter()) {
            soft_update_linear_inplace(target_layer, live_layer, tau);
        }
    }

    /// Parameter slots in their canonical order: per layer, weight then bias
    ///
    /// Every other per-parameter collection of this network (gradients,
    /// momentum, per-sample Jacobians) is indexed by position in this list.
    pub fn param_slots(&self, prefix: &str) -> Vec<ParamSlot> {
        let mut slots = Vec::with_capacity(self.layers.len() * 2);
        for (i, layer) in self.layers.iter().enumerate() {
            slots.push(ParamSlot::new(
                format!("{prefix}layers.{i}.weight"),
                layer.weight.val().dims().to_vec(),
            ));
            if let Some(bias) = &layer.bias {
                slots.push(ParamSlot::new(
                    format!("{prefix}layers.{i}.bias"),
                    bias.val().dims().to_vec(),
                ));
            }
        }
        slots
    }

    /// Parameter ids in slot order
    pub fn param_ids(&self) -> Vec<ParamId> {
        let mut ids = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            ids.push(layer.weight.id.clone());
            if let Some(bias) = &layer.bias {
                ids.push(bias.id.clone());
            }
        }
        ids
    }

    /// Parameter values flattened, in slot order
    pub fn flat_params(&self) -> Vec<Tensor<B, 1>> {
        let mut flat = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            let weight = layer.weight.val();
            let [d_in, d_out] = weight.dims();
            flat.push(weight.reshape([d_in * d_out]));
            if let Some(bias) = &layer.bias {
                flat.push(bias.val());
            }
        }
        flat
    }

    /// Mean absolute parameter value
    pub fn l1_mean(&self) -> f32 {
        l1_mean(&self.flat_params())
    }

    /// Per-sample gradients of the scalar output, one `[batch, numel]` tensor per slot
    ///
    /// `seed` is `[batch, output_dim]` and holds ∂L_i/∂y_i for every sample, so
    /// the result for sample `i` is the gradient of `⟨seed_i, y_i⟩` alone. The
    /// Jacobian is exact for this architecture: one forward pass keeping every
    /// layer input and pre-activation, then one backward pass over the whole
    /// batch where each weight gradient is the per-sample outer product
    /// `h_i ⊗ δ_i`.
    pub fn per_sample_grads(&self, input: Tensor<B, 2>, seed: Tensor<B, 2>) -> Vec<Tensor<B, 2>> {
        let [batch, _] = input.dims();
        let last = self.layers.len() - 1;

        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(x.clone());
            inputs.push(x);
            x = if i < last { relu(z.clone()) } else { z.clone() };
            pre_activations.push(z);
        }

        let mut per_layer = Vec::with_capacity(self.layers.len());
        let mut delta = seed;
        for i in (0..self.layers.len()).rev() {
            let layer = &self.layers[i];
            let [_, d_in] = inputs[i].dims();
            let [_, d_out] = delta.dims();

            let weight_grad = inputs[i]
                .clone()
                .reshape([batch, d_in, 1])
                .matmul(delta.clone().reshape([batch, 1, d_out]))
                .reshape([batch, d_in * d_out]);
            let bias_grad = layer.bias.as_ref().map(|_| delta.clone());

            if i > 0 {
                let active = pre_activations[i - 1].clone().greater_elem(0.0).float();
                delta = delta.matmul(layer.weight.val().transpose()).mul(active);
            }

            per_layer.push((weight_grad, bias_grad));
        }

        per_layer
            .into_iter()
            .rev()
            .flat_map(|(weight, bias)| std::iter::once(weight).chain(bias))
            .collect()
    }
}

impl<B: AutodiffBackend> MLP<B> {
    /// Gradients of this network's parameters, flattened, in slot order
    ///
    /// Parameters that took no part in the loss get a zero gradient.
    pub fn flat_grads(&self, grads: &GradientsParams) -> Vec<Tensor<B::InnerBackend, 1>> {
        let mut flat = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            let weight = layer.weight.val();
            let [d_in, d_out] = weight.dims();
            let grad = grads
                .get::<B::InnerBackend, 2>(layer.weight.id.clone())
                .unwrap_or_else(|| Tensor::zeros([d_in, d_out], &weight.device()));
            flat.push(grad.reshape([d_in * d_out]));

            if let Some(bias) = &layer.bias {
                let value = bias.val();
                let grad = grads
                    .get::<B::InnerBackend, 1>(bias.id.clone())
                    .unwrap_or_else(|| Tensor::zeros(value.dims(), &value.device()));
                flat.push(grad);
            }
        }
        flat
    }

    /// Register flattened per-slot gradients for an optimizer step
    pub fn register_grads(&self, flat: &[Tensor<B::InnerBackend, 1>], grads: &mut GradientsParams) {
        let mut slot = flat.iter();
        for layer in &self.layers {
            if let Some(grad) = slot.next() {
                let [d_in, d_out] = layer.weight.val().dims();
                grads.register::<B::InnerBackend, 2>(
                    layer.weight.id.clone(),
                    grad.clone().reshape([d_in, d_out]),
                );
            }
            if let Some(bias) = &layer.bias {
                if let Some(grad) = slot.next() {
                    grads.register::<B::InnerBackend, 1>(bias.id.clone(), grad.clone());
                }
            }
        }
    }
}

/// Mean absolute value over a set of flattened tensors
pub fn l1_mean<B: Backend>(tensors: &[Tensor<B, 1>]) -> f32 {
    let mut total = 0.0_f32;
    let mut count = 0usize;
    for tensor in tensors {
        count += tensor.dims()[0];
        total += tensor.clone().abs().sum().into_scalar().elem::<f32>();
    }
    if count == 0 {
        0.0
    } else {
        total / count as f32
    }
}

// Helper functions for soft updates
fn soft_update_tensor_inplace<B: Backend, const D: usize>(
    this: &mut Param<Tensor<B, D>>,
    that: &Param<Tensor<B, D>>,
    tau: f32,
) {
    // Both sides detached, or every update chains onto the target's history
    *this = this
        .clone()
        .map(|tensor| tensor.detach() * (1.0 - tau) + that.val().detach() * tau);
}

fn soft_update_linear_inplace<B: Backend>(this: &mut Linear<B>, that: &Linear<B>, tau: f32) {
    soft_update_tensor_inplace(&mut this.weight, &that.weight, tau);

    if let (Some(b1), Some(b2)) = (&mut this.bias, &that.bias) {
        soft_update_tensor_inplace(b1, b2, tau);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{
            ndarray::{NdArray, NdArrayDevice},
            Autodiff,
        },
        module::AutodiffModule,
    };

    type AD = Autodiff<NdArray>;

    fn device() -> NdArrayDevice {
        NdArrayDevice::default()
    }

    fn constant_mlp(config: &MLPConfig, value: f32) -> MLP<NdArray> {
        let mut mlp = config.init::<NdArray>(&device());
        for layer in mlp.layers.iter_mut() {
            layer.weight = layer.weight.clone().map(|t| t.zeros_like().add_scalar(value));
            if let Some(bias) = layer.bias.take() {
                layer.bias = Some(bias.map(|t| t.zeros_like().add_scalar(value)));
            }
        }
        mlp
    }

    #[test]
    fn test_mlp_forward_2d() {
        // 4 → [64, 64] → 2
        let config = MLPConfig::new(4, vec![64, 64], 2);
        let mlp = config.init::<NdArray>(&device());

        let input = Tensor::<NdArray, 2>::random(
            [8, 4],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device(),
        );

        let output = mlp.forward(input);

        assert_eq!(output.shape().dims, [8, 2]);
    }

    #[test]
    fn test_mlp_no_hidden_layers() {
        let config = MLPConfig::new(4, vec![], 2);
        let mlp = config.init::<NdArray>(&device());

        let input = Tensor::<NdArray, 2>::random([1, 4], burn::tensor::Distribution::Default, &device());
        let output = mlp.forward(input);

        assert_eq!(output.shape().dims, [1, 2]);
        assert_eq!(mlp.param_slots("").len(), 2);
    }

    #[test]
    fn test_mlp_forward_tanh_saturates_within_bounds() {
        let config = MLPConfig::new(3, vec![16], 2);
        let mlp = config.init::<NdArray>(&device());

        let input = Tensor::<NdArray, 2>::from_floats(
            [[1e6, -1e6, 1e6], [-1e6, 1e6, -1e6], [0.0, 0.0, 0.0]],
            &device(),
        );
        let output = mlp.forward_tanh(input);

        assert_eq!(output.shape().dims, [3, 2]);
        for value in output.to_data().to_vec::<f32>().unwrap() {
            assert!((-1.0..=1.0).contains(&value), "tanh output out of range: {value}");
        }
    }

    #[test]
    fn test_param_slots_order_and_shapes() {
        let mlp = MLPConfig::new(3, vec![5], 1).init::<NdArray>(&device());
        let slots = mlp.param_slots("mlp.");

        let names: Vec<_> = slots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            ["mlp.layers.0.weight", "mlp.layers.0.bias", "mlp.layers.1.weight", "mlp.layers.1.bias"]
        );
        assert_eq!(slots[0].shape, vec![3, 5]);
        assert_eq!(slots[1].shape, vec![5]);
        assert_eq!(slots[2].shape, vec![5, 1]);
        assert_eq!(slots[3].shape, vec![1]);

        let flat = mlp.flat_params();
        for (slot, tensor) in slots.iter().zip(flat.iter()) {
            assert_eq!(slot.numel(), tensor.dims()[0]);
        }
        assert_eq!(mlp.param_ids().len(), slots.len());
    }

    #[test]
    fn test_soft_update() {
        let config = MLPConfig::new(2, vec![3], 1);
        let live = constant_mlp(&config, 5.0);
        let mut target = constant_mlp(&config, 0.0);

        target.soft_update(&live, 0.005);

        for tensor in target.flat_params() {
            for value in tensor.to_data().to_vec::<f32>().unwrap() {
                assert!((value - 0.025).abs() < 1e-7, "expected 0.025, got {value}");
            }
        }
        // The live network is untouched
        for tensor in live.flat_params() {
            for value in tensor.to_data().to_vec::<f32>().unwrap() {
                assert_eq!(value, 5.0);
            }
        }
    }

    #[test]
    fn test_soft_update_cuts_target_history() {
        let config = MLPConfig::new(3, vec![8], 1);
        let live = config.init::<AD>(&device());
        let mut target = live.clone();
        let initial = target.clone();

        for _ in 0..5 {
            target.soft_update(&live, 0.5);
        }

        // The target output must not reach back to any earlier parameter tensor
        let input = Tensor::<AD, 2>::ones([2, 3], &device());
        let grads = target.forward(input).sum().backward();
        for layer in initial.layers.iter() {
            assert!(layer.weight.val().grad(&grads).is_none());
            if let Some(bias) = &layer.bias {
                assert!(bias.val().grad(&grads).is_none());
            }
        }
    }

    #[test]
    fn test_per_sample_grads_match_autodiff() {
        let config = MLPConfig::new(3, vec![8, 6], 1);
        let mlp = config.init::<AD>(&device());
        let inner = mlp.valid();

        let input = Tensor::<NdArray, 2>::random(
            [4, 3],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device(),
        );
        let seed = Tensor::<NdArray, 2>::from_floats([[1.0], [-2.0], [0.5], [3.0]], &device());

        let per_sample = inner.per_sample_grads(input.clone(), seed.clone());
        assert_eq!(per_sample.len(), inner.param_slots("").len());

        let inputs = input.to_data().to_vec::<f32>().unwrap();
        let seeds = seed.to_data().to_vec::<f32>().unwrap();
        for i in 0..4 {
            let x = Tensor::<AD, 2>::from_data(TensorData::new(inputs[i * 3..(i + 1) * 3].to_vec(), [1, 3]), &device());
            let loss = mlp.forward(x).mul_scalar(seeds[i]).sum();
            let grads = GradientsParams::from_grads(loss.backward(), &mlp);
            let expected = mlp.flat_grads(&grads);

            for (slot, (batched, single)) in per_sample.iter().zip(expected.iter()).enumerate() {
                let [_, numel] = batched.dims();
                let row = batched.clone().slice([i..i + 1, 0..numel]).reshape([numel]);
                let row = row.to_data().to_vec::<f32>().unwrap();
                let single = single.to_data().to_vec::<f32>().unwrap();
                for (a, b) in row.iter().zip(single.iter()) {
                    assert!((a - b).abs() < 1e-4, "sample {i} slot {slot}: {a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn test_register_grads_round_trip() {
        let mlp = MLPConfig::new(2, vec![4], 1).init::<AD>(&device());
        let flat: Vec<Tensor<NdArray, 1>> = mlp
            .param_slots("")
            .iter()
            .map(|slot| Tensor::ones([slot.numel()], &device()))
            .collect();

        let mut grads = GradientsParams::new();
        mlp.register_grads(&flat, &mut grads);
        let back = mlp.flat_grads(&grads);

        for tensor in back {
            for value in tensor.to_data().to_vec::<f32>().unwrap() {
                assert_eq!(value, 1.0);
            }
        }
    }
}
