/// Deep Deterministic Policy Gradient with a momentum-reshaped critic
pub mod ddpg;

/// Critic momentum and the curvature-weighted gradient
pub mod momentum;

/// Per-sample Bellman-residual gradients
pub mod per_sample;
