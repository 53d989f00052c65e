//! DDPG for continuous control whose critic is trained along a
//! curvature-weighted momentum direction instead of its batch gradient.
//!
//! The pieces, bottom-up:
//! - [`nn`]: the MLP actor and critic, with per-sample Jacobians
//! - [`memory`]: the replay buffer
//! - [`algo`]: per-sample gradients, momentum, and the agent
//! - [`trainer`]: the warmup/learning loop over an [`env::Environment`]
//! - [`metrics`]: where scalars go

pub mod algo;
pub mod env;
pub mod error;
pub mod gym;
pub mod memory;
pub mod metrics;
pub mod nn;
pub mod trainer;
pub mod traits;

pub use error::{Error, Result};
