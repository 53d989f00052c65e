//! Neural network building blocks for the actor and the critic

pub mod critic;
pub mod mlp;

pub use critic::MLPCritic;
pub use mlp::{MLPConfig, MLP};

/// Name and shape of one parameter tensor
///
/// Networks list their parameters as an ordered `Vec<ParamSlot>`; parallel
/// collections (gradients, momentum) are matched to parameters by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSlot {
    pub name: String,
    pub shape: Vec<usize>,
}

impl ParamSlot {
    pub fn new(name: String, shape: Vec<usize>) -> Self {
        Self { name, shape }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}
