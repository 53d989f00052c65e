use burn::{
    prelude::*,
    tensor::{backend::Backend, BasicOps, TensorData},
};

use crate::error::{Error, Result};

/// A trait for converting items to tensors
///
/// Implemented for [`Rows`], the row-major views the replay buffer and the
/// agent hand to the networks.
pub trait ToTensor<B: Backend, const D: usize, K: BasicOps<B>> {
    fn to_tensor(self, device: &B::Device) -> Tensor<B, D, K>;
}

/// Row-major view over a flat `f32` buffer holding rows of `width` values
#[derive(Debug, Clone, Copy)]
pub struct Rows<'a> {
    data: &'a [f32],
    width: usize,
}

impl<'a> Rows<'a> {
    pub fn new(data: &'a [f32], width: usize) -> Self {
        debug_assert!(width > 0 && data.len() % width == 0);
        Self { data, width }
    }

    /// A single row
    pub fn single(data: &'a [f32]) -> Self {
        Self::new(data, data.len())
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.width
    }
}

impl<B: Backend> ToTensor<B, 2, Float> for Rows<'_> {
    #[inline]
    fn to_tensor(self, device: &B::Device) -> Tensor<B, 2> {
        let data = TensorData::new(self.data.to_vec(), [self.rows(), self.width]);
        Tensor::<B, 2>::from_data(data.convert::<B::FloatElem>(), device)
    }
}

/// Copy a float tensor back to the host as a flat row-major `Vec<f32>`
pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::TensorData(format!("{err:?}")))
}
