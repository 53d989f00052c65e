pub mod to_tensor;

pub use to_tensor::{to_vec, Rows, ToTensor};
