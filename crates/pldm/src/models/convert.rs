//! Conversions between `ndarray` buffers and tensors.

use crate::{PldmError, Result};
use ndarray::{Array2, Array3};
use tch::{Device, Kind, Tensor};

pub fn array2_to_tensor(array: &Array2<f32>, device: Device) -> Result<Tensor> {
    let (rows, cols) = array.dim();
    let data = array.as_standard_layout();
    let slice = data
        .as_slice()
        .ok_or_else(|| PldmError::EnvError("array is not contiguous".into()))?;
    Ok(Tensor::from_slice(slice)
        .reshape([rows as i64, cols as i64])
        .to_device(device))
}

pub fn array3_to_tensor(array: &Array3<f32>, device: Device) -> Result<Tensor> {
    let (a, b, c) = array.dim();
    let data = array.as_standard_layout();
    let slice = data
        .as_slice()
        .ok_or_else(|| PldmError::EnvError("array is not contiguous".into()))?;
    Ok(Tensor::from_slice(slice)
        .reshape([a as i64, b as i64, c as i64])
        .to_device(device))
}

/// Copy a tensor of shape [B, ...] to a CPU `Array2` of shape [B, prod(...)].
pub fn tensor_to_array2(tensor: &Tensor) -> Result<Array2<f32>> {
    let rows = tensor.size().first().copied().unwrap_or(0);
    let flat = tensor
        .detach()
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .reshape([rows, -1]);
    let cols = flat.size()[1];
    let data = Vec::<f32>::try_from(flat.flatten(0, -1))?;
    let len = data.len();
    Array2::from_shape_vec((rows as usize, cols as usize), data).map_err(|_| {
        PldmError::ShapeMismatch {
            expected: vec![rows as usize, cols as usize],
            actual: vec![len],
        }
    })
}
