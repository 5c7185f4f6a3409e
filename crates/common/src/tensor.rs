//! Tensor containers exchanged between preprocessing, backends and postprocessing

use std::collections::HashMap;
use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};

/// Dense `f32` tensor of arbitrary rank
pub type Tensor = ArrayD<f32>;

/// Named tensor slots, keyed by input or output name
pub type TensorMap = HashMap<String, Tensor>;

/// Formats a shape as `[1,3,224,224]`
pub fn describe_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(","))
}

/// Builds a tensor from a flat buffer, checking the element count
pub fn tensor_from_vec(shape: &[usize], data: Vec<f32>) -> Result<Tensor> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        return Err(Error::InvalidArgument(format!(
            "Shape {} needs {} elements, got {}",
            describe_shape(shape),
            expected,
            data.len()
        )));
    }
    ArrayD::from_shape_vec(IxDyn(shape), data)
        .map_err(|e| Error::InvalidArgument(format!("Cannot build tensor {}: {}", describe_shape(shape), e)))
}

/// Looks up a tensor by name, failing with a postprocess error when absent
pub fn require_output<'a>(outputs: &'a TensorMap, name: &str) -> Result<&'a Tensor> {
    outputs
        .get(name)
        .ok_or_else(|| Error::Postprocess(format!("Output '{}' missing from inference result", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_shape() {
        assert_eq!(describe_shape(&[1, 3, 224, 224]), "[1,3,224,224]");
        assert_eq!(describe_shape(&[]), "[]");
    }

    #[test]
    fn test_tensor_from_vec() {
        let tensor = tensor_from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(tensor[[1, 0]], 3.0);
        assert!(tensor_from_vec(&[2, 2], vec![1.0]).is_err());
    }

    #[test]
    fn test_require_output() {
        let mut outputs = TensorMap::new();
        outputs.insert("prob".to_string(), Tensor::zeros(IxDyn(&[1, 4])));
        assert!(require_output(&outputs, "prob").is_ok());
        assert!(require_output(&outputs, "boxes").unwrap_err().is_postprocess());
    }
}
