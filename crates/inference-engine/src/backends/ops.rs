//! Reference implementations of graph operations

use ndarray::{ArrayD, Axis, IxDyn};

use common::error::{Error, Result};
use common::tensor::describe_shape;
use common::Tensor;
use model_manager::GraphOp;

/// Output shape of `op` applied to a tensor of `shape`
pub(crate) fn infer_shape(op: &GraphOp, shape: &[usize]) -> Result<Vec<usize>> {
    match op {
        GraphOp::Identity | GraphOp::Sigmoid | GraphOp::Affine { .. } => Ok(shape.to_vec()),
        GraphOp::Softmax { axis } => {
            normalize_axis(*axis, shape.len())?;
            Ok(shape.to_vec())
        }
        GraphOp::Argmax { axis } => {
            let axis = normalize_axis(*axis, shape.len())?;
            let mut out = shape.to_vec();
            out.remove(axis);
            Ok(out)
        }
        GraphOp::Transpose { perm } => {
            check_permutation(perm, shape.len())?;
            Ok(perm.iter().map(|&a| shape[a]).collect())
        }
        GraphOp::Reshape { shape: target } => {
            let from: usize = shape.iter().product();
            let to: usize = target.iter().product();
            if from != to {
                return Err(Error::ModelLoad(format!(
                    "Cannot reshape {} into {}",
                    describe_shape(shape),
                    describe_shape(target)
                )));
            }
            Ok(target.clone())
        }
    }
}

/// Applies `op` to `input`
pub(crate) fn apply(op: &GraphOp, input: &Tensor) -> Result<Tensor> {
    match op {
        GraphOp::Identity => Ok(input.clone()),
        GraphOp::Sigmoid => Ok(input.mapv(|v| 1.0 / (1.0 + (-v).exp()))),
        GraphOp::Affine { scale, bias } => Ok(input.mapv(|v| v * scale + bias)),
        GraphOp::Softmax { axis } => {
            let axis = normalize_axis(*axis, input.ndim()).map_err(into_execution)?;
            let mut out = input.clone();
            for mut lane in out.lanes_mut(Axis(axis)) {
                let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                lane.mapv_inplace(|v| (v - max).exp());
                let sum = lane.sum();
                lane.mapv_inplace(|v| v / sum);
            }
            Ok(out)
        }
        GraphOp::Argmax { axis } => {
            let axis = normalize_axis(*axis, input.ndim()).map_err(into_execution)?;
            if input.shape()[axis] == 0 {
                return Err(Error::Execution("argmax over an empty axis".to_string()));
            }
            Ok(input.map_axis(Axis(axis), |lane| {
                let mut best = 0usize;
                for (i, v) in lane.iter().enumerate() {
                    if *v > lane[best] {
                        best = i;
                    }
                }
                best as f32
            }))
        }
        GraphOp::Transpose { perm } => {
            check_permutation(perm, input.ndim()).map_err(into_execution)?;
            Ok(input
                .view()
                .permuted_axes(IxDyn(perm))
                .as_standard_layout()
                .into_owned())
        }
        GraphOp::Reshape { shape } => {
            let data: Vec<f32> = input.iter().copied().collect();
            ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|e| {
                Error::Execution(format!(
                    "Cannot reshape {} into {}: {}",
                    describe_shape(input.shape()),
                    describe_shape(shape),
                    e
                ))
            })
        }
    }
}

fn normalize_axis(axis: isize, rank: usize) -> Result<usize> {
    let resolved = if axis < 0 { rank as isize + axis } else { axis };
    if resolved < 0 || resolved as usize >= rank {
        return Err(Error::ModelLoad(format!("Axis {} out of range for rank {}", axis, rank)));
    }
    Ok(resolved as usize)
}

fn check_permutation(perm: &[usize], rank: usize) -> Result<()> {
    let mut seen = vec![false; rank];
    if perm.len() != rank {
        return Err(Error::ModelLoad(format!(
            "Permutation {:?} does not match rank {}",
            perm, rank
        )));
    }
    for &axis in perm {
        if axis >= rank || seen[axis] {
            return Err(Error::ModelLoad(format!("{:?} is not a permutation", perm)));
        }
        seen[axis] = true;
    }
    Ok(())
}

fn into_execution(error: Error) -> Error {
    Error::Execution(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::tensor::tensor_from_vec;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let input = tensor_from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
        let out = apply(&GraphOp::Softmax { axis: -1 }, &input).unwrap();
        for row in out.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!(out[[0, 2]] > out[[0, 1]]);
        assert!((out[[1, 0]] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_argmax_removes_axis() {
        let input = tensor_from_vec(&[1, 3, 2], vec![0.1, 0.9, 0.8, 0.0, 0.1, 0.1]).unwrap();
        assert_eq!(infer_shape(&GraphOp::Argmax { axis: 1 }, input.shape()).unwrap(), vec![1, 2]);
        let out = apply(&GraphOp::Argmax { axis: 1 }, &input).unwrap();
        assert_eq!(out.shape(), &[1, 2]);
        assert_eq!(out[[0, 0]], 1.0);
        assert_eq!(out[[0, 1]], 0.0);
    }

    #[test]
    fn test_transpose_nhwc_to_nchw() {
        let input = tensor_from_vec(&[1, 1, 2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let perm = GraphOp::Transpose { perm: vec![0, 3, 1, 2] };
        assert_eq!(infer_shape(&perm, input.shape()).unwrap(), vec![1, 3, 1, 2]);
        let out = apply(&perm, &input).unwrap();
        assert_eq!(out.shape(), &[1, 3, 1, 2]);
        assert_eq!(out[[0, 0, 0, 1]], 4.0);
        assert_eq!(out[[0, 2, 0, 0]], 3.0);
    }

    #[test]
    fn test_shape_errors_at_compile_time() {
        assert!(infer_shape(&GraphOp::Softmax { axis: 2 }, &[1, 4]).unwrap_err().is_model_load());
        assert!(infer_shape(&GraphOp::Transpose { perm: vec![0, 0] }, &[1, 4]).is_err());
        assert!(infer_shape(&GraphOp::Reshape { shape: vec![3] }, &[1, 4]).is_err());
        assert_eq!(infer_shape(&GraphOp::Reshape { shape: vec![2, 2] }, &[1, 4]).unwrap(), vec![2, 2]);
    }

    #[test]
    fn test_elementwise() {
        let input = tensor_from_vec(&[2], vec![0.0, 2.0]).unwrap();
        let out = apply(&GraphOp::Affine { scale: 3.0, bias: 1.0 }, &input).unwrap();
        assert_eq!(out.as_slice().unwrap(), &[1.0, 7.0]);
        let out = apply(&GraphOp::Sigmoid, &input).unwrap();
        assert!((out[[0]] - 0.5).abs() < 1e-6);
    }
}
