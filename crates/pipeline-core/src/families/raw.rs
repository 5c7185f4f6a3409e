//! Passthrough family: tensors in, raw outputs out

use common::error::{Error, Result};
use common::TensorMap;
use model_manager::ModelDescription;

use crate::family::ModelFamily;
use crate::input::InputData;
use crate::layout::LayoutResolver;
use crate::result::{InternalModelData, ResultEnvelope, ResultKind};

/// Feeds caller tensors unchanged and returns the outputs uninterpreted
#[derive(Debug, Default)]
pub struct RawFamily;

impl RawFamily {
    pub fn new() -> Self {
        Self
    }
}

impl ModelFamily for RawFamily {
    fn name(&self) -> &str {
        "raw"
    }

    fn prepare_inputs_outputs(
        &mut self,
        _model: &mut ModelDescription,
        _layouts: &LayoutResolver,
    ) -> Result<()> {
        Ok(())
    }

    fn preprocess(&self, input: &InputData) -> Result<(TensorMap, InternalModelData)> {
        match input {
            InputData::Tensors(tensors) => Ok((tensors.clone(), InternalModelData::None)),
            other => Err(Error::InvalidArgument(format!(
                "Raw models take tensors, got {} input",
                other.kind()
            ))),
        }
    }

    fn postprocess(&self, _envelope: &ResultEnvelope) -> Result<ResultKind> {
        Ok(ResultKind::Raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Tensor;
    use image::RgbImage;
    use ndarray::IxDyn;

    #[test]
    fn test_passthrough() {
        let family = RawFamily::new();
        let mut tensors = TensorMap::new();
        tensors.insert("x".to_string(), Tensor::ones(IxDyn(&[1, 2])));

        let (inputs, internal) = family.preprocess(&InputData::Tensors(tensors.clone())).unwrap();
        assert_eq!(inputs, tensors);
        assert_eq!(internal, InternalModelData::None);

        let err = family.preprocess(&InputData::from(RgbImage::new(2, 2))).unwrap_err();
        assert!(err.to_string().contains("image"));
    }
}
