//! Semantic segmentation: per-pixel classes at original image size

use ndarray::{Array2, ArrayView2, Axis, Ix2, Ix3};

use common::error::{Error, Result};
use common::tensor::{describe_shape, require_output};
use common::{Tensor, TensorMap};
use model_config::PipelineConfig;
use model_manager::ModelDescription;

use crate::families::preprocessing::{ImageInput, ImageSettings};
use crate::family::ModelFamily;
use crate::input::InputData;
use crate::layout::LayoutResolver;
use crate::result::{
    InternalImageData, InternalModelData, ResultEnvelope, ResultKind, SegmentationResult,
};

/// Class map from `[1,C,H,W]` scores or `[1,H,W]` class ids
#[derive(Debug)]
pub struct SegmentationFamily {
    settings: ImageSettings,
    image: Option<ImageInput>,
    output: String,
}

impl SegmentationFamily {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            settings: ImageSettings::from_config(config),
            image: None,
            output: String::new(),
        }
    }
}

impl ModelFamily for SegmentationFamily {
    fn name(&self) -> &str {
        "segmentation"
    }

    fn prepare_inputs_outputs(
        &mut self,
        model: &mut ModelDescription,
        layouts: &LayoutResolver,
    ) -> Result<()> {
        let (image, others) = ImageInput::prepare(&self.settings, model, layouts)?;
        if !others.is_empty() {
            return Err(Error::ModelLoad(format!(
                "Segmentation model '{}' has unexpected inputs: {}",
                model.name,
                others.join(", ")
            )));
        }

        let [output] = model.outputs.as_slice() else {
            return Err(Error::ModelLoad(format!(
                "Segmentation model '{}' must have exactly one output, found {}",
                model.name,
                model.outputs.len()
            )));
        };
        if output.rank() != 3 && output.rank() != 4 {
            return Err(Error::ModelLoad(format!(
                "Segmentation output '{}' has unsupported shape {}",
                output.name,
                describe_shape(&output.shape)
            )));
        }

        self.output = output.name.clone();
        self.image = Some(image);
        Ok(())
    }

    fn preprocess(&self, input: &InputData) -> Result<(TensorMap, InternalModelData)> {
        let image_input = self
            .image
            .as_ref()
            .ok_or_else(|| Error::Precondition("Segmentation model is not prepared".to_string()))?;
        let (tensor, geometry) = image_input.preprocess(image_input.image(input)?)?;
        let mut inputs = TensorMap::new();
        inputs.insert(image_input.name().to_string(), tensor);
        Ok((inputs, InternalModelData::Image(geometry)))
    }

    fn postprocess(&self, envelope: &ResultEnvelope) -> Result<ResultKind> {
        let geometry = envelope.internal_data.image()?;
        let output = require_output(&envelope.outputs, &self.output)?;
        let classes = class_ids(output)?;
        let class_map = resize_to_original(classes.view(), geometry);
        Ok(ResultKind::Segmentation(SegmentationResult { class_map }))
    }
}

/// Per-pixel class ids at output resolution
fn class_ids(output: &Tensor) -> Result<Array2<u32>> {
    let unsupported = || {
        Error::Postprocess(format!(
            "Segmentation output of shape {} is not supported",
            describe_shape(output.shape())
        ))
    };
    if output.shape().contains(&0) {
        return Err(unsupported());
    }

    match output.shape() {
        [1, channels, _, _] if *channels > 1 => {
            let scores = output
                .index_axis(Axis(0), 0)
                .into_dimensionality::<Ix3>()
                .map_err(|_| unsupported())?;
            Ok(scores.map_axis(Axis(0), |lane| {
                let mut best = 0usize;
                for (i, v) in lane.iter().enumerate() {
                    if *v > lane[best] {
                        best = i;
                    }
                }
                best as u32
            }))
        }
        [1, 1, _, _] | [1, _, _] => {
            let mut ids = output.view();
            while ids.ndim() > 2 {
                ids = ids.index_axis_move(Axis(0), 0);
            }
            let ids = ids.into_dimensionality::<Ix2>().map_err(|_| unsupported())?;
            Ok(ids.mapv(|v| v.max(0.0).round() as u32))
        }
        _ => Err(unsupported()),
    }
}

/// Nearest-neighbour map of the class ids onto the original image
fn resize_to_original(classes: ArrayView2<'_, u32>, geometry: &InternalImageData) -> Array2<u32> {
    let (out_height, out_width) = classes.dim();
    let height = geometry.original_height as usize;
    let width = geometry.original_width as usize;
    let ratio_x = out_width as f32 / geometry.net_width as f32;
    let ratio_y = out_height as f32 / geometry.net_height as f32;

    Array2::from_shape_fn((height, width), |(y, x)| {
        let net_x = (x as f32 + 0.5) / geometry.scale_x + geometry.pad_left as f32;
        let net_y = (y as f32 + 0.5) / geometry.scale_y + geometry.pad_top as f32;
        let src_x = ((net_x * ratio_x) as usize).min(out_width.saturating_sub(1));
        let src_y = ((net_y * ratio_y) as usize).min(out_height.saturating_sub(1));
        classes[[src_y, src_x]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::tensor::tensor_from_vec;

    fn geometry(original: (u32, u32), net: (u32, u32)) -> InternalImageData {
        InternalImageData {
            original_width: original.0,
            original_height: original.1,
            net_width: net.0,
            net_height: net.1,
            scale_x: original.0 as f32 / net.0 as f32,
            scale_y: original.1 as f32 / net.1 as f32,
            pad_left: 0,
            pad_top: 0,
        }
    }

    #[test]
    fn test_argmax_over_scores() {
        // Two classes over a 1x2 map: class 1 wins on the left, class 0 on the right.
        let scores = tensor_from_vec(&[1, 2, 1, 2], vec![0.2, 0.7, 0.8, 0.3]).unwrap();
        let ids = class_ids(&scores).unwrap();
        assert_eq!(ids, Array2::from_shape_vec((1, 2), vec![1, 0]).unwrap());
    }

    #[test]
    fn test_class_id_output() {
        let ids = tensor_from_vec(&[1, 2, 2], vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(class_ids(&ids).unwrap()[[1, 1]], 3);
        assert!(class_ids(&tensor_from_vec(&[2, 2], vec![0.0; 4]).unwrap()).is_err());
    }

    #[test]
    fn test_empty_output_is_postprocess_error() {
        let empty = tensor_from_vec(&[1, 0, 4], Vec::new()).unwrap();
        assert!(class_ids(&empty).unwrap_err().is_postprocess());
        let empty = tensor_from_vec(&[1, 3, 2, 0], Vec::new()).unwrap();
        assert!(class_ids(&empty).unwrap_err().is_postprocess());
    }

    #[test]
    fn test_resize_to_original() {
        let classes = Array2::from_shape_vec((2, 2), vec![1u32, 2, 3, 4]).unwrap();
        let map = resize_to_original(classes.view(), &geometry((4, 4), (2, 2)));
        assert_eq!(map.dim(), (4, 4));
        assert_eq!(map[[0, 0]], 1);
        assert_eq!(map[[1, 3]], 2);
        assert_eq!(map[[3, 0]], 3);
        assert_eq!(map[[3, 3]], 4);
    }

    #[test]
    fn test_postprocess_end_to_end() {
        let mut family = SegmentationFamily::new(&PipelineConfig::default());
        let mut model = ModelDescription::new(
            "seg",
            vec![common::TensorDescriptor::new("data", vec![1, 3, 2, 2])],
            vec![common::TensorDescriptor::new("mask", vec![1, 2, 2])],
        );
        family.prepare_inputs_outputs(&mut model, &LayoutResolver::new(None)).unwrap();

        let mut outputs = TensorMap::new();
        outputs.insert("mask".to_string(), tensor_from_vec(&[1, 2, 2], vec![0.0, 1.0, 1.0, 0.0]).unwrap());
        let envelope = ResultEnvelope::new(outputs, InternalModelData::Image(geometry((6, 4), (2, 2))));
        let result = family.postprocess(&envelope).unwrap();
        let ResultKind::Segmentation(segmentation) = result else {
            panic!("expected segmentation");
        };
        assert_eq!(segmentation.class_map.dim(), (4, 6));
        assert_eq!(segmentation.class_map[[0, 5]], 1);
    }
}
