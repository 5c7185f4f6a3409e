//! Raw input handed to a pipeline

use image::{DynamicImage, RgbImage};

use common::TensorMap;

/// Decoded RGB image
#[derive(Debug, Clone)]
pub struct ImageInputData {
    /// Pixels, row-major RGB8
    pub image: RgbImage,
}

impl ImageInputData {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Backend-agnostic input of one `infer` call
#[derive(Debug, Clone)]
pub enum InputData {
    /// A single image for image families
    Image(ImageInputData),

    /// Ready-made tensors, keyed by input name
    Tensors(TensorMap),
}

impl InputData {
    /// Short name of the variant for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            InputData::Image(_) => "image",
            InputData::Tensors(_) => "tensors",
        }
    }
}

impl From<RgbImage> for InputData {
    fn from(image: RgbImage) -> Self {
        InputData::Image(ImageInputData::new(image))
    }
}

impl From<DynamicImage> for InputData {
    fn from(image: DynamicImage) -> Self {
        InputData::Image(ImageInputData::new(image.to_rgb8()))
    }
}

impl From<TensorMap> for InputData {
    fn from(tensors: TensorMap) -> Self {
        InputData::Tensors(tensors)
    }
}
