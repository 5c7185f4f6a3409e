//! Image preprocessing shared by the image families
//!
//! The image input is found among the model inputs by its resolved layout: it is
//! the one input with both spatial axes. Its layout is declared on the model
//! description so the backend and later lookups agree on it.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::IxDyn;

use common::error::{Error, Result};
use common::tensor::describe_shape;
use common::{Layout, Tensor, TensorDescriptor};
use model_config::{PipelineConfig, ResizeType};
use model_manager::ModelDescription;

use crate::input::InputData;
use crate::layout::{with_unit_batch, LayoutResolver};
use crate::result::InternalImageData;

/// Image options taken from the pipeline configuration
#[derive(Debug, Clone, Default)]
pub(crate) struct ImageSettings {
    pub resize_type: ResizeType,
    pub mean_values: Vec<f32>,
    pub scale_values: Vec<f32>,
    pub reverse_input_channels: bool,
}

impl ImageSettings {
    pub(crate) fn from_config(config: &PipelineConfig) -> Self {
        Self {
            resize_type: config.resize_type,
            mean_values: config.mean_values.clone(),
            scale_values: config.scale_values.clone(),
            reverse_input_channels: config.reverse_input_channels,
        }
    }
}

/// The image input of a model and how to fill it
#[derive(Debug, Clone)]
pub(crate) struct ImageInput {
    /// Input name
    name: String,

    /// Resolved layout
    layout: Layout,

    /// Tensor shape with a batch of one
    shape: Vec<usize>,

    net_width: u32,
    net_height: u32,
    channels: usize,

    settings: ImageSettings,
}

impl ImageInput {
    /// Finds the image input and declares its layout on `model`.
    ///
    /// Returns the image input and the names of all other inputs.
    pub(crate) fn prepare(
        settings: &ImageSettings,
        model: &mut ModelDescription,
        layouts: &LayoutResolver,
    ) -> Result<(Self, Vec<String>)> {
        let mut found: Option<(TensorDescriptor, Layout)> = None;
        let mut others = Vec::new();

        for input in model.inputs.clone() {
            if input.rank() < 3 {
                others.push(input.name);
                continue;
            }
            let layout = layouts.resolve(&input, model)?;
            if layout.height_index().is_none() || layout.width_index().is_none() {
                others.push(input.name);
                continue;
            }
            if let Some((first, _)) = &found {
                return Err(Error::ModelLoad(format!(
                    "Model '{}' has more than one image input ('{}' and '{}')",
                    model.name, first.name, input.name
                )));
            }
            found = Some((input, layout));
        }

        let (input, layout) = found.ok_or_else(|| {
            Error::ModelLoad(format!("Model '{}' has no image input", model.name))
        })?;

        if layout.rank() != input.rank() {
            return Err(Error::ModelLoad(format!(
                "Layout '{}' does not fit input {}",
                layout, input
            )));
        }

        let dim = |index: Option<usize>| index.map(|i| input.shape[i]);
        let net_height = dim(layout.height_index()).unwrap_or(0);
        let net_width = dim(layout.width_index()).unwrap_or(0);
        let channels = dim(layout.channels_index()).unwrap_or(1);

        if net_width == 0 || net_height == 0 {
            return Err(Error::ModelLoad(format!("Image input {} has no pixels", input)));
        }
        if channels != 1 && channels != 3 {
            return Err(Error::ModelLoad(format!(
                "Image input {} has {} channels, expected 1 or 3",
                input, channels
            )));
        }
        for (name, values) in [("mean_values", &settings.mean_values), ("scale_values", &settings.scale_values)] {
            if !values.is_empty() && values.len() != channels {
                return Err(Error::Configuration(format!(
                    "{} has {} entries but input '{}' has {} channels",
                    name,
                    values.len(),
                    input.name,
                    channels
                )));
            }
        }

        if let Some(descriptor) = model.input_mut(&input.name) {
            descriptor.layout = Some(layout.clone());
        }

        let image = Self {
            shape: with_unit_batch(&input.shape, &layout),
            name: input.name,
            layout,
            net_width: net_width as u32,
            net_height: net_height as u32,
            channels,
            settings: settings.clone(),
        };
        Ok((image, others))
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn net_width(&self) -> u32 {
        self.net_width
    }

    pub(crate) fn net_height(&self) -> u32 {
        self.net_height
    }

    /// Extracts the image from `input`
    pub(crate) fn image<'a>(&self, input: &'a InputData) -> Result<&'a RgbImage> {
        match input {
            InputData::Image(data) => Ok(&data.image),
            other => Err(Error::InvalidArgument(format!(
                "Input '{}' takes an image, got {} input",
                self.name,
                other.kind()
            ))),
        }
    }

    /// Resizes `image` into the model input and records the geometry
    pub(crate) fn preprocess(&self, image: &RgbImage) -> Result<(Tensor, InternalImageData)> {
        let (original_width, original_height) = image.dimensions();
        if original_width == 0 || original_height == 0 {
            return Err(Error::InvalidArgument("Image is empty".to_string()));
        }

        let (net_width, net_height) = (self.net_width, self.net_height);
        let ratio_x = original_width as f32 / net_width as f32;
        let ratio_y = original_height as f32 / net_height as f32;

        let (resized_width, resized_height, scale_x, scale_y) = match self.settings.resize_type {
            ResizeType::Standard => (net_width, net_height, ratio_x, ratio_y),
            ResizeType::FitToWindow | ResizeType::FitToWindowLetterbox => {
                let scale = ratio_x.max(ratio_y);
                let width = ((original_width as f32 / scale).round() as u32).clamp(1, net_width);
                let height = ((original_height as f32 / scale).round() as u32).clamp(1, net_height);
                (width, height, scale, scale)
            }
        };

        let (pad_left, pad_top) = match self.settings.resize_type {
            ResizeType::FitToWindowLetterbox => {
                ((net_width - resized_width) / 2, (net_height - resized_height) / 2)
            }
            _ => (0, 0),
        };

        let resized = if (resized_width, resized_height) == (original_width, original_height) {
            image.clone()
        } else {
            imageops::resize(image, resized_width, resized_height, FilterType::Triangle)
        };

        let canvas = if (resized_width, resized_height) == (net_width, net_height) {
            resized
        } else {
            let mut canvas = RgbImage::new(net_width, net_height);
            imageops::replace(&mut canvas, &resized, pad_left as i64, pad_top as i64);
            canvas
        };

        let tensor = self.fill(&canvas);
        let geometry = InternalImageData {
            original_width,
            original_height,
            net_width,
            net_height,
            scale_x,
            scale_y,
            pad_left,
            pad_top,
        };
        Ok((tensor, geometry))
    }

    fn fill(&self, canvas: &RgbImage) -> Tensor {
        let mut tensor = Tensor::zeros(IxDyn(&self.shape));
        let mut index = vec![0usize; self.shape.len()];
        let (Some(h), Some(w)) = (self.layout.height_index(), self.layout.width_index()) else {
            return tensor;
        };
        let c = self.layout.channels_index();

        for (x, y, pixel) in canvas.enumerate_pixels() {
            index[h] = y as usize;
            index[w] = x as usize;
            for channel in 0..self.channels {
                let value = if self.channels == 1 {
                    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
                } else if self.settings.reverse_input_channels {
                    pixel[2 - channel] as f32
                } else {
                    pixel[channel] as f32
                };
                if let Some(c) = c {
                    index[c] = channel;
                }
                tensor[index.as_slice()] = self.normalize(value, channel);
            }
        }
        tensor
    }

    fn normalize(&self, value: f32, channel: usize) -> f32 {
        let mean = self.settings.mean_values.get(channel).copied().unwrap_or(0.0);
        let scale = self.settings.scale_values.get(channel).copied().unwrap_or(1.0);
        (value - mean) / scale
    }
}

/// `[height, width, 1]` rows describing the model input size
pub(crate) fn image_info_tensor(input: &TensorDescriptor, net_height: u32, net_width: u32) -> Result<Tensor> {
    let shape = with_unit_batch(&input.shape, &Layout::empty());
    if shape.len() != 2 || shape[1] < 2 {
        return Err(Error::ModelLoad(format!(
            "Image info input '{}' has unsupported shape {}",
            input.name,
            describe_shape(&input.shape)
        )));
    }
    let mut tensor = Tensor::zeros(IxDyn(&shape));
    tensor[[0, 0]] = net_height as f32;
    tensor[[0, 1]] = net_width as f32;
    if shape[1] > 2 {
        tensor[[0, 2]] = 1.0;
    }
    Ok(tensor)
}
