//! Input layout resolution
//!
//! Resolution is tiered and the first tier that applies wins:
//!
//! 1. a layout declared on the model input is used verbatim;
//! 2. with no configured layouts at all, the layout is guessed from the shape
//!    and a warning is logged;
//! 3. a single configured layout applies to every input;
//! 4. otherwise the input is looked up by name, and an input missing from the
//!    configuration gets an empty layout.
//!
//! Each input is resolved at most once per resolver; later calls return the
//! cached layout.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use common::error::{Error, Result};
use common::tensor::describe_shape;
use common::{Layout, TensorDescriptor};
use model_config::LayoutMap;
use model_manager::ModelDescription;

/// Resolves and caches the layout of each model input
#[derive(Debug, Default)]
pub struct LayoutResolver {
    /// Layout string as configured, parsed on first use
    overrides: Option<String>,

    /// Parsed configured layouts
    configured: OnceCell<LayoutMap>,

    /// Resolved layouts by input name
    cache: DashMap<String, Layout>,
}

impl LayoutResolver {
    /// Creates a resolver for a configured layout string.
    ///
    /// The string is not parsed here; a malformed value surfaces as a
    /// configuration error the first time a layout is resolved.
    pub fn new(overrides: Option<String>) -> Self {
        Self {
            overrides,
            configured: OnceCell::new(),
            cache: DashMap::new(),
        }
    }

    /// Configured layouts, parsing them on first access
    pub fn configured(&self) -> Result<&LayoutMap> {
        self.configured.get_or_try_init(|| match &self.overrides {
            Some(overrides) => LayoutMap::parse(overrides),
            None => Ok(LayoutMap::default()),
        })
    }

    /// Layout of `input`, a member of `model`'s inputs
    pub fn resolve(&self, input: &TensorDescriptor, model: &ModelDescription) -> Result<Layout> {
        match self.cache.entry(input.name.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let layout = self.compute(input, model)?;
                debug!("Input '{}' resolved to layout '{}'", input.name, layout);
                entry.insert(layout.clone());
                Ok(layout)
            }
        }
    }

    /// Layout already resolved for the named input
    pub fn cached(&self, name: &str) -> Option<Layout> {
        self.cache.get(name).map(|layout| layout.value().clone())
    }

    fn compute(&self, input: &TensorDescriptor, model: &ModelDescription) -> Result<Layout> {
        if let Some(declared) = input.declared_layout() {
            return Ok(declared.clone());
        }

        let configured = self.configured()?;

        if configured.is_empty() {
            let layout = layout_from_shape(&input.shape)?;
            warn!(
                "Automatically detected layout '{}' for input '{}' will be used.",
                layout, input.name
            );
            return Ok(layout);
        }

        if let Some(global) = configured.single() {
            return Ok(global.clone());
        }

        if let Some(unknown) = configured.names().find(|name| model.input(name).is_none()) {
            return Err(Error::Configuration(format!(
                "Layout configured for '{}', but model '{}' has no such input",
                unknown, model.name
            )));
        }

        Ok(configured.get(&input.name).cloned().unwrap_or_default())
    }
}

/// Guesses a layout from a shape.
///
/// Channel counts from 1 to 4 are taken as the channel axis; square spatial
/// dimensions decide the remaining 4-D cases.
pub fn layout_from_shape(shape: &[usize]) -> Result<Layout> {
    let tag = match shape {
        [_, _] => "NC",
        [1, _, _] => "NHW",
        [_, _, 1] => "HWN",
        [_, c, _, _] if (1..=4).contains(c) => "NCHW",
        [_, _, _, c] if (1..=4).contains(c) => "NHWC",
        [_, a, b, _] if a == b => "NHWC",
        [_, _, a, b] if a == b => "NCHW",
        _ => {
            return Err(Error::Configuration(format!(
                "Cannot guess the layout of shape {}",
                describe_shape(shape)
            )))
        }
    };
    Layout::parse(tag)
}

/// `shape` with its batch dimension set to 1.
///
/// The batch axis is the layout's `N`; with an empty layout it is the first
/// axis of a tensor of rank 2 or more. Other shapes are returned unchanged.
pub fn with_unit_batch(shape: &[usize], layout: &Layout) -> Vec<usize> {
    let mut shape = shape.to_vec();
    let batch = match layout.batch_index() {
        Some(index) => Some(index),
        None if layout.is_empty() && shape.len() >= 2 => Some(0),
        None => None,
    };
    if let Some(index) = batch.filter(|&index| index < shape.len()) {
        shape[index] = 1;
    }
    shape
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_unit_batch() {
        assert_eq!(with_unit_batch(&[8, 3, 4, 4], &Layout::nchw()), vec![1, 3, 4, 4]);
        assert_eq!(with_unit_batch(&[4, 4, 8], &Layout::parse("HWN").unwrap()), vec![4, 4, 1]);
        assert_eq!(with_unit_batch(&[8, 10], &Layout::empty()), vec![1, 10]);
        assert_eq!(with_unit_batch(&[8], &Layout::empty()), vec![8]);
        assert_eq!(with_unit_batch(&[3, 4, 4], &Layout::parse("CHW").unwrap()), vec![3, 4, 4]);
    }

    fn two_inputs() -> ModelDescription {
        ModelDescription::new(
            "pair",
            vec![
                TensorDescriptor::new("image", vec![1, 3, 8, 8]),
                TensorDescriptor::new("info", vec![1, 3]),
            ],
            vec![TensorDescriptor::new("out", vec![1, 2])],
        )
    }

    #[test]
    fn test_layout_from_shape() {
        let guess = |shape: &[usize]| layout_from_shape(shape).unwrap().to_string();
        assert_eq!(guess(&[1, 1000]), "NC");
        assert_eq!(guess(&[1, 224, 224]), "NHW");
        assert_eq!(guess(&[224, 224, 1]), "HWN");
        assert_eq!(guess(&[1, 3, 224, 224]), "NCHW");
        assert_eq!(guess(&[1, 224, 224, 3]), "NHWC");
        assert_eq!(guess(&[1, 32, 32, 64]), "NHWC");
        assert_eq!(guess(&[1, 64, 32, 32]), "NCHW");

        assert!(layout_from_shape(&[5]).unwrap_err().is_configuration());
        assert!(layout_from_shape(&[2, 5, 7]).is_err());
        assert!(layout_from_shape(&[1, 64, 32, 16]).is_err());
    }

    #[test]
    fn test_declared_layout_beats_configuration() {
        let mut model = two_inputs();
        model.inputs[0].layout = Some(Layout::nhwc());
        let resolver = LayoutResolver::new(Some("image:NCHW,info:NC".to_string()));
        assert_eq!(resolver.resolve(&model.inputs[0], &model).unwrap(), Layout::nhwc());
    }

    #[test]
    fn test_malformed_configuration_fails_on_first_use() {
        let resolver = LayoutResolver::new(Some("image:,info:NC".to_string()));
        let model = two_inputs();
        assert!(resolver.resolve(&model.inputs[0], &model).unwrap_err().is_configuration());
        assert!(resolver.cached("image").is_none());
    }

    #[test]
    fn test_unknown_configured_name() {
        let resolver = LayoutResolver::new(Some("image:NCHW,missing:NC".to_string()));
        let model = two_inputs();
        let err = resolver.resolve(&model.inputs[1], &model).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_resolution_is_cached() {
        let resolver = LayoutResolver::new(Some("NHWC".to_string()));
        let model = two_inputs();
        assert_eq!(resolver.resolve(&model.inputs[0], &model).unwrap(), Layout::nhwc());

        // A later declaration on the descriptor does not change the cached answer.
        let redeclared = model.inputs[0].clone().with_layout(Layout::nchw());
        assert_eq!(resolver.resolve(&redeclared, &model).unwrap(), Layout::nhwc());
        assert_eq!(resolver.cached("image"), Some(Layout::nhwc()));
    }
}
