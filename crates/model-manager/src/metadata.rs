//! Model metadata reporting

use tracing::info;

use common::TensorDescriptor;

use crate::description::ModelDescription;

/// Logs the model's name, inputs and outputs
pub fn log_basic_model_info(description: &ModelDescription) {
    info!("Model name: {}", description.name);
    info!("Inputs:");
    for input in &description.inputs {
        info!("    {}", describe_tensor(input));
    }
    info!("Outputs:");
    for output in &description.outputs {
        info!("    {}", describe_tensor(output));
    }
}

/// One-line summary of a tensor: name, shape and declared layout
pub fn describe_tensor(tensor: &TensorDescriptor) -> String {
    match tensor.declared_layout() {
        Some(_) => tensor.to_string(),
        None => format!("{} (layout undeclared)", tensor),
    }
}
