//! Built-in model families

mod preprocessing;

pub mod classification;
pub mod detection;
pub mod instance_segmentation;
pub mod raw;
pub mod segmentation;

pub use classification::ClassificationFamily;
pub use detection::DetectionFamily;
pub use instance_segmentation::InstanceSegmentationFamily;
pub use raw::RawFamily;
pub use segmentation::SegmentationFamily;
