mod registry;
mod selectors;
mod tasks;

pub use registry::{ModelRegistry, ModelSpec, CAPABILITY_IMAGE, CAPABILITY_VISION};
pub use selectors::{ModelSelection, ModelSelector};
pub use tasks::{Task, TaskModelOverrides, TaskModels};
