use std::fmt;

use super::registry::{CAPABILITY_IMAGE, CAPABILITY_VISION};
use super::selectors::ModelSelector;

/// The four upstream operations the service performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Detect,
    Thumbnail,
    ProductSearch,
    TryOn,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Detect => "detect",
            Task::Thumbnail => "thumbnail",
            Task::ProductSearch => "product_search",
            Task::TryOn => "try_on",
        }
    }

    pub fn capability(&self) -> &'static str {
        match self {
            Task::Detect | Task::ProductSearch => CAPABILITY_VISION,
            Task::Thumbnail | Task::TryOn => CAPABILITY_IMAGE,
        }
    }

    /// Whether the model answers with an image rather than JSON text.
    pub fn returns_image(&self) -> bool {
        self.capability() == CAPABILITY_IMAGE
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskModelOverrides {
    pub detect: Option<String>,
    pub thumbnail: Option<String>,
    pub product_search: Option<String>,
    pub try_on: Option<String>,
}

impl TaskModelOverrides {
    pub fn get(&self, task: Task) -> Option<&str> {
        match task {
            Task::Detect => self.detect.as_deref(),
            Task::Thumbnail => self.thumbnail.as_deref(),
            Task::ProductSearch => self.product_search.as_deref(),
            Task::TryOn => self.try_on.as_deref(),
        }
    }
}

/// Model name per task, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskModels {
    pub detect: String,
    pub thumbnail: String,
    pub product_search: String,
    pub try_on: String,
}

impl TaskModels {
    pub fn model_for(&self, task: Task) -> &str {
        match task {
            Task::Detect => &self.detect,
            Task::Thumbnail => &self.thumbnail,
            Task::ProductSearch => &self.product_search,
            Task::TryOn => &self.try_on,
        }
    }

    /// Resolve every task through `selector`. Explicit overrides that had to
    /// fall back are reported as warnings.
    pub fn resolve(
        selector: &ModelSelector,
        overrides: &TaskModelOverrides,
    ) -> Result<(Self, Vec<String>), String> {
        let mut warnings = Vec::new();
        let mut pick = |task: Task| -> Result<String, String> {
            let requested = overrides.get(task);
            let selection = selector.select(requested, task.capability())?;
            if let (Some(_), Some(reason)) = (requested, selection.fallback_reason.as_ref()) {
                warnings.push(format!(
                    "{task}: {reason} Using '{}'.",
                    selection.model.name
                ));
            }
            Ok(selection.model.name)
        };
        let models = Self {
            detect: pick(Task::Detect)?,
            thumbnail: pick(Task::Thumbnail)?,
            product_search: pick(Task::ProductSearch)?,
            try_on: pick(Task::TryOn)?,
        };
        Ok((models, warnings))
    }
}
