use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Pick `requested` when it supports `capability`, otherwise the first
    /// capable model. `fallback_reason` is set whenever the request was not
    /// honored verbatim.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = self.registry.by_capability(capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use crate::models::{ModelRegistry, ModelSelector, ModelSpec};

    fn image_model(name: &str) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: "dryrun".to_string(),
            capabilities: vec!["image".to_string()],
        }
    }

    #[test]
    fn model_selector_falls_back_when_requested_model_unavailable() {
        let mut models = IndexMap::new();
        models.insert("image-fallback".to_string(), image_model("image-fallback"));
        let selection = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("missing"), "image")
            .unwrap();
        assert_eq!(selection.model.name, "image-fallback");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' unavailable for capability 'image'.")
        );
    }

    #[test]
    fn model_selector_no_request_uses_default_with_explanation() {
        let mut models = IndexMap::new();
        models.insert("image-default".to_string(), image_model("image-default"));
        let selection = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("  "), "image")
            .unwrap();
        assert_eq!(selection.model.name, "image-default");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No model specified; using default.")
        );
    }

    #[test]
    fn model_selector_honors_capable_request() {
        let selection = ModelSelector::new(None)
            .select(Some("gemini-2.5-flash-image"), "image")
            .unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-flash-image");
        assert!(selection.fallback_reason.is_none());
    }

    #[test]
    fn model_selector_raises_when_no_models_for_capability() {
        let mut models = IndexMap::new();
        models.insert(
            "vision-only".to_string(),
            ModelSpec {
                name: "vision-only".to_string(),
                provider: "dryrun".to_string(),
                capabilities: vec!["vision".to_string()],
            },
        );
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("gemini-3-pro-image-preview"), "image")
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for capability 'image'.");
    }
}
