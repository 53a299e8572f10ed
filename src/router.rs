use std::collections::HashMap;

use crate::config::ProviderConfig;
use crate::models::TutorRequest;
use crate::temporal::TemporalIntent;

const LIVE_SUFFIX: &str = ":online";

/// Model selected for one run and what it can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub model: String,
    /// The model searches the web itself; no tools are declared to it
    pub live_augmented: bool,
    pub vision: bool,
}

/// Picks the completion model. Never fails.
pub struct ModelRouter {
    default_model: String,
    vision_model: String,
    live_variants: HashMap<String, String>,
}

impl ModelRouter {
    pub fn new(
        default_model: String,
        vision_model: String,
        live_variants: HashMap<String, String>,
    ) -> Self {
        Self {
            default_model,
            vision_model,
            live_variants,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.default_model.clone(),
            config.vision_model.clone(),
            config.live_variants.clone(),
        )
    }

    /// Model for the classification call: the requested one, else the default
    pub fn base_model<'a>(&'a self, request: &'a TutorRequest) -> &'a str {
        request
            .requested_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model)
    }

    fn is_live(&self, model: &str) -> bool {
        model.ends_with(LIVE_SUFFIX) || self.live_variants.values().any(|v| v == model)
    }

    pub fn route(&self, request: &TutorRequest, intent: &TemporalIntent) -> Route {
        if request.has_image() {
            let model = request
                .vision_model
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(&self.vision_model)
                .to_string();
            tracing::info!("Routing image question to vision model {}", model);
            return Route {
                model,
                live_augmented: false,
                vision: true,
            };
        }

        let base = self.base_model(request);
        if intent.requires_live_data() {
            if let Some(variant) = self.live_variants.get(base) {
                tracing::info!("Routing live-data question to {} (variant of {})", variant, base);
                return Route {
                    model: variant.clone(),
                    live_augmented: true,
                    vision: false,
                };
            }
        }

        Route {
            model: base.to_string(),
            live_augmented: self.is_live(base),
            vision: false,
        }
    }
}
