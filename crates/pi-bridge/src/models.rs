//! Composite model identifiers and the provider registry.

use std::collections::HashMap;

use pi_client::ModelDescriptor;

use crate::protocol::{ModelInfo, ReasoningEffort, ReasoningEffortOption};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_PROVIDER: &str = "anthropic";

const COMPOSITE_SEPARATOR: char = '/';

#[derive(Debug, Clone)]
pub struct RegisteredModel {
    pub composite: String,
    pub inner_id: String,
    pub provider: String,
    pub display_name: String,
    pub reasoning: bool,
}

/// Maps the composite `<provider>/<inner-id>` form the bridge advertises to
/// the `(provider, inner id)` pair the agent understands. Populated lazily
/// from `get_available_models`; legacy bare ids resolve through the same
/// table, falling back to name-prefix inference.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entries: Vec<RegisteredModel>,
    providers_by_inner_id: HashMap<String, String>,
}

impl ModelRegistry {
    pub fn populate(&mut self, models: &[ModelDescriptor]) {
        self.entries.clear();
        for descriptor in models {
            let provider = if descriptor.provider.is_empty() {
                DEFAULT_PROVIDER.to_string()
            } else {
                descriptor.provider.clone()
            };
            let display_name = if descriptor.name.is_empty() {
                descriptor.id.clone()
            } else {
                descriptor.name.clone()
            };
            self.providers_by_inner_id
                .insert(descriptor.id.clone(), provider.clone());
            self.entries.push(RegisteredModel {
                composite: compose(&provider, &descriptor.id),
                inner_id: descriptor.id.clone(),
                provider,
                display_name,
                reasoning: descriptor.reasoning,
            });
        }
    }

    pub fn entries(&self) -> &[RegisteredModel] {
        &self.entries
    }

    /// Resolve a client-supplied model identifier to `(provider, inner id)`.
    /// Composite ids split at the separator; bare ids consult the registry
    /// and fall back to prefix inference, which is then recorded for the
    /// rest of the session.
    pub fn resolve(&mut self, model: &str) -> (String, String) {
        if let Some((provider, inner_id)) = model.split_once(COMPOSITE_SEPARATOR) {
            return (provider.to_string(), inner_id.to_string());
        }
        if let Some(provider) = self.providers_by_inner_id.get(model) {
            return (provider.clone(), model.to_string());
        }
        let provider = guess_provider(model);
        self.providers_by_inner_id
            .insert(model.to_string(), provider.to_string());
        (provider.to_string(), model.to_string())
    }

    /// Outer `model/list` entries, with the default flag derived from the
    /// session's current composite id.
    pub fn outer_list(&self, current_composite: &str) -> Vec<ModelInfo> {
        self.entries
            .iter()
            .map(|entry| model_info(entry, entry.composite == current_composite))
            .collect()
    }
}

pub fn compose(provider: &str, inner_id: &str) -> String {
    format!("{provider}{COMPOSITE_SEPARATOR}{inner_id}")
}

/// Provider inference for legacy bare model ids.
pub fn guess_provider(model: &str) -> &'static str {
    let name = model.trim().to_ascii_lowercase();
    if name.is_empty() {
        return DEFAULT_PROVIDER;
    }
    if name.starts_with("claude") {
        "anthropic"
    } else if name.starts_with("gpt") || name.starts_with("o1") || name.starts_with("o3") {
        "openai"
    } else if name.starts_with("gemini") {
        "google"
    } else if name.starts_with("mistral")
        || name.starts_with("codestral")
        || name.starts_with("devstral")
    {
        "mistral"
    } else {
        "opencode"
    }
}

fn reasoning_efforts(reasoning: bool) -> Vec<ReasoningEffortOption> {
    if reasoning {
        vec![
            ReasoningEffortOption {
                reasoning_effort: ReasoningEffort::Low,
                description: "Fast responses with light reasoning".to_string(),
            },
            ReasoningEffortOption {
                reasoning_effort: ReasoningEffort::Medium,
                description: "Balanced reasoning".to_string(),
            },
            ReasoningEffortOption {
                reasoning_effort: ReasoningEffort::High,
                description: "Thorough reasoning for hard problems".to_string(),
            },
        ]
    } else {
        vec![ReasoningEffortOption {
            reasoning_effort: ReasoningEffort::Default,
            description: "Standard reasoning".to_string(),
        }]
    }
}

fn model_info(entry: &RegisteredModel, is_default: bool) -> ModelInfo {
    ModelInfo {
        id: entry.composite.clone(),
        model: entry.inner_id.clone(),
        display_name: entry.display_name.clone(),
        description: String::new(),
        supported_reasoning_efforts: reasoning_efforts(entry.reasoning),
        default_reasoning_effort: if entry.reasoning {
            ReasoningEffort::Medium
        } else {
            ReasoningEffort::Default
        },
        is_default,
    }
}

/// Hardcoded list used when the agent cannot enumerate its models.
pub fn fallback_models(current_composite: &str) -> Vec<ModelInfo> {
    let entry = RegisteredModel {
        composite: compose(DEFAULT_PROVIDER, DEFAULT_MODEL),
        inner_id: DEFAULT_MODEL.to_string(),
        provider: DEFAULT_PROVIDER.to_string(),
        display_name: "Claude Sonnet 4".to_string(),
        reasoning: false,
    };
    let is_default = current_composite.is_empty() || current_composite == entry.composite;
    vec![model_info(&entry, is_default)]
}
