//!
//! Model-name features and backend model mapping.
//!
//! Clients select gateway behaviours through model-name prefixes:
//! `fake-stream/<model>` runs a unary call behind synthetic streaming and
//! `anti-truncation/<model>` wraps a streaming call in truncation recovery.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::converter::gemini::{GenerateContentRequest, ThinkingConfig};

/* --- constants ------------------------------------------------------------------------------- */

pub const FAKE_STREAM_PREFIX: &str = "fake-stream/";
pub const ANTI_TRUNCATION_PREFIX: &str = "anti-truncation/";

/// Client model name to backend model name
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("claude-sonnet-4-5-thinking", "claude-sonnet-4-5"),
    ("claude-opus-4-5", "claude-opus-4-5-thinking"),
    ("gemini-2.5-flash-thinking", "gemini-2.5-flash"),
];

/// Models the backend serves but does not list
const EXTRA_MODELS: &[&str] = &["claude-opus-4-5"];

/* --- types ----------------------------------------------------------------------------------- */

/// Gateway behaviour requested through the model name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelFeature {
    #[default]
    None,
    FakeStream,
    AntiTruncation,
}

///
/// Parsed client model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /** name as sent by the client */
    pub requested: String,
    /** name without feature prefix */
    pub base: String,
    /** name sent to the backend */
    pub backend: String,
    pub feature: ModelFeature,
}

/* --- start of code -------------------------------------------------------------------------- */

impl ModelSpec {
    ///
    /// Parse a client model name.
    ///
    /// # Arguments
    ///  * `requested` - model name, possibly with a feature prefix and `models/` path
    pub fn parse(requested: &str) -> Self {
        let trimmed = requested.trim().trim_start_matches("models/");
        let (feature, base) = if let Some(rest) = trimmed.strip_prefix(FAKE_STREAM_PREFIX) {
            (ModelFeature::FakeStream, rest)
        } else if let Some(rest) = trimmed.strip_prefix(ANTI_TRUNCATION_PREFIX) {
            (ModelFeature::AntiTruncation, rest)
        } else {
            (ModelFeature::None, trimmed)
        };

        Self {
            requested: requested.to_string(),
            base: base.to_string(),
            backend: backend_model(base),
            feature,
        }
    }

    /// Whether the backend model produces reasoning output
    pub fn is_thinking(&self) -> bool {
        is_thinking_model(&self.backend) || is_thinking_model(&self.base)
    }

    /// Whether the backend call is an image-generation call
    pub fn is_image(&self) -> bool {
        self.backend.contains("image")
    }
}

/// Map a client model name to the backend's name for it
pub fn backend_model(base: &str) -> String {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == base)
        .map(|(_, target)| target.to_string())
        .unwrap_or_else(|| base.to_string())
}

pub fn is_thinking_model(name: &str) -> bool {
    name.contains("-thinking") || name.contains("pro")
}

///
/// Ask thinking models to return their reasoning.
///
/// Leaves an explicit `includeThoughts` from the client untouched.
pub fn apply_thinking_defaults(spec: &ModelSpec, request: &mut GenerateContentRequest) {
    if !spec.is_thinking() {
        return;
    }
    let config = request.generation_config.get_or_insert_with(Default::default);
    let thinking = config.thinking_config.get_or_insert_with(ThinkingConfig::default);
    if thinking.include_thoughts.is_none() {
        thinking.include_thoughts = Some(true);
    }
}

///
/// Expand backend model ids into the client-visible list.
///
/// # Arguments
///  * `backend_models` - ids reported by the backend, in backend order
///
/// # Returns
///  * Each base id followed by its `fake-stream/` and `anti-truncation/` variants
pub fn model_variants<I, S>(backend_models: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut bases: Vec<String> = Vec::new();
    let all = backend_models
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .chain(EXTRA_MODELS.iter().map(|s| s.to_string()));
    for name in all {
        if !bases.contains(&name) {
            bases.push(name);
        }
    }

    bases
        .into_iter()
        .flat_map(|base| {
            [
                base.clone(),
                format!("{}{}", FAKE_STREAM_PREFIX, base),
                format!("{}{}", ANTI_TRUNCATION_PREFIX, base),
            ]
        })
        .collect()
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefixes() {
        let spec = ModelSpec::parse("fake-stream/gemini-2.5-pro");
        assert_eq!(spec.feature, ModelFeature::FakeStream);
        assert_eq!(spec.base, "gemini-2.5-pro");
        assert_eq!(spec.backend, "gemini-2.5-pro");

        let spec = ModelSpec::parse("anti-truncation/claude-opus-4-5");
        assert_eq!(spec.feature, ModelFeature::AntiTruncation);
        assert_eq!(spec.backend, "claude-opus-4-5-thinking");

        let spec = ModelSpec::parse("models/gemini-2.5-flash-thinking");
        assert_eq!(spec.feature, ModelFeature::None);
        assert_eq!(spec.backend, "gemini-2.5-flash");
    }

    #[test]
    fn test_thinking_defaults() {
        let mut request = GenerateContentRequest::default();
        apply_thinking_defaults(&ModelSpec::parse("gemini-2.5-pro"), &mut request);
        let thinking = request.generation_config.unwrap().thinking_config.unwrap();
        assert_eq!(thinking.include_thoughts, Some(true));

        let mut request = GenerateContentRequest::default();
        apply_thinking_defaults(&ModelSpec::parse("gemini-2.5-flash"), &mut request);
        assert!(request.generation_config.is_none());
    }

    #[test]
    fn test_model_variants_order() {
        let models = model_variants(["gemini-2.5-pro", "claude-opus-4-5"]);
        assert_eq!(
            models,
            vec![
                "gemini-2.5-pro",
                "fake-stream/gemini-2.5-pro",
                "anti-truncation/gemini-2.5-pro",
                "claude-opus-4-5",
                "fake-stream/claude-opus-4-5",
                "anti-truncation/claude-opus-4-5",
            ]
        );
    }
}
