// Capability records for OpenAI-compatible endpoints
use crate::model::LlmError;
use serde::{Deserialize, Serialize};

/// Where the completion text lives in the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// `choices[0].message.content`
    #[default]
    ChatCompletions,
    /// `choices[0].text`
    TextCompletions,
    /// `message.content`
    OllamaChat,
}

/// Structured-output capability of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormatHint {
    None,
    JsonObject,
    #[default]
    JsonSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default)]
    pub response_shape: ResponseShape,
    #[serde(default)]
    pub response_format: ResponseFormatHint,
    /// Substrings of a base URL that identify this provider.
    #[serde(default)]
    pub url_hints: Vec<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
}

fn default_chat_path() -> String {
    "/chat/completions".to_string()
}

pub const GENERIC_PROFILE_ID: &str = "openai-compatible";

impl ProviderProfile {
    fn openai_style(id: &str, base_url: &str, hints: &[&str], format: ResponseFormatHint) -> Self {
        Self {
            id: id.to_string(),
            base_url: base_url.to_string(),
            chat_path: default_chat_path(),
            response_shape: ResponseShape::ChatCompletions,
            response_format: format,
            url_hints: hints.iter().map(|h| h.to_string()).collect(),
            max_tokens: None,
            temperature: None,
            top_p: None,
        }
    }

    pub fn generic() -> Self {
        Self::openai_style(GENERIC_PROFILE_ID, "", &[], ResponseFormatHint::JsonSchema)
    }

    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.chat_path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    pub fn matches_url(&self, base_url: &str) -> bool {
        let url = base_url.to_ascii_lowercase();
        self.url_hints
            .iter()
            .any(|hint| !hint.is_empty() && url.contains(&hint.to_ascii_lowercase()))
    }
}

pub struct ProviderRegistry {
    profiles: Vec<ProviderProfile>,
}

impl ProviderRegistry {
    pub fn builtin() -> Self {
        let perplexity = ProviderProfile {
            max_tokens: Some(1000),
            temperature: Some(0.7),
            top_p: Some(0.9),
            ..ProviderProfile::openai_style(
                "perplexity",
                "https://api.perplexity.ai",
                &["perplexity"],
                ResponseFormatHint::None,
            )
        };
        let ollama = ProviderProfile {
            chat_path: "/api/chat".to_string(),
            response_shape: ResponseShape::OllamaChat,
            ..ProviderProfile::openai_style(
                "ollama",
                "http://localhost:11434",
                &["ollama", ":11434"],
                ResponseFormatHint::None,
            )
        };

        Self {
            profiles: vec![
                ProviderProfile::openai_style(
                    "openai",
                    "https://api.openai.com/v1",
                    &["api.openai.com"],
                    ResponseFormatHint::JsonSchema,
                ),
                ProviderProfile::openai_style(
                    "siliconflow",
                    "https://api.siliconflow.cn/v1",
                    &["siliconflow"],
                    ResponseFormatHint::JsonSchema,
                ),
                ProviderProfile::openai_style(
                    "deepseek",
                    "https://api.deepseek.com/v1",
                    &["deepseek"],
                    ResponseFormatHint::JsonObject,
                ),
                perplexity,
                ollama,
            ],
        }
    }

    /// Adds or replaces a profile. Registered profiles are matched before built-ins.
    pub fn register(&mut self, profile: ProviderProfile) {
        self.profiles.retain(|p| p.id != profile.id);
        self.profiles.insert(0, profile);
    }

    pub fn get(&self, id: &str) -> Option<&ProviderProfile> {
        if id.eq_ignore_ascii_case(GENERIC_PROFILE_ID) {
            return None;
        }
        self.profiles.iter().find(|p| p.id.eq_ignore_ascii_case(id))
    }

    /// Explicit id first, then URL hints, then the generic profile.
    /// A non-empty `base_url` always replaces the profile default.
    pub fn resolve(&self, explicit: Option<&str>, base_url: &str) -> Result<ProviderProfile, LlmError> {
        let mut profile = match explicit.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) if id.eq_ignore_ascii_case(GENERIC_PROFILE_ID) => ProviderProfile::generic(),
            Some(id) => self
                .get(id)
                .cloned()
                .ok_or_else(|| LlmError::NotConfigured(format!("unknown LLM provider '{}'", id)))?,
            None => self
                .profiles
                .iter()
                .find(|p| p.matches_url(base_url))
                .cloned()
                .unwrap_or_else(ProviderProfile::generic),
        };

        if !base_url.trim().is_empty() {
            profile.base_url = base_url.trim().to_string();
        }
        if profile.base_url.is_empty() {
            return Err(LlmError::NotConfigured(
                "no base URL for the LLM endpoint".to_string(),
            ));
        }
        Ok(profile)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
