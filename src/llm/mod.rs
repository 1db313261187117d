// LLM module: provider profiles, prompt construction, transport and reply parsing.

pub mod parser;
pub mod profile;
pub mod prompt;
pub mod transport;

pub use parser::{ParserChain, VerdictParser, parse_verdict};
pub use profile::{ProviderProfile, ProviderRegistry, ResponseFormatHint, ResponseShape};
pub use transport::{CompletionTransport, HttpCompletionTransport};

use crate::config::LlmConfig;
use crate::model::{AnalysisVerdict, IndicatorSnapshot, InstrumentMeta, LlmError};
use crate::retry::{Exhausted, RetryPolicy, retry_with_backoff};
use crate::utils::preview;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Completion texts of every candidate, in order, at the location the profile's
/// response shape names. Content given as a list of parts is joined.
pub fn extract_candidates(shape: ResponseShape, raw: &str) -> Vec<String> {
    let Ok(envelope) = serde_json::from_str::<Value>(raw) else {
        return Vec::new();
    };
    let texts: Vec<Option<String>> = match shape {
        ResponseShape::ChatCompletions => choices(&envelope)
            .map(|choice| choice.pointer("/message/content").and_then(content_text))
            .collect(),
        ResponseShape::TextCompletions => choices(&envelope)
            .map(|choice| choice.get("text").and_then(content_text))
            .collect(),
        ResponseShape::OllamaChat => vec![envelope.pointer("/message/content").and_then(content_text)],
    };
    texts
        .into_iter()
        .flatten()
        .filter(|text| !text.trim().is_empty())
        .collect()
}

fn choices(envelope: &Value) -> impl Iterator<Item = &Value> {
    envelope
        .get("choices")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// A plain string, or `[{"type": "text", "text": ...}, ...]` parts joined by newlines.
fn content_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(text) => Some(text.as_str()),
                    other => other.get("text").and_then(Value::as_str),
                })
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
        _ => None,
    }
}

/// Turns an instrument and its indicator snapshot into a verdict via the configured endpoint.
pub struct LlmAnalyzer {
    profile: ProviderProfile,
    model: String,
    api_key: String,
    retry: RetryPolicy,
    transport: Arc<dyn CompletionTransport>,
    parsers: ParserChain,
}

impl LlmAnalyzer {
    pub fn new(
        profile: ProviderProfile,
        model: &str,
        api_key: &str,
        retry: RetryPolicy,
        transport: Arc<dyn CompletionTransport>,
    ) -> Self {
        Self {
            profile,
            model: model.to_string(),
            api_key: api_key.to_string(),
            retry,
            transport,
            parsers: ParserChain::default(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let mut registry = ProviderRegistry::builtin();
        for profile in &config.profiles {
            registry.register(profile.clone());
        }
        let profile = registry.resolve(config.provider.as_deref(), &config.base_url)?;
        info!(provider = %profile.id, endpoint = %profile.endpoint(), model = %config.model, "🤖 LLM provider resolved");

        let transport = Arc::new(HttpCompletionTransport::new(config.retry.request_timeout())?);
        Ok(Self::new(
            profile,
            &config.model,
            &config.api_key,
            config.retry.clone(),
            transport,
        ))
    }

    pub fn provider_id(&self) -> &str {
        &self.profile.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Transport failures are retried and surface as `Exhausted`; unreadable replies
    /// become the fallback verdict.
    pub async fn analyze(
        &self,
        meta: &InstrumentMeta,
        snapshot: &IndicatorSnapshot,
    ) -> Result<AnalysisVerdict, LlmError> {
        let messages = prompt::build_messages(meta, snapshot);
        let body = prompt::build_request(&self.profile, &self.model, &messages);
        let endpoint = self.profile.endpoint();
        let timeout = self.retry.request_timeout();

        let transport = self.transport.as_ref();
        let (endpoint_ref, api_key, body_ref) = (endpoint.as_str(), self.api_key.as_str(), &body);
        let raw = retry_with_backoff(
            &self.retry,
            &self.profile.id,
            move |_| async move {
                match tokio::time::timeout(timeout, transport.send(endpoint_ref, api_key, body_ref)).await {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout),
                }
            },
            LlmError::is_retryable,
        )
        .await
        .map_err(|Exhausted { attempts, error }| LlmError::Exhausted {
            attempts,
            last: error.to_string(),
        })?;

        let verdict = self.parse_reply(meta, &raw);
        info!(
            symbol = %meta.symbol,
            provider = %self.profile.id,
            score = verdict.score,
            recommendation = %verdict.recommendation,
            origin = %verdict.origin,
            "🧠 LLM verdict received"
        );
        Ok(verdict)
    }

    /// Tries each candidate completion in order; without any, the raw body itself.
    fn parse_reply(&self, meta: &InstrumentMeta, raw: &str) -> AnalysisVerdict {
        let candidates = extract_candidates(self.profile.response_shape, raw);
        if let Some(verdict) = candidates
            .iter()
            .find_map(|content| self.parsers.try_parse(content))
        {
            return verdict;
        }
        if candidates.is_empty() {
            debug!(symbol = %meta.symbol, provider = %self.profile.id, "No completion in reply envelope, parsing raw body");
            if let Some(verdict) = self.parsers.try_parse(raw) {
                return verdict;
            }
        }
        warn!(
            symbol = %meta.symbol,
            provider = %self.profile.id,
            candidates = candidates.len(),
            reply = %preview(raw, 200),
            "Could not parse model reply, using fallback verdict"
        );
        AnalysisVerdict::fallback("unparseable response")
    }
}
