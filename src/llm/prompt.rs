// Prompt text and request envelope construction
use crate::llm::profile::{ProviderProfile, ResponseFormatHint, ResponseShape};
use crate::model::{BollingerBands, IndicatorSnapshot, InstrumentMeta, MacdValues};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const SYSTEM_PROMPT: &str = "You are a professional financial data analyst. \
Analyze the instrument described by the JSON the user sends: its identity, last close and \
daily change, the daily trend status, the moving averages, MACD, Bollinger bands and RSI \
values, and the list of technical signals. Weigh every signal, including neutral ones, \
and combine them into an objective view.\n\
Reply with a single JSON object and nothing else, using exactly these keys:\n\
- \"score\": number from 0 to 100, where 50 is neutral;\n\
- \"recommendation\": one of \"strongBuy\", \"buy\", \"hold\", \"sell\", \"strongSell\";\n\
- \"rationale\": one or two sentences of plain text (no nested JSON);\n\
- \"confidence\": number from 0 to 1.\n\
Example: {\"score\": 72, \"recommendation\": \"buy\", \"rationale\": \"Price holds above the 20 and 60 day averages and MACD just turned positive; watch volume.\", \"confidence\": 0.7}";

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Serialize)]
struct InstrumentPayload<'a> {
    symbol: &'a str,
    name: &'a str,
    kind: String,
    as_of: String,
    last_close: f64,
    change_pct: Option<f64>,
    trend: &'static str,
    moving_averages: &'a BTreeMap<usize, f64>,
    macd: &'a MacdValues,
    bollinger: &'a BollingerBands,
    rsi: &'a BTreeMap<usize, f64>,
    signals: &'a [String],
}

/// The user message: instrument identity and snapshot as pretty JSON.
pub fn user_content(meta: &InstrumentMeta, snapshot: &IndicatorSnapshot) -> String {
    let payload = InstrumentPayload {
        symbol: &meta.symbol,
        name: &meta.name,
        kind: meta.kind.to_string(),
        as_of: snapshot.as_of.to_string(),
        last_close: snapshot.last_close,
        change_pct: snapshot.change_pct.map(|c| (c * 100.0).round() / 100.0),
        trend: snapshot.trend.label(),
        moving_averages: &snapshot.moving_averages,
        macd: &snapshot.macd,
        bollinger: &snapshot.bollinger,
        rsi: &snapshot.rsi,
        signals: &snapshot.signals,
    };
    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| format!("{:?}", snapshot))
}

pub fn build_messages(meta: &InstrumentMeta, snapshot: &IndicatorSnapshot) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(&user_content(meta, snapshot)),
    ]
}

fn verdict_schema() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "analysis_verdict",
            "schema": {
                "type": "object",
                "properties": {
                    "score": {"type": "number", "description": "Overall score from 0 to 100, 50 is neutral"},
                    "recommendation": {
                        "type": "string",
                        "enum": ["strongBuy", "buy", "hold", "sell", "strongSell"]
                    },
                    "rationale": {"type": "string", "description": "Short plain-text trading comment"},
                    "confidence": {"type": "number", "description": "Confidence from 0 to 1"}
                },
                "required": ["score", "recommendation", "rationale"]
            }
        }
    })
}

/// Request body shaped by the profile's capabilities.
pub fn build_request(profile: &ProviderProfile, model: &str, messages: &[ChatMessage]) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(max_tokens) = profile.max_tokens {
            obj.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(temperature) = profile.temperature {
            obj.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = profile.top_p {
            obj.insert("top_p".into(), json!(top_p));
        }
        match profile.response_format {
            ResponseFormatHint::None => {}
            ResponseFormatHint::JsonObject => {
                obj.insert("response_format".into(), json!({"type": "json_object"}));
            }
            ResponseFormatHint::JsonSchema => {
                obj.insert("response_format".into(), verdict_schema());
            }
        }
        if profile.response_shape == ResponseShape::OllamaChat {
            obj.insert("stream".into(), json!(false));
        }
    }
    body
}
