// Tiered recovery of a verdict from free-form model output
use crate::model::{AnalysisVerdict, Recommendation, VerdictOrigin};
use crate::utils::preview;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{debug, warn};

const RATIONALE_KEYS: [&str; 4] = ["rationale", "comment", "analysis", "reason"];

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)["']?\bscore\b["']?\s*[:=：]\s*["']?(-?\d+(?:\.\d+)?)"#)
        .expect("score pattern is valid")
});

static RECOMMENDATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)["']?\brecommendation\b["']?\s*[:=：]\s*["']?(strong[\s_-]?buy|strong[\s_-]?sell|buy|hold|sell)"#)
        .expect("recommendation pattern is valid")
});

static RATIONALE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)["']?\b(?:rationale|comment|analysis|reason)\b["']?\s*[:=：]\s*"((?:[^"\\]|\\.)*)""#)
        .expect("rationale pattern is valid")
});

static CONFIDENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)["']?\bconfidence\b["']?\s*[:=：]\s*["']?(\d+(?:\.\d+)?)"#)
        .expect("confidence pattern is valid")
});

/// One independent recovery strategy.
pub trait VerdictParser: Send + Sync {
    fn origin(&self) -> VerdictOrigin;
    fn parse(&self, content: &str) -> Option<AnalysisVerdict>;
}

/// Whole reply is a JSON object, or an array whose first element is one.
pub struct StrictJsonParser;

/// JSON objects embedded in prose or code fences.
pub struct EmbeddedJsonParser;

/// Key/value recovery with regular expressions.
pub struct PatternParser;

impl VerdictParser for StrictJsonParser {
    fn origin(&self) -> VerdictOrigin {
        VerdictOrigin::Strict
    }

    fn parse(&self, content: &str) -> Option<AnalysisVerdict> {
        let value: Value = serde_json::from_str(content.trim()).ok()?;
        let obj = match &value {
            Value::Object(obj) => obj,
            Value::Array(items) => items.first()?.as_object()?,
            _ => return None,
        };
        verdict_from_object(obj, self.origin())
    }
}

impl VerdictParser for EmbeddedJsonParser {
    fn origin(&self) -> VerdictOrigin {
        VerdictOrigin::Extracted
    }

    fn parse(&self, content: &str) -> Option<AnalysisVerdict> {
        balanced_objects(content).into_iter().find_map(|candidate| {
            let value: Value = serde_json::from_str(candidate).ok()?;
            let obj = find_scored_object(&value)?;
            verdict_from_object(obj, self.origin())
        })
    }
}

impl VerdictParser for PatternParser {
    fn origin(&self) -> VerdictOrigin {
        VerdictOrigin::Pattern
    }

    fn parse(&self, content: &str) -> Option<AnalysisVerdict> {
        let score = SCORE_RE
            .captures(content)
            .and_then(|c| c[1].parse::<f64>().ok())
            .filter(|s| s.is_finite())?;
        let score = AnalysisVerdict::clamp_score(score);

        let recommendation = RECOMMENDATION_RE
            .captures(content)
            .map(|c| Recommendation::normalize(&c[1]))
            .unwrap_or_else(|| Recommendation::from_score(score));

        let rationale = RATIONALE_RE
            .captures(content)
            .map(|c| unescape_json_string(&c[1]))
            .unwrap_or_default();

        let confidence = CONFIDENCE_RE
            .captures(content)
            .and_then(|c| c[1].parse::<f64>().ok())
            .map(normalize_confidence);

        Some(AnalysisVerdict {
            score,
            recommendation,
            rationale,
            confidence,
            origin: self.origin(),
        })
    }
}

/// Ordered parser tiers; the first tier that yields a verdict wins.
pub struct ParserChain {
    parsers: Vec<Box<dyn VerdictParser>>,
}

impl Default for ParserChain {
    fn default() -> Self {
        Self {
            parsers: vec![
                Box::new(StrictJsonParser),
                Box::new(EmbeddedJsonParser),
                Box::new(PatternParser),
            ],
        }
    }
}

impl ParserChain {
    pub fn new(parsers: Vec<Box<dyn VerdictParser>>) -> Self {
        Self { parsers }
    }

    /// First verdict any tier recovers, or `None` when every tier gives up.
    pub fn try_parse(&self, content: &str) -> Option<AnalysisVerdict> {
        if content.trim().is_empty() {
            return None;
        }
        let verdict = self.parsers.iter().find_map(|parser| parser.parse(content))?;
        debug!(origin = %verdict.origin, score = verdict.score, "Verdict parsed");
        Some(verdict)
    }

    /// Never fails: unreadable content becomes the fallback verdict.
    pub fn parse(&self, content: &str) -> AnalysisVerdict {
        self.try_parse(content).unwrap_or_else(|| {
            warn!(content = %preview(content, 200), "Could not parse model reply, using fallback verdict");
            AnalysisVerdict::fallback("unparseable response")
        })
    }
}

pub fn parse_verdict(content: &str) -> AnalysisVerdict {
    ParserChain::default().parse(content)
}

fn verdict_from_object(obj: &Map<String, Value>, origin: VerdictOrigin) -> Option<AnalysisVerdict> {
    let score = obj.get("score").and_then(number_of)?;
    let score = AnalysisVerdict::clamp_score(score);

    let recommendation = match obj.get("recommendation").and_then(Value::as_str) {
        Some(label) => Recommendation::normalize(label),
        None => Recommendation::from_score(score),
    };

    let rationale = RATIONALE_KEYS
        .iter()
        .find_map(|key| obj.get(*key).filter(|v| !v.is_null()).map(text_of))
        .unwrap_or_default();

    let confidence = obj
        .get("confidence")
        .and_then(number_of)
        .map(normalize_confidence);

    Some(AnalysisVerdict {
        score,
        recommendation,
        rationale,
        confidence,
        origin,
    })
}

/// Depth-first search for the first object that carries a `score`.
fn find_scored_object(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(obj) if obj.get("score").and_then(number_of).is_some() => Some(obj),
        Value::Object(obj) => obj.values().find_map(find_scored_object),
        Value::Array(items) => items.iter().find_map(find_scored_object),
        _ => None,
    }
}

/// Top-level `{...}` spans; braces inside string literals do not count.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = idx;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }
    spans
}

fn number_of(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Values above 1 are read as percentages.
fn normalize_confidence(raw: f64) -> f64 {
    let c = if raw > 1.0 { raw / 100.0 } else { raw };
    c.clamp(0.0, 1.0)
}

fn unescape_json_string(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}
