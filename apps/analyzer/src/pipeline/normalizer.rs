//! Response Normalizer: pulls one JSON value out of free-form model text.
//!
//! Models wrap JSON in prose and markdown fences, or emit near-miss JSON.
//! Extraction is strict: strip fences, take the first balanced `{...}` / `[...]`
//! span, parse it. A reply with no opening bracket at all is an empty outcome
//! and is returned as is. A candidate that fails to parse gets one correction
//! round through the backend; a second failure is a `MalformedResponse`. Field
//! values are never guessed.

use std::future::Future;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::PipelineError;

/// Confidence multiplier for payloads that needed the correction round.
pub const REPAIRED_CONFIDENCE_FACTOR: f64 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// `None` when the reply carried no payload at all.
    pub value: Option<Value>,
    /// True when the payload only parsed after the correction round.
    pub repaired: bool,
}

impl Normalized {
    pub fn empty() -> Self {
        Self {
            value: None,
            repaired: false,
        }
    }

    /// The parsed payload, or a validation error naming `what` was expected.
    pub fn payload(&self, what: &str) -> Result<&Value, PipelineError> {
        self.value
            .as_ref()
            .ok_or_else(|| PipelineError::Validation(format!("{what}: no JSON payload in response")))
    }

    /// Scales an agent's base confidence down when the payload was repaired.
    pub fn confidence(&self, base: f64) -> f64 {
        if self.repaired {
            base * REPAIRED_CONFIDENCE_FACTOR
        } else {
            base
        }
    }
}

/// Removes every ``` fence line (with or without a language tag), keeping the
/// fenced content in place.
pub fn strip_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns the first balanced JSON object or array in `text`.
///
/// Brackets inside string literals are ignored. A mismatched closer or an
/// unterminated span yields `None`.
pub fn extract_payload(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut expected: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
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
            '"' => in_string = true,
            '{' => expected.push('}'),
            '[' => expected.push(']'),
            '}' | ']' => {
                if expected.pop() != Some(ch) {
                    return None;
                }
                if expected.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Fence-strip, extract, parse. No remote involvement.
///
/// `Ok(None)` means the text has no opening bracket. An unbalanced or
/// unparseable candidate is an error.
pub fn parse_strict(raw: &str) -> Result<Option<Value>, String> {
    let cleaned = strip_fences(raw);
    if !cleaned.contains(['{', '[']) {
        return Ok(None);
    }
    let payload = extract_payload(&cleaned).ok_or_else(|| "unbalanced JSON payload".to_string())?;
    serde_json::from_str(payload).map(Some).map_err(|e| e.to_string())
}

/// Normalizes `raw`, running `correct` at most once on the exact raw text when
/// a candidate payload fails to parse. A reply without any payload returns
/// [`Normalized::empty`] and never reaches `correct`.
pub async fn normalize<C, Fut>(raw: &str, correct: C) -> Result<Normalized, PipelineError>
where
    C: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<String, PipelineError>>,
{
    let first_error = match parse_strict(raw) {
        Ok(Some(value)) => {
            return Ok(Normalized {
                value: Some(value),
                repaired: false,
            })
        }
        Ok(None) => {
            debug!("Response carried no JSON payload");
            return Ok(Normalized::empty());
        }
        Err(e) => e,
    };

    debug!("Strict parse failed ({first_error}), requesting correction");

    let corrected = correct(raw.to_string()).await.map_err(|e| {
        warn!("Correction round failed: {e}");
        PipelineError::MalformedResponse(format!(
            "{first_error}; correction round failed: {e}"
        ))
    })?;

    match parse_strict(&corrected) {
        Ok(Some(value)) => Ok(Normalized {
            value: Some(value),
            repaired: true,
        }),
        Ok(None) => {
            warn!("Correction round returned no payload");
            Err(PipelineError::MalformedResponse(format!(
                "{first_error}; correction returned no JSON payload"
            )))
        }
        Err(second_error) => {
            warn!("Corrected response still unparseable: {second_error}");
            Err(PipelineError::MalformedResponse(format!(
                "{first_error}; after correction: {second_error}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    async fn never_called(_: String) -> Result<String, PipelineError> {
        panic!("correction must not run for clean input");
    }

    #[test]
    fn test_balanced_object_amid_noise_is_extracted_exactly() {
        let text = "Sure! Here you go: {\"a\": {\"b\": [1, 2]}} and some trailing words }";
        assert_eq!(extract_payload(text), Some("{\"a\": {\"b\": [1, 2]}}"));
    }

    #[test]
    fn test_brackets_inside_strings_are_ignored() {
        let text = r#"{"note": "use } and ] freely", "q": "say \"{\""}"#;
        assert_eq!(extract_payload(text), Some(text));
    }

    #[test]
    fn test_mismatched_closer_yields_none() {
        assert_eq!(extract_payload("{\"a\": [1, 2}"), None);
    }

    #[test]
    fn test_unterminated_yields_none() {
        assert_eq!(extract_payload("{\"a\": 1"), None);
        assert_eq!(extract_payload("no json here"), None);
    }

    #[test]
    fn test_array_payload_is_supported() {
        assert_eq!(extract_payload("list: [\"x\", {\"y\": 1}] done"), Some("[\"x\", {\"y\": 1}]"));
    }

    #[test]
    fn test_strip_fences_keeps_inner_content() {
        let text = "Here:\n```json\n{\"a\":1}\n```\nThanks";
        assert_eq!(strip_fences(text), "Here:\n{\"a\":1}\nThanks");
    }

    #[tokio::test]
    async fn test_fenced_payload_after_prose() {
        let raw = "Here is the result:\n```json\n{\"a\":1}\n```";
        let normalized = normalize(raw, never_called).await.unwrap();
        assert_eq!(normalized.value, Some(json!({"a": 1})));
        assert!(!normalized.repaired);
    }

    #[tokio::test]
    async fn test_fence_opened_on_prose_line() {
        let raw = "Here you go: ```json\n{\"a\":1}\n```";
        let normalized = normalize(raw, never_called).await.unwrap();
        assert_eq!(normalized.value, Some(json!({"a": 1})));
        assert!(!normalized.repaired);
        assert!((normalized.confidence(0.9) - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_correction_round_receives_exact_broken_text() {
        let raw = "{\"a\": 1,, \"b\": 2}";
        let seen = Cell::new(None);
        let normalized = normalize(raw, |broken| {
            seen.set(Some(broken));
            async { Ok("{\"a\": 1, \"b\": 2}".to_string()) }
        })
        .await
        .unwrap();

        assert_eq!(seen.take().as_deref(), Some(raw));
        assert_eq!(normalized.value, Some(json!({"a": 1, "b": 2})));
        assert!(normalized.repaired);
        assert!((normalized.confidence(0.9) - 0.765).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_payload_is_empty_without_correction() {
        let calls = Cell::new(0);
        let normalized = normalize("I could not do that.", |_| {
            calls.set(calls.get() + 1);
            async { Ok("{\"a\": 1}".to_string()) }
        })
        .await
        .unwrap();

        assert_eq!(calls.get(), 0);
        assert_eq!(normalized, Normalized::empty());
        assert!(matches!(
            normalized.payload("entities"),
            Err(PipelineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unbalanced_candidate_gets_correction() {
        let calls = Cell::new(0);
        let normalized = normalize("{\"a\": [1, 2}", |_| {
            calls.set(calls.get() + 1);
            async { Ok("{\"a\": [1, 2]}".to_string()) }
        })
        .await
        .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(normalized.value, Some(json!({"a": [1, 2]})));
        assert!(normalized.repaired);
    }

    #[tokio::test]
    async fn test_correction_without_payload_is_malformed() {
        let err = normalize("{broken", |_| async { Ok("Sorry, I can't.".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_second_failure_is_malformed() {
        let err = normalize("{broken", |_| async { Ok("still {broken".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_failed_correction_call_is_malformed() {
        let err = normalize("{broken", |_| async {
            Err(PipelineError::Transient("timeout".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
        assert!(err.to_string().contains("timeout"));
    }
}
