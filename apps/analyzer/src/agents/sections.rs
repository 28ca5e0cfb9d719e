//! Section splitter: chunks one document on line boundaries, asks the backend
//! to split every chunk concurrently, and merges the parts in chunk order.
//!
//! This phase never fails: a chunk whose call fails (or returns nothing
//! usable) is kept whole under `full_content`.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::agents::prompts::{SECTIONS_PROMPT_TEMPLATE, SECTIONS_SYSTEM};
use crate::agents::{system_prompt, Agent};
use crate::errors::PipelineError;
use crate::pipeline::merge::merge_sections;
use crate::pipeline::models::{CapabilityDescriptor, PhaseResult, PhaseTag, PipelineState, META_DOCUMENT};
use crate::pipeline::normalizer::Normalized;
use crate::pipeline::remote::RemoteCall;

/// Section key used when a chunk could not be split.
pub const FULL_CONTENT_KEY: &str = "full_content";

const SPLIT_CONFIDENCE: f64 = 0.9;
const DEGRADED_CONFIDENCE: f64 = 0.5;

/// Splits `text` into chunks of at most `max_chars` characters, breaking only
/// between lines. A single line longer than the limit is split on char
/// boundaries.
pub fn chunk_lines(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();

        if current_len + line_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        current.push_str(line);
        current_len += line_len;
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

pub struct SectionAgent {
    remote: RemoteCall,
    chunk_chars: usize,
}

struct ChunkOutcome {
    sections: Map<String, Value>,
    degraded: bool,
    repaired: bool,
}

impl SectionAgent {
    pub fn new(remote: RemoteCall, chunk_chars: usize) -> Self {
        Self {
            remote,
            chunk_chars,
        }
    }

    async fn split_chunk(&self, index: usize, chunk: &str) -> ChunkOutcome {
        let prompt = SECTIONS_PROMPT_TEMPLATE.replace("{content}", chunk);
        let outcome = self
            .remote
            .ask_json(&system_prompt(SECTIONS_SYSTEM), &prompt)
            .await
            .and_then(usable_sections);

        match outcome {
            Ok((sections, repaired)) => ChunkOutcome {
                sections,
                degraded: false,
                repaired,
            },
            Err(e) => {
                warn!("Chunk {index} kept whole: {e}");
                let mut sections = Map::new();
                sections.insert(FULL_CONTENT_KEY.to_string(), Value::String(chunk.to_string()));
                ChunkOutcome {
                    sections,
                    degraded: true,
                    repaired: false,
                }
            }
        }
    }
}

/// Accepts a non-empty JSON object with at least one non-blank body.
fn usable_sections(normalized: Normalized) -> Result<(Map<String, Value>, bool), PipelineError> {
    let Normalized { value, repaired } = normalized;
    let raw = match value {
        Some(Value::Object(raw)) => raw,
        Some(_) => {
            return Err(PipelineError::Validation("sections must be a JSON object".to_string()))
        }
        None => {
            return Err(PipelineError::Validation(
                "sections: no JSON payload in response".to_string(),
            ))
        }
    };

    let mut sections = Map::new();
    merge_sections(&mut sections, raw);
    if sections.is_empty() {
        return Err(PipelineError::Validation("no sections returned".to_string()));
    }
    Ok((sections, repaired))
}

#[async_trait]
impl Agent for SectionAgent {
    fn phase(&self) -> PhaseTag {
        PhaseTag::SplitSections
    }

    async fn process(&self, state: &PipelineState) -> PhaseResult {
        let chunks = chunk_lines(&state.content, self.chunk_chars);
        if chunks.is_empty() {
            return PhaseResult::failure(PhaseTag::SplitSections, "document is empty");
        }

        let outcomes = join_all(
            chunks
                .iter()
                .enumerate()
                .map(|(index, chunk)| self.split_chunk(index, chunk)),
        )
        .await;

        let degraded = outcomes.iter().filter(|o| o.degraded).count();
        let repaired = outcomes.iter().any(|o| o.repaired);

        let mut merged = Map::new();
        for outcome in outcomes {
            merge_sections(&mut merged, outcome.sections);
        }

        info!(
            "Split {} document into {} section(s) from {} chunk(s), {} degraded",
            state.meta_str(META_DOCUMENT).unwrap_or("unnamed"),
            merged.len(),
            chunks.len(),
            degraded
        );

        let confidence = match (degraded, repaired) {
            (0, false) => SPLIT_CONFIDENCE,
            (0, true) => SPLIT_CONFIDENCE * crate::pipeline::normalizer::REPAIRED_CONFIDENCE_FACTOR,
            _ => DEGRADED_CONFIDENCE,
        };
        PhaseResult::success(PhaseTag::SplitSections, Value::Object(merged), confidence)
    }

    fn describe(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "section_splitter".to_string(),
            phase: PhaseTag::SplitSections,
            description: format!(
                "Splits each document into titled sections, {} chars per chunk",
                self.chunk_chars
            ),
            inputs: vec!["document content".to_string()],
            outputs: vec!["section title -> section text".to_string()],
            strategy: self.remote.strategy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::fake::{FakeBackend, Reply};
    use crate::pipeline::invoker::CallBudget;
    use serde_json::json;
    use std::sync::Arc;

    fn agent(fake: FakeBackend, chunk_chars: usize) -> SectionAgent {
        SectionAgent::new(
            RemoteCall::new(Some(Arc::new(fake)), CallBudget::from_secs(1, 2, 0), "sections"),
            chunk_chars,
        )
    }

    #[test]
    fn test_chunks_break_on_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc\n";
        let chunks = chunk_lines(text, 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc\n"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_overlong_line_is_hard_split() {
        let chunks = chunk_lines("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(chunk_lines("  \n\n", 100).is_empty());
    }

    #[tokio::test]
    async fn test_chunks_merge_in_order_with_shared_titles_joined() {
        let fake = FakeBackend::named("fake")
            .rule("", "first", Reply::text(r#"{"EXPERIENCE": "first job"}"#))
            .rule("", "second", Reply::text(r#"{"EXPERIENCE": "second job", "SKILLS": "Rust"}"#));
        let state = PipelineState::new("u", "d", "first part\nsecond part\n", "txt");

        let result = agent(fake, 12).process(&state).await;
        assert!(result.success);
        assert_eq!(
            result.data,
            json!({"EXPERIENCE": "first job\n\nsecond job", "SKILLS": "Rust"})
        );
        assert_eq!(result.confidence, SPLIT_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_failed_chunk_degrades_to_full_content() {
        let fake = FakeBackend::named("fake")
            .rule("", "first", Reply::text(r#"{"SUMMARY": "hello"}"#))
            .fallback(Reply::Reject);
        let state = PipelineState::new("u", "d", "first part\nsecond part\n", "txt");

        let result = agent(fake, 12).process(&state).await;
        assert!(result.success);
        assert_eq!(result.data["SUMMARY"], "hello");
        assert_eq!(result.data[FULL_CONTENT_KEY], "second part\n");
        assert_eq!(result.confidence, DEGRADED_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_empty_object_degrades() {
        let fake = FakeBackend::named("fake").fallback(Reply::text("{}"));
        let state = PipelineState::new("u", "d", "only text", "txt");
        let result = agent(fake, 100).process(&state).await;
        assert_eq!(result.data, json!({ FULL_CONTENT_KEY: "only text" }));
    }
}
