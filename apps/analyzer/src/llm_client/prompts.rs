// Shared prompt fragments used across agents.
// Each agent's own prompts live in agents/prompts.rs.

/// Appended to every agent system prompt.
pub const JSON_ONLY_INSTRUCTION: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// System prompt for the one-shot correction round of the response normalizer.
pub const CORRECTION_SYSTEM: &str = "You are a JSON repair tool. \
    You receive text that was supposed to be a single JSON value but is malformed. \
    Fix unescaped characters, missing commas, unbalanced brackets and stray prose. \
    Never add, remove or change field values beyond what is needed to make the JSON valid. \
    Return ONLY the corrected JSON.";

/// Builds the correction request for the exact broken text.
pub fn correction_prompt(broken: &str) -> String {
    format!(
        "The following text is not a valid JSON object. \
         Please correct any errors and return ONLY the perfectly formatted JSON object.\n\n\
         --- BROKEN TEXT ---\n{broken}\n--- END BROKEN TEXT ---"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correction_prompt_embeds_broken_text_verbatim() {
        let broken = "{\"a\": 1,, }";
        let prompt = correction_prompt(broken);
        assert!(prompt.contains("--- BROKEN TEXT ---\n{\"a\": 1,, }\n--- END BROKEN TEXT ---"));
    }
}
