// Prompt constants for every analysis agent.
// Templates use `{placeholder}` markers replaced with `str::replace` before sending.
// System prompts get `llm_client::prompts::JSON_ONLY_INSTRUCTION` appended by the agents.

/// System prompt for document classification.
pub const CLASSIFY_SYSTEM: &str =
    "You are a document classification expert. \
    Decide which single category best describes a document.";

/// Classification template. Replace `{categories}` and `{content}`.
pub const CLASSIFY_PROMPT_TEMPLATE: &str = r#"Classify the document below into exactly one of these categories:
{categories}

Return a JSON object with this EXACT schema:
{
  "primary_classification": "Resume",
  "confidence": 0.95,
  "reasoning": "One sentence explaining the choice."
}

DOCUMENT:
{content}"#;

/// System prompt for section splitting.
pub const SECTIONS_SYSTEM: &str =
    "You are an expert document layout analyst. \
    Split documents into their logical sections without rewriting any text.";

/// Section splitting template. Replace `{content}`.
pub const SECTIONS_PROMPT_TEMPLATE: &str = r#"Split the text below into its logical sections
(for a resume: SUMMARY, EXPERIENCE, EDUCATION, SKILLS, PROJECTS; for a job
description: ABOUT, RESPONSIBILITIES, REQUIREMENTS, BENEFITS).

Return a JSON object mapping each UPPERCASE section title to its verbatim text:
{
  "EXPERIENCE": "Senior Engineer, Acme Corp, 2020-2024 ...",
  "SKILLS": "Rust, PostgreSQL, Kubernetes"
}

Copy text verbatim. Do not summarise. Omit empty sections.

TEXT:
{content}"#;

/// System prompt for entity extraction.
pub const ENTITIES_SYSTEM: &str =
    "You are a precise information extraction engine for career documents. \
    Extract only entities that literally appear in the text.";

/// Entity extraction template. Replace `{section}`, `{context}` and `{content}`.
pub const ENTITIES_PROMPT_TEMPLATE: &str = r#"Extract entities from the "{section}" section below.
{context}
Return a JSON object with this EXACT schema (use empty lists when nothing applies):
{
  "companies": [],
  "dates": [],
  "skills": [],
  "job_titles": [],
  "technologies": [],
  "education_degrees": [],
  "universities": [],
  "achievements": [],
  "requirements": []
}

"requirements" is only for job descriptions: each explicit must-have or
nice-to-have, one short phrase per item.

SECTION TEXT:
{content}"#;

/// System prompt for relationship mapping.
pub const RELATIONSHIPS_SYSTEM: &str =
    "You are an expert technical recruiter. \
    Map a candidate's extracted entities onto a job's extracted requirements.";

/// Relationship mapping template. Replace `{profile_entities}` and `{target_entities}`.
pub const RELATIONSHIPS_PROMPT_TEMPLATE: &str = r#"Compare the candidate entities with the job entities.

CANDIDATE ENTITIES:
{profile_entities}

JOB ENTITIES:
{target_entities}

Return a JSON object with this EXACT schema (all four keys are required):
{
  "matched_skills": [
    {"resume_skill": "AWS", "jd_requirement": "Amazon Web Services", "confidence": 0.9, "reasoning": "Same cloud platform"}
  ],
  "matched_experience_to_responsibilities": [
    {"resume_experience_summary": "Led API team", "jd_responsibility": "Own backend services", "confidence": 0.8, "reasoning": "Ownership of services"}
  ],
  "identified_gaps_in_resume": [
    {"jd_requirement": "Kafka", "type": "skill_gap"}
  ],
  "strong_points_in_resume": ["Shipped a Rust service handling 10k rps"]
}"#;

/// System prompt for match scoring.
pub const SCORE_SYSTEM: &str =
    "You are a hiring manager scoring candidate fit. \
    Score strictly from the evidence provided.";

/// Match scoring template. Replace `{relationships}` and `{requirements}`.
pub const SCORE_PROMPT_TEMPLATE: &str = r#"Score how well the candidate matches the job.

RELATIONSHIP MAP:
{relationships}

JOB REQUIREMENTS:
{requirements}

Return a JSON object with this EXACT schema:
{
  "match_percentage": 72,
  "strength_summary": "Strong backend and cloud background.",
  "areas_for_improvement": ["No streaming experience"],
  "key_matched_skills": ["Rust", "AWS"],
  "overall_feedback": "Good fit for the core of the role."
}

match_percentage is an integer from 0 to 100."#;

/// System prompt for optimization suggestions.
pub const OPTIMIZE_SYSTEM: &str =
    "You are a senior resume coach. \
    Propose specific, truthful edits that improve a resume for one job. \
    Never invent experience.";

/// Optimization template. Replace `{relationships}`, `{match}` and `{sections}`.
pub const OPTIMIZE_PROMPT_TEMPLATE: &str = r#"Suggest resume improvements for the target job.

RELATIONSHIP MAP:
{relationships}

MATCH ANALYSIS:
{match}

RESUME SECTIONS:
{sections}

Return a JSON object with this EXACT schema:
{
  "suggestions": [
    {
      "type": "quantify",
      "target_section": "EXPERIENCE",
      "original_text_snippet": "Improved performance",
      "suggested_text": "Cut p99 latency by 40% by rewriting the cache layer",
      "reasoning": "The job stresses measurable performance work",
      "priority": "high"
    }
  ],
  "overall_feedback": "Lead with the infrastructure work."
}

type is one of: add, rephrase, quantify, highlight, remove, style_adjust.
priority is one of: critical, high, medium, low."#;
