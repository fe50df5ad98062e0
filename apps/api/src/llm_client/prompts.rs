// Prompt fragments shared by every LLM-backed collaborator.
// Each collaborator keeps its own prompt builder next to it.

/// System prompt that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Keeps generated claims inside what the candidate profile supports.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Only use facts present in the candidate profile provided. \
    Do NOT invent employers, titles, dates, degrees or skills. \
    If the profile does not support a claim, leave it out.";

/// Job descriptions can be huge; prompts only carry the head of them.
pub const MAX_DESCRIPTION_CHARS: usize = 6000;

pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
