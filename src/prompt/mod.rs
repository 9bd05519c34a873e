use crate::wire::{Category, ChatMessage, RefinementRecord, Role};

const PATTERN_DESCRIPTIONS: &[(&str, &str)] = &[
    ("Alternative Approaches", "Presents multiple ways to solve or interpret a problem, offering diverse strategies or perspectives."),
    ("Game Play", "Frames the interaction or learning process as a game, using challenges, points, or rules to engage the user."),
    ("Persona", "Responds in the voice or style of a specific character, expert, or fictional identity to shape the tone and context."),
    ("Cognitive Verifier", "Checks for understanding by prompting users to confirm, explain, or reflect on the information presented."),
    ("Reflection", "Encourages users to think back on their experiences or reasoning to deepen understanding and self-awareness."),
    ("Flipped Interaction", "Reverses the roles by having the user teach, explain, or take the lead, prompting active learning."),
    ("Recipe", "Presents information or instructions as a step-by-step guide or procedure, like a recipe format."),
    ("Output Automater", "Automatically generates a specific output format (e.g., table, list, form) based on input or task context."),
    ("Context Manager", "Maintains, summarizes, or adjusts relevant information across turns to ensure coherent interactions."),
    ("Refusal Breaker", "Attempts to navigate around content restrictions or refusals while maintaining ethical guidelines."),
    ("Question Refinement", "Improves or rephrases a user's question to make it clearer, more precise, or more answerable."),
    ("Template", "Uses predefined structures or sentence frames to guide consistent responses or outputs."),
    ("Visualization Generator", "Creates visual representations such as charts, graphs, or conceptual diagrams from data or ideas."),
    ("Meta Language Creation", "Describes or creates language about language, focusing on categories, structures, or design patterns."),
    ("Infinite Generation", "Produces an open-ended stream of content, typically creative or exploratory, with no clear stopping point."),
    ("Fact Check List", "Verifies claims against known facts, offering a checklist or judgment of truthfulness with supporting evidence."),
];

/// Static description for a pattern name, or "" when the name is unknown.
pub fn pattern_description(name: &str) -> &'static str {
    PATTERN_DESCRIPTIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, d)| *d)
        .unwrap_or("")
}

pub fn decorate_category(mut category: Category) -> Category {
    for p in &mut category.patterns {
        p.description = pattern_description(&p.name).to_string();
    }
    category
}

pub fn decorate_record(mut record: RefinementRecord) -> RefinementRecord {
    record.categories = record.categories.into_iter().map(decorate_category).collect();
    record
}

pub fn system_prompt_validate() -> String {
    [
        "You are a prompt validator assistant.",
        "Prompt can be minimal: only invalidate when it's truly empty or contains harmful/malicious content.",
        "Favor valid=true for any non-empty, non-malicious input.",
        "Always respond with a JSON object: { \"valid\": boolean, \"reason\": string, \"feedback\": string }.",
        "If valid=true, feedback may offer optional enhancements; if valid=false, reason explains why and feedback suggests a fix.",
    ]
    .join(" ")
}

pub fn system_prompt_generate() -> String {
    [
        "You are a prompt generator.",
        "Based on a user's natural language input, return a clear and effective AI prompt tailored to their goal.",
        "Respond with a JSON object: { \"prompt\": string }.",
        "Do not include any extra text, just the prompt string.",
    ]
    .join(" ")
}

/// Text shown in place of the user's input while a Generate-style submit runs.
pub fn generate_banner(input: &str) -> String {
    format!("Generate an AI prompt with the following specifications: {input}")
}

const REWRITE_PREFIX: &str = "Rewrite the prompt above with this added instruction: ";

/// Conversation history as sent to the model: the first user turn carries
/// the rewrite instruction, everything else is passed through.
pub fn conversation_request(history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut out = history.to_vec();
    if let Some(first_user) = out.iter_mut().find(|m| m.role == Role::User) {
        first_user.content = format!("{REWRITE_PREFIX}{}", first_user.content);
    }
    out
}

/// A chat model the conversation can be pointed at.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub name: &'static str,
    pub family: &'static str,
    pub description: &'static str,
}

pub const MODELS: &[ModelInfo] = &[
    ModelInfo { name: "gpt-4o", family: "OpenAI", description: "General purpose multimodal model; default for refinement turns." },
    ModelInfo { name: "gpt-4.1", family: "OpenAI", description: "Strong instruction following and long-context comprehension." },
    ModelInfo { name: "gpt-4.1-mini", family: "OpenAI", description: "Lower latency and cost with GPT-4o class quality." },
    ModelInfo { name: "gpt-4.1-nano", family: "OpenAI", description: "Fastest, cheapest variant for lightweight rewrites." },
    ModelInfo { name: "o3", family: "OpenAI", description: "Reasoning model for multistep problems." },
    ModelInfo { name: "deepseek-coder", family: "DeepSeek", description: "Turns complex instructions into structured output." },
    ModelInfo { name: "llama-3-70b", family: "Meta LLaMA", description: "Open-ended dialogue and instruction following." },
    ModelInfo { name: "llama-3-8b", family: "Meta LLaMA", description: "Lightweight tasks and rapid inference." },
    ModelInfo { name: "grok-1", family: "xAI Grok", description: "Conversational reasoning with real-time knowledge." },
];

pub fn find_model(name: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Pattern;

    fn pattern(name: &str) -> Pattern {
        Pattern { id: name.into(), name: name.into(), feedback: String::new(), applied: false, description: String::new() }
    }

    #[test]
    fn known_and_unknown_pattern_names() {
        assert!(pattern_description("Persona").starts_with("Responds in the voice"));
        assert_eq!(pattern_description("Not A Pattern"), "");
    }

    #[test]
    fn decorate_fills_every_pattern() {
        let cat = Category {
            id: "c".into(),
            name: "Output Customization".into(),
            input: None,
            preview: String::new(),
            patterns: vec![pattern("Recipe"), pattern("Mystery")],
        };
        let cat = decorate_category(cat);
        assert!(cat.patterns[0].description.contains("step-by-step"));
        assert_eq!(cat.patterns[1].description, "");
    }

    #[test]
    fn only_first_user_turn_gets_the_rewrite_prefix() {
        let history = vec![
            ChatMessage::assistant("Explain photosynthesis simply."),
            ChatMessage::user("make it shorter"),
            ChatMessage::assistant("Explain photosynthesis."),
            ChatMessage::user("add an example"),
        ];
        let req = conversation_request(&history);
        assert_eq!(req[1].content, format!("{REWRITE_PREFIX}make it shorter"));
        assert_eq!(req[3].content, "add an example");
        assert_eq!(history[1].content, "make it shorter");
    }

    #[test]
    fn model_lookup_ignores_case() {
        assert_eq!(find_model("GPT-4o").map(|m| m.family), Some("OpenAI"));
        assert!(find_model("gpt-9").is_none());
    }
}
