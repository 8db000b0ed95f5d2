//! Prompt text shared by the conversation pipeline
//!
//! Recipe-specific prompts live next to their recipes in `artifacts`.

use lectern_common::config::PersonaConfig;

/// Returned in place of an answer when generation fails
pub const GENERATION_FALLBACK: &str =
    "Hmm, I'm having a little trouble with that right now. Can we try a different question?";

/// Returned when a turn aborts (retrieval or persistence failure)
pub const TURN_FAILURE_APOLOGY: &str =
    "I seem to be having a little brain freeze! Let's chat again in a moment?";

/// Caller-facing message when a turn could not be saved
pub const PERSISTENCE_WARNING: &str =
    "This conversation turn could not be saved, so your message may not be remembered.";

/// Caller-facing message when grounding failed
pub const RETRIEVAL_WARNING: &str = "Course material could not be searched for this question.";

/// Heading placed above retrieved chunk text
pub const CONTEXT_HEADING: &str = "## Course context";

pub const CONTEXTUALIZE_INSTRUCTION: &str = "\
You are rewriting a student's latest message so it can be used as a search query.
Use the conversation history to resolve references such as \"it\", \"that topic\" or \
\"what I told you earlier\", including personal details the student has shared.
Return only the rewritten, self-contained question. Do not answer it.
If the message is already self-contained, return it unchanged.";

const TUTORING_RULES: &str = "\
Follow these guidelines in all your responses:
1. Only respond to queries about programming, machine learning, data science or closely related technical fields. Politely decline anything else.
2. Never give direct answers to questions that look like assignment, quiz or exam items. Point to the week whose lecture covers the topic, give at most one or two sentences of guidance, and ask the student to come back with a conceptual question after reviewing.
3. Prefer directing students to course materials over long explanations, and name the week that covers the topic.
4. Keep a professional but supportive tone, like a helpful professor during office hours.
5. Ask focused follow-up questions that guide students toward discovering solutions themselves.
6. Never include code that directly solves an assignment problem; code examples only illustrate general concepts.
7. Remember what the student has told you earlier in the conversation and use it when relevant.
8. Format responses in Markdown with headers, lists, code blocks and tables where they help.";

/// System prompt for conversational answers
pub fn persona(config: &PersonaConfig) -> String {
    let mut prompt = format!(
        "Your name is {name}. You are a knowledgeable, approachable virtual tutor for students of the {course} course.\n\n{rules}",
        name = config.assistant_name,
        course = config.course_name,
        rules = TUTORING_RULES,
    );

    if let Some(outline) = config
        .course_outline
        .as_deref()
        .filter(|o| !o.trim().is_empty())
    {
        prompt.push_str("\n\nCourse curriculum:\n");
        prompt.push_str(outline.trim());
    }

    prompt
}

/// Join chunk texts in retrieval order
pub fn join_context<'a>(texts: impl IntoIterator<Item = &'a str>, separator: &str) -> String {
    texts
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Cut `text` to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_includes_name_and_outline() {
        let config = PersonaConfig {
            assistant_name: "Kia".to_string(),
            course_name: "MLP".to_string(),
            course_outline: Some("## Week 4\n- Linear regression".to_string()),
        };
        let prompt = persona(&config);
        assert!(prompt.starts_with("Your name is Kia."));
        assert!(prompt.contains("## Week 4"));

        let bare = persona(&PersonaConfig { course_outline: None, ..config });
        assert!(!bare.contains("Course curriculum"));
    }

    #[test]
    fn test_join_context_keeps_order_and_skips_blanks() {
        let joined = join_context(["b", "  ", "a"], "\n\n");
        assert_eq!(joined, "b\n\na");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
