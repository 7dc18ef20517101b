//! Prompt templates and prompt-shaping helpers.
//!
//! Generated prompts wrap the user's literal request in a strict template so
//! providers keep the requested subject instead of substituting a prettier
//! one. Templates live in `data/prompts/` and use `{{key}}` placeholders.

pub const LITERAL_SCENE: &str = include_str!("../data/prompts/literal_scene.txt");
pub const PHOTO_EDIT: &str = include_str!("../data/prompts/photo_edit.txt");
pub const GUARD_SYSTEM: &str = include_str!("../data/prompts/guard_system.txt");
pub const GUARD_USER: &str = include_str!("../data/prompts/guard_user.txt");

const DEFAULT_EDIT_CONTEXT: &str = "source photo with a clear main subject";
const DEFAULT_EDIT_INSTRUCTION: &str = "apply a careful artistic retouch to the photo";

/// Request-wrapper words stripped before the core scene is extracted.
/// Covers the greeting/verb/noun wrappers seen in real user requests,
/// Russian and English.
const REQUEST_WRAPPERS: &[&str] = &[
    "привет",
    "здравствуйте",
    "братка",
    "бро",
    "пожалуйста",
    "плиз",
    "pls",
    "please",
    "дай",
    "сделай",
    "сгенерируй",
    "создай",
    "нарисуй",
    "покажи",
    "выдай",
    "мне",
    "me",
    "картинку",
    "картинка",
    "изображение",
    "фото",
    "арт",
    "image",
    "picture",
];

/// Replace `{{key}}` placeholders in a template string.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.trim_end().to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{}}}}}", key), value);
    }
    result
}

/// Drop control characters, collapse whitespace, and clamp to `max_length`
/// characters. Returns an empty string for effectively empty input.
pub fn sanitize_user_input(text: &str, max_length: usize) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_length).collect::<String>().trim().to_string()
}

/// Extract the scene core from a raw request by stripping greeting and
/// "draw me a picture of" wrappers. Falls back to the sanitized input when
/// stripping leaves nothing.
fn extract_scene_core(text: &str) -> String {
    let sanitized = sanitize_user_input(text, 1500);
    if sanitized.is_empty() {
        return sanitized;
    }

    let core = sanitized
        .split_whitespace()
        .filter(|token| {
            let bare = token
                .trim_matches(|c: char| c.is_ascii_punctuation())
                .to_lowercase();
            !REQUEST_WRAPPERS.contains(&bare.as_str())
        })
        .collect::<Vec<_>>()
        .join(" ");
    let core = core.trim_matches(|c: char| " ,.!?-".contains(c)).to_string();

    if core.is_empty() {
        sanitized
    } else {
        core
    }
}

/// Normalize a raw user request into the strict literal-scene prompt.
///
/// `animal_allowed` reflects whether the literal request mentions an animal;
/// when it does not, the prompt forbids adding one.
pub fn literal_scene_prompt(user_text: &str, animal_allowed: bool) -> String {
    let core = extract_scene_core(user_text);
    if core.is_empty() {
        return core;
    }

    let mut prompt = render(LITERAL_SCENE, &[("request", &core)]);
    if !animal_allowed {
        prompt.push_str(" No animals or pets unless explicitly requested.");
    }
    prompt.push_str(" NEGATIVE: text, logo, watermark, captions.");
    sanitize_user_input(&prompt, 1800)
}

/// Build the "edit this photo" prompt: keep the source subject, apply only
/// the requested edits. `context` is a textual description of the source
/// photo when the caller has one.
pub fn photo_edit_prompt(instruction: &str, context: Option<&str>) -> String {
    let mut instruction = sanitize_user_input(instruction, 900);
    if instruction.is_empty() {
        instruction = DEFAULT_EDIT_INSTRUCTION.to_string();
    }
    let mut context = sanitize_user_input(context.unwrap_or(""), 1200);
    if context.is_empty() {
        context = DEFAULT_EDIT_CONTEXT.to_string();
    }

    let prompt = render(
        PHOTO_EDIT,
        &[("instruction", &instruction), ("context", &context)],
    );
    sanitize_user_input(&prompt, 1800)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_single_var() {
        assert_eq!(
            render("Hello {{name}}!", &[("name", "world")]),
            "Hello world!"
        );
    }

    #[test]
    fn test_prompts_are_non_empty() {
        assert!(!LITERAL_SCENE.is_empty());
        assert!(!PHOTO_EDIT.is_empty());
        assert!(!GUARD_SYSTEM.is_empty());
        assert!(!GUARD_USER.is_empty());
    }

    #[test]
    fn test_templates_have_placeholders() {
        assert!(LITERAL_SCENE.contains("{{request}}"));
        assert!(PHOTO_EDIT.contains("{{instruction}}"));
        assert!(PHOTO_EDIT.contains("{{context}}"));
    }

    #[test]
    fn test_sanitize_collapses_whitespace_and_clamps() {
        assert_eq!(sanitize_user_input("  a \t b \n c  ", 100), "a b c");
        assert_eq!(sanitize_user_input("abcdef", 3), "abc");
        assert_eq!(sanitize_user_input("\u{0}\u{1}", 10), "");
    }

    #[test]
    fn test_literal_scene_strips_request_wrappers() {
        let prompt = literal_scene_prompt("please draw me a picture of a red chair", true);
        assert!(prompt.contains("red chair"));
        assert!(!prompt.to_lowercase().contains("please"));
        assert!(prompt.contains("USER REQUEST (literal):"));
    }

    #[test]
    fn test_literal_scene_adds_no_animals_clause_when_not_requested() {
        let with_guard = literal_scene_prompt("a wooden table", false);
        assert!(with_guard.contains("No animals or pets"));

        let without_guard = literal_scene_prompt("a cat on a wooden table", true);
        assert!(!without_guard.contains("No animals or pets"));
    }

    #[test]
    fn test_literal_scene_always_appends_negative_block() {
        let prompt = literal_scene_prompt("a mountain lake", true);
        assert!(prompt.ends_with("NEGATIVE: text, logo, watermark, captions."));
    }

    #[test]
    fn test_literal_scene_falls_back_when_only_wrappers() {
        // A request made entirely of wrapper words keeps the sanitized input.
        let prompt = literal_scene_prompt("сделай картинку", true);
        assert!(prompt.contains("сделай картинку"));
    }

    #[test]
    fn test_photo_edit_prompt_defaults() {
        let prompt = photo_edit_prompt("", None);
        assert!(prompt.contains(DEFAULT_EDIT_CONTEXT));
        assert!(prompt.contains(DEFAULT_EDIT_INSTRUCTION));
    }

    #[test]
    fn test_photo_edit_prompt_uses_instruction_and_context() {
        let prompt = photo_edit_prompt("remove background", Some("a portrait on a street"));
        assert!(prompt.contains("EDIT REQUEST: remove background"));
        assert!(prompt.contains("SOURCE PHOTO CONTEXT: a portrait on a street"));
    }
}
