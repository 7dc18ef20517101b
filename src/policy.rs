//! Prompt classification heuristics and the model selection policy.
//!
//! Everything here is a pure function over the prompt text and the enabled
//! model list, so word lists can grow without touching dispatch control
//! flow. The ordering produced is a heuristic tie-break: it decides which
//! model is tried first, never correctness.

use crate::catalog;
use crate::prompts::sanitize_user_input;

/// Substrings that mark a prompt as requesting an animal subject. Russian
/// stems match their inflected forms.
const ANIMAL_WORDS: &[&str] = &[
    "кот", "кошка", "кошк", "cat", "kitten", "собак", "dog", "puppy", "птиц", "bird", "лошад",
    "horse", "медвед", "bear", "животн", "animal",
];

/// Substrings that mark an object/product scene (furnishings, materials,
/// product nouns). These prompts prefer models that keep literal product
/// framing.
const OBJECT_SCENE_WORDS: &[&str] = &[
    "обои", "рулон", "валик", "ролик", "краск", "стол", "предмет", "product",
];

/// Preference order for object/product scenes without animals: providers
/// known to preserve literal framing first, free fallback last.
const OBJECT_SCENE_ORDER: &[&str] = &[
    "lucid-origin",
    "phoenix-1.0",
    "flux-2-dev",
    "flux",
    "grok-2-image",
    catalog::FREE_IMAGE_MODEL,
];

/// General-purpose preference order, free fallback last.
const GENERAL_ORDER: &[&str] = &[
    "flux",
    "flux-2-dev",
    "grok-2-image",
    "phoenix-1.0",
    "lucid-origin",
    catalog::FREE_IMAGE_MODEL,
];

/// Does the literal user prompt ask for an animal subject?
pub fn prompt_requests_animal(prompt: &str) -> bool {
    let t = prompt.to_lowercase();
    ANIMAL_WORDS.iter().any(|w| t.contains(w))
}

/// Does the prompt describe an object/product scene rather than a general
/// one?
pub fn is_object_scene(prompt: &str) -> bool {
    let t = prompt.to_lowercase();
    OBJECT_SCENE_WORDS.iter().any(|w| t.contains(w))
}

/// Ordered model preference for the given scene classification.
pub fn preference_order(object_scene_without_animal: bool) -> &'static [&'static str] {
    if object_scene_without_animal {
        OBJECT_SCENE_ORDER
    } else {
        GENERAL_ORDER
    }
}

fn is_usable(model: &str, enabled: &[String]) -> bool {
    catalog::is_image_model(model) && enabled.iter().any(|m| m == model)
}

/// Build the ordered candidate list the dispatcher will walk for one
/// request.
///
/// An explicitly requested model wins the front spot when it is enabled and
/// image-capable; the user's stored preferred model comes next; then the
/// heuristic preference order, filtered to enabled image models. Returns an
/// empty plan when no image model is enabled at all.
pub fn build_model_plan(
    prompt: &str,
    requested: Option<&str>,
    preferred: Option<&str>,
    enabled: &[String],
) -> Vec<String> {
    let mut plan: Vec<String> = Vec::new();

    for pinned in [requested, preferred].into_iter().flatten() {
        if is_usable(pinned, enabled) && !plan.iter().any(|m| m == pinned) {
            plan.push(pinned.to_string());
        }
    }

    let object_scene = is_object_scene(prompt) && !prompt_requests_animal(prompt);
    for candidate in preference_order(object_scene) {
        if is_usable(candidate, enabled) && !plan.iter().any(|m| m == candidate) {
            plan.push(candidate.to_string());
        }
    }

    plan
}

/// First model the policy would pick, or `None` when no image model is
/// enabled.
pub fn select_model(
    prompt: &str,
    requested: Option<&str>,
    preferred: Option<&str>,
    enabled: &[String],
) -> Option<String> {
    build_model_plan(prompt, requested, preferred, enabled)
        .into_iter()
        .next()
}

/// Re-prompt after the guard flagged an animal: append an explicit negative
/// instruction to the already-templated base prompt, strengthened from the
/// second attempt on. The template framing is kept so retries stay literal.
pub fn no_animals_retry_prompt(base_prompt: &str, attempt: u32) -> String {
    let mut base = sanitize_user_input(base_prompt, 1800);
    if !base.ends_with('.') {
        base.push('.');
    }
    let mut suffix = String::from(
        " STRICT: no animals, no pets, no cats, no dogs, no birds. \
         If any animal appears, regenerate the scene without animals.",
    );
    if attempt >= 2 {
        suffix.push_str(" Focus only on requested objects and environment.");
    }
    format!("{}{}", base, suffix)
}
