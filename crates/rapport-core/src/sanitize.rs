//! Inbound text hygiene.
//!
//! Strips control characters and zero-width codepoints, neutralizes role
//! tags that could hijack the completion prompt, and caps runaway input
//! length. Never blocks a message — intent is preserved.

/// Longest inbound text the engine will process; the rest is dropped.
const MAX_INPUT_CHARS: usize = 4000;

/// Result of sanitizing an inbound message.
#[derive(Debug)]
pub struct SanitizeResult {
    /// The cleaned text.
    pub text: String,
    /// Whether anything was stripped or rewritten.
    pub was_modified: bool,
    /// Descriptions of what was changed.
    pub warnings: Vec<String>,
}

/// Sanitize user input before it reaches learning or the provider.
pub fn sanitize(input: &str) -> SanitizeResult {
    let mut warnings = Vec::new();

    // 1. Drop control characters (keep newline and tab) and zero-width
    //    codepoints sometimes used to smuggle hidden instructions.
    let stripped: String = input
        .chars()
        .filter(|c| {
            let control = c.is_control() && *c != '\n' && *c != '\t';
            let zero_width = matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}');
            !(control || zero_width)
        })
        .collect();
    if stripped.len() != input.len() {
        warnings.push("stripped control or zero-width characters".to_string());
    }

    // 2. Neutralize role tags by breaking them with a zero-width space.
    let role_tags = ["[System]", "[SYSTEM]", "<|system|>", "<|assistant|>", "<<SYS>>"];
    let mut text = stripped;
    for tag in &role_tags {
        if text.contains(tag) {
            let broken = format!("{}\u{200B}{}", &tag[..2], &tag[2..]);
            text = text.replace(tag, &broken);
            warnings.push(format!("neutralized role tag: {tag}"));
        }
    }

    // 3. Cap length.
    if text.chars().count() > MAX_INPUT_CHARS {
        text = text.chars().take(MAX_INPUT_CHARS).collect();
        warnings.push(format!("truncated input to {MAX_INPUT_CHARS} chars"));
    }

    let was_modified = !warnings.is_empty();
    SanitizeResult {
        text,
        was_modified,
        warnings,
    }
}
