use super::ConfigError;
use std::collections::BTreeMap;

const DETAILED: &str = "Describe this image in detail. Cover the main subjects, their actions \
and expressions, the setting, notable objects, colors, lighting and overall mood. Mention any \
visible text verbatim.";

const CONCISE: &str = "Describe this image in one or two sentences, naming the main subject \
and setting.";

const NARRATIVE: &str = "Describe what is happening in this image as a short narrative: who or \
what is present, what they are doing, and what might have happened just before or after.";

const ARTISTIC: &str = "Describe this image as an art critic would: composition, framing, use \
of color and light, texture, and the emotional effect of the scene.";

const TECHNICAL: &str = "Describe the technical qualities of this image: apparent lens and \
focal length, depth of field, exposure, focus, noise, and any processing artifacts.";

const COLORFUL: &str = "Describe this image with an emphasis on its colors: the dominant \
palette, contrasts, gradients and how color shapes the mood of the scene.";

const SIMPLE: &str = "Say plainly what is in this image.";

pub const BUILTIN_PROMPT_STYLES: [(&str, &str); 7] = [
    ("detailed", DETAILED),
    ("concise", CONCISE),
    ("narrative", NARRATIVE),
    ("artistic", ARTISTIC),
    ("technical", TECHNICAL),
    ("colorful", COLORFUL),
    ("simple", SIMPLE),
];

/// Custom styles from settings shadow the built-in ones.
pub fn resolve_prompt(
    style: &str,
    custom: &BTreeMap<String, String>,
) -> Result<String, ConfigError> {
    if let Some(prompt) = custom.get(style) {
        return Ok(prompt.clone());
    }
    BUILTIN_PROMPT_STYLES
        .iter()
        .find(|(name, _)| *name == style)
        .map(|(_, prompt)| prompt.to_string())
        .ok_or_else(|| ConfigError::UnknownPromptStyle {
            style: style.to_string(),
            known: known_prompt_styles(custom).join(", "),
        })
}

pub fn known_prompt_styles(custom: &BTreeMap<String, String>) -> Vec<String> {
    let mut names = BUILTIN_PROMPT_STYLES
        .iter()
        .map(|(name, _)| name.to_string())
        .collect::<Vec<_>>();
    for name in custom.keys() {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_style_shadows_builtin() {
        let mut custom = BTreeMap::new();
        custom.insert("concise".to_string(), "tl;dr".to_string());
        assert_eq!(resolve_prompt("concise", &custom).expect("resolve"), "tl;dr");
        assert!(resolve_prompt("detailed", &custom)
            .expect("builtin")
            .starts_with("Describe this image in detail"));
    }

    #[test]
    fn unknown_style_lists_known_ones() {
        let err = resolve_prompt("poetic", &BTreeMap::new()).expect_err("unknown");
        let text = err.to_string();
        assert!(text.contains("poetic"));
        assert!(text.contains("narrative"));
    }
}
