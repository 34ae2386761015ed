use crate::config::{
    default_global_config_path, known_prompt_styles, resolve_prompt, Settings,
};
use crate::provider::anthropic::{
    default_anthropic_limits, DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_ANTHROPIC_KEY_ENV,
};
use crate::provider::ollama::{default_ollama_limits, DEFAULT_OLLAMA_BASE_URL};
use crate::provider::openai::{default_openai_limits, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_KEY_ENV};
use crate::provider::types::format_bytes;
use crate::provider::ProviderLimits;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Prompt styles, including custom ones from `--config` or the global file.
pub fn cmd_prompts(args: &[String]) -> Result<String, String> {
    let custom = match args {
        [] => match default_global_config_path().ok().filter(|path| path.exists()) {
            Some(path) => Settings::from_path(&path).map_err(|err| err.to_string())?.prompts,
            None => BTreeMap::new(),
        },
        [flag, path] if flag == "--config" => {
            Settings::from_path(&PathBuf::from(path))
                .map_err(|err| err.to_string())?
                .prompts
        }
        _ => return Err("usage: prompts [--config <path>]".to_string()),
    };

    let mut lines = Vec::new();
    for style in known_prompt_styles(&custom) {
        let prompt = resolve_prompt(&style, &custom).map_err(|err| err.to_string())?;
        let marker = if custom.contains_key(&style) { " (custom)" } else { "" };
        lines.push(format!("{style}{marker}: {prompt}"));
    }
    Ok(lines.join("\n"))
}

pub fn cmd_providers() -> Result<String, String> {
    let rows: [(&str, &str, &str, ProviderLimits); 3] = [
        ("ollama", DEFAULT_OLLAMA_BASE_URL, "none", default_ollama_limits()),
        (
            "openai",
            DEFAULT_OPENAI_BASE_URL,
            DEFAULT_OPENAI_KEY_ENV,
            default_openai_limits(),
        ),
        (
            "anthropic",
            DEFAULT_ANTHROPIC_BASE_URL,
            DEFAULT_ANTHROPIC_KEY_ENV,
            default_anthropic_limits(),
        ),
    ];
    Ok(rows
        .iter()
        .map(|(id, url, key_env, limits)| {
            format!(
                "{id}: url={url} key_env={key_env} formats={} max_bytes={} max_dimension={}",
                limits.format_names(),
                format_bytes(limits.max_bytes),
                limits.max_dimension
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn prompts_marks_custom_styles() {
        let dir = tempdir().expect("tempdir");
        let config = dir.path().join("config.yaml");
        fs::write(
            &config,
            "provider:\n  id: ollama\n  model: llava\nprompts:\n  inventory: List every object.\n",
        )
        .expect("write");
        let out = cmd_prompts(&["--config".to_string(), config.display().to_string()])
            .expect("prompts");
        assert!(out.contains("inventory (custom): List every object."));
        assert!(out.lines().any(|line| line.starts_with("detailed: ")));
    }

    #[test]
    fn providers_lists_every_builtin() {
        let out = cmd_providers().expect("providers");
        for id in crate::provider::BUILTIN_PROVIDER_IDS {
            assert!(out.lines().any(|line| line.starts_with(&format!("{id}:"))), "{id}");
        }
        assert!(out.contains(DEFAULT_ANTHROPIC_KEY_ENV));
    }
}
