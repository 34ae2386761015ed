pub mod error;
pub mod load;
pub mod paths;
pub mod prompts;
pub mod settings;

pub use error::ConfigError;
pub use load::load_settings;
pub use paths::{default_global_config_path, GLOBAL_SETTINGS_FILE_NAME, GLOBAL_STATE_DIR};
pub use prompts::{known_prompt_styles, resolve_prompt, BUILTIN_PROMPT_STYLES};
pub use settings::{
    ConvertSettings, ProviderConfig, ProviderSettings, ResumeSettings, RetrySettings, Settings,
    ValidationSettings, VideoSettings, WorkflowSettings, WorkflowStep, ALL_WORKFLOW_STEPS,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn minimal_yaml() -> &'static str {
        r#"
provider:
  id: ollama
  model: "llava:13b"
"#
    }

    #[test]
    fn minimal_settings_fill_in_defaults() {
        let settings: Settings = serde_yaml::from_str(minimal_yaml()).expect("parse");
        settings.validate().expect("valid");

        assert_eq!(settings.workflow.name, "workflow");
        assert_eq!(settings.workflow.steps, ALL_WORKFLOW_STEPS.to_vec());
        assert_eq!(settings.provider.prompt_style.as_str(), "detailed");
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.base_delay_ms, 2_000);
        assert_eq!(settings.retry.max_delay_ms, 8_000);
        assert!(!settings.retry.retry_empty_response);
        assert_eq!(settings.auth_abort_after, 3);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let settings: Settings = serde_yaml::from_str(
            r#"
provider:
  id: anthropic
  model: claude-sonnet
retry:
  max_attempts: 5
video:
  frame_interval_seconds: 2.5
"#,
        )
        .expect("parse");
        settings.validate().expect("valid");
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.base_delay_ms, 2_000);
        assert_eq!(settings.video.ffmpeg_binary, "ffmpeg");
        assert_eq!(settings.video.frame_interval_seconds, 2.5);
    }

    #[test]
    fn validation_rejects_inverted_backoff_and_unknown_prompt_style() {
        let mut settings: Settings = serde_yaml::from_str(minimal_yaml()).expect("parse");
        settings.retry.base_delay_ms = 10_000;
        let err = settings.validate().expect_err("inverted delays");
        assert!(err.to_string().contains("base_delay_ms"));

        let mut settings: Settings = serde_yaml::from_str(minimal_yaml()).expect("parse");
        settings.provider.prompt_style = crate::shared::ids::PromptStyle::parse("haiku").expect("id");
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::UnknownPromptStyle { .. })
        ));

        settings
            .prompts
            .insert("haiku".to_string(), "Describe in a haiku.".to_string());
        settings.validate().expect("custom style resolves");
        assert_eq!(
            settings.provider_config().expect("config").prompt,
            "Describe in a haiku."
        );
    }

    #[test]
    fn provider_id_with_underscore_fails_to_parse() {
        let err = serde_yaml::from_str::<Settings>(
            r#"
provider:
  id: open_ai
  model: gpt
"#,
        )
        .expect_err("invalid id");
        assert!(err.to_string().contains("invalid provider id"));
    }

    #[test]
    fn load_settings_reads_and_validates_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, minimal_yaml()).expect("write");
        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.provider.model, "llava:13b");

        fs::write(&path, "provider:\n  id: ollama\n  model: \"  \"\n").expect("write");
        assert!(matches!(load_settings(&path), Err(ConfigError::Settings(_))));

        let missing = dir.path().join("absent.yaml");
        assert!(matches!(load_settings(&missing), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn steps_parse_from_cli_list_and_normalize_order() {
        let steps = WorkflowStep::parse_list("report, describe,video,describe").expect("parse");
        assert_eq!(
            WorkflowStep::normalize(&steps),
            vec![
                WorkflowStep::ExtractVideo,
                WorkflowStep::Describe,
                WorkflowStep::Report
            ]
        );
        assert!(WorkflowStep::parse_list("describe,upload").is_err());
    }
}
