#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Run,
    Prompts,
    Providers,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "run" => CliVerb::Run,
        "prompts" => CliVerb::Prompts,
        "providers" => CliVerb::Providers,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  run <input> [options]                Describe every image and video under <input>"
            .to_string(),
        "  prompts [--config <path>]            List available prompt styles".to_string(),
        "  providers                            List built-in vision providers".to_string(),
        "  help                                 Show this help".to_string(),
    ]
}

pub fn run_option_lines() -> Vec<String> {
    vec![
        "Run options:".to_string(),
        "  --config <path>                      Settings file (default ~/.vistaflow/config.yaml)"
            .to_string(),
        "  --name <name>                        Workflow name used in the run directory"
            .to_string(),
        "  --provider <id>                      ollama, openai or anthropic".to_string(),
        "  --model <model>                      Model name passed to the provider".to_string(),
        "  --prompt-style <style>               Prompt style, see `prompts`".to_string(),
        "  --steps <a,b,...>                    extract_video, convert, describe, report"
            .to_string(),
        "  --output <dir>                       Root directory for run directories".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    let mut lines = cli_help_lines();
    lines.push(String::new());
    lines.extend(run_option_lines());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_parse_and_unknown_falls_through() {
        assert_eq!(parse_cli_verb("run"), CliVerb::Run);
        assert_eq!(parse_cli_verb("--help"), CliVerb::Help);
        assert_eq!(parse_cli_verb("describe"), CliVerb::Unknown);
    }

    #[test]
    fn help_lists_every_run_option() {
        let help = help_text();
        for flag in [
            "--config",
            "--name",
            "--provider",
            "--model",
            "--prompt-style",
            "--steps",
            "--output",
        ] {
            assert!(help.contains(flag), "{flag}");
        }
    }
}
