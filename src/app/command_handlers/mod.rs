use crate::app::cli::{help_text, parse_cli_verb, CliVerb};

pub mod catalog;
pub mod run;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Run => run::cmd_run(&args[1..]),
        CliVerb::Prompts => catalog::cmd_prompts(&args[1..]),
        CliVerb::Providers => catalog::cmd_providers(),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}
