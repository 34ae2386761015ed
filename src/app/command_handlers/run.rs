use crate::config::{
    default_global_config_path, ProviderSettings, Settings, WorkflowStep,
};
use crate::orchestration::{RunOutcome, RunRequest, RunState, WorkflowEngine};
use crate::provider::ProviderRegistry;
use crate::shared::ids::{PromptStyle, ProviderId};
use std::path::PathBuf;

/// Parsed `run` arguments. Flags override the matching settings fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunArgs {
    pub input: PathBuf,
    pub config: Option<PathBuf>,
    pub name: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_style: Option<String>,
    pub steps: Option<Vec<WorkflowStep>>,
    pub output: Option<PathBuf>,
}

pub fn parse_run_args(args: &[String]) -> Result<RunArgs, String> {
    let mut parsed = RunArgs::default();
    let mut input: Option<PathBuf> = None;
    let mut index = 0;
    while index < args.len() {
        let arg = args[index].as_str();
        if arg.starts_with("--") {
            let value = args
                .get(index + 1)
                .cloned()
                .ok_or_else(|| format!("`{arg}` requires a value"))?;
            match arg {
                "--config" => parsed.config = Some(PathBuf::from(value)),
                "--name" => parsed.name = Some(value),
                "--provider" => parsed.provider = Some(value),
                "--model" => parsed.model = Some(value),
                "--prompt-style" => parsed.prompt_style = Some(value),
                "--steps" => {
                    parsed.steps = Some(
                        WorkflowStep::parse_list(&value)
                            .map_err(|err| format!("invalid `--steps`: {err}"))?,
                    )
                }
                "--output" => parsed.output = Some(PathBuf::from(value)),
                other => return Err(format!("unknown option `{other}` for run")),
            }
            index += 2;
            continue;
        }
        if input.is_some() {
            return Err(format!("unexpected argument `{arg}`; run takes one input path"));
        }
        input = Some(PathBuf::from(arg));
        index += 1;
    }
    parsed.input = input.ok_or_else(|| "usage: run <input> [options]".to_string())?;
    Ok(parsed)
}

/// Loads settings from `--config`, else the global config file. Without any
/// file, `--provider` and `--model` together are enough to run on defaults.
pub fn resolve_settings(args: &RunArgs) -> Result<Settings, String> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_path(path).map_err(|err| err.to_string())?,
        None => {
            let global = default_global_config_path().ok().filter(|path| path.exists());
            match (global, &args.provider, &args.model) {
                (Some(path), _, _) => Settings::from_path(&path).map_err(|err| err.to_string())?,
                (None, Some(provider), Some(model)) => Settings::for_provider(
                    ProviderSettings::new(ProviderId::parse(provider)?, model.as_str()),
                ),
                (None, _, _) => {
                    return Err(
                        "no settings file found; pass --config <path> or both --provider and --model"
                            .to_string(),
                    )
                }
            }
        }
    };
    apply_overrides(&mut settings, args)?;
    settings.validate().map_err(|err| err.to_string())?;
    Ok(settings)
}

fn apply_overrides(settings: &mut Settings, args: &RunArgs) -> Result<(), String> {
    if let Some(name) = &args.name {
        settings.workflow.name = name.clone();
    }
    if let Some(raw) = &args.provider {
        let id = ProviderId::parse(raw)?;
        // Endpoint and key variable belong to the configured backend.
        if id != settings.provider.id {
            settings.provider.base_url = None;
            settings.provider.api_key_env = None;
            settings.provider.max_image_bytes = None;
        }
        settings.provider.id = id;
    }
    if let Some(model) = &args.model {
        settings.provider.model = model.clone();
    }
    if let Some(style) = &args.prompt_style {
        settings.provider.prompt_style = PromptStyle::parse(style)?;
    }
    if let Some(steps) = &args.steps {
        settings.workflow.steps = steps.clone();
    }
    if let Some(output) = &args.output {
        settings.output_root = output.clone();
    }
    Ok(())
}

pub fn cmd_run(args: &[String]) -> Result<String, String> {
    let run_args = parse_run_args(args)?;
    let settings = resolve_settings(&run_args)?;
    let registry = ProviderRegistry::from_settings(&settings.provider).map_err(|err| err.to_string())?;
    let request =
        RunRequest::from_settings(&settings, run_args.input.clone()).map_err(|err| err.to_string())?;
    let engine = WorkflowEngine::new(settings, registry);
    let outcome = engine.run(&request).map_err(|err| err.to_string())?;

    let summary = render_outcome(&outcome);
    match outcome.run.state {
        RunState::Aborted => Err(summary),
        _ => Ok(summary),
    }
}

pub fn render_outcome(outcome: &RunOutcome) -> String {
    let mut lines = vec![format!("run {} {}", outcome.run.run_id, outcome.run.state)];
    if let Some(fatal) = &outcome.run.fatal_error {
        lines.push(format!("aborted during {}: {}", fatal.step, fatal.message));
    }
    lines.push(outcome.report.render_text().trim_end().to_string());
    lines.push(format!("run_dir={}", outcome.run_dir.root().display()));
    lines.push(format!(
        "descriptions={}",
        outcome.run_dir.descriptions_path().display()
    ));
    lines.join("\n")
}
