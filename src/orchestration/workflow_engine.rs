use crate::config::{ProviderConfig, Settings, WorkflowStep};
use crate::failure::{FailureCategory, FailureRecord, ProviderFailure, ValidationReason};
use crate::item::{DescriptionResult, ItemKind, WorkItem};
use crate::media::{
    discover_media, effective_limits, validate_image, Conversion, Converter, FrameExtractor,
};
use crate::orchestration::descriptions::{read_entries, DescriptionWriter};
use crate::orchestration::error::OrchestratorError;
use crate::orchestration::failure_aggregator::{FailureAggregator, FailureReport};
use crate::orchestration::metadata_store::{
    RunCounts, RunState, StepFatal, WorkflowMetadataStore, WorkflowRun,
};
use crate::orchestration::report::{write_failure_report, write_html_index};
use crate::orchestration::run_dir::{RunDirectory, RunName, DESCRIPTIONS_FILE};
use crate::provider::{
    Dispatcher, GenerationParams, ImagePayload, ProviderRegistry, ProviderRequest, RetryPolicy,
    Sleeper, ThreadSleeper, VisionProvider,
};
use crate::shared::logging::StatusLog;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Everything one invocation needs besides the engine's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub name: String,
    pub input_path: PathBuf,
    pub steps: Vec<WorkflowStep>,
    pub provider: ProviderConfig,
    pub output_root: PathBuf,
}

impl RunRequest {
    pub fn from_settings(
        settings: &Settings,
        input_path: impl Into<PathBuf>,
    ) -> Result<Self, OrchestratorError> {
        Ok(Self {
            name: settings.workflow.name.clone(),
            input_path: input_path.into(),
            steps: settings.workflow.steps.clone(),
            provider: settings.provider_config()?,
            output_root: settings.output_root.clone(),
        })
    }
}

/// Shared stop signal, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: WorkflowRun,
    pub items: Vec<WorkItem>,
    pub report: FailureReport,
    pub run_dir: RunDirectory,
}

/// How a step ended. Anything other than `Completed` stops the run.
#[derive(Debug, Clone, PartialEq)]
enum StepOutcome {
    Completed,
    Interrupted,
    Aborted {
        category: FailureCategory,
        message: String,
    },
}

impl StepOutcome {
    fn fatal(message: impl Into<String>) -> Self {
        Self::Aborted {
            category: FailureCategory::UnknownError,
            message: message.into(),
        }
    }
}

/// Mutable state of the run in progress.
struct RunContext {
    run: WorkflowRun,
    items: Vec<WorkItem>,
    failures: FailureAggregator,
    store: WorkflowMetadataStore,
    log: StatusLog,
    run_dir: RunDirectory,
    html_requested: bool,
}

impl RunContext {
    fn checkpoint(&mut self) -> Result<(), OrchestratorError> {
        self.checkpoint_counts(RunCounts::tally(&self.items))
    }

    fn checkpoint_counts(&mut self, counts: RunCounts) -> Result<(), OrchestratorError> {
        self.run.counts = counts;
        self.run.updated_at = now_rfc3339();
        self.store.write(&self.run)
    }

    fn fail_item(&mut self, index: usize, record: FailureRecord) -> Result<(), OrchestratorError> {
        self.log.warn(
            "item_failed",
            &record.message,
            crate::log_fields!(
                "item_id" => self.items[index].id,
                "path" => record.item_ref,
                "category" => record.category.as_str(),
                "status" => record.status.to_string(),
                "attempts" => record.attempts,
            ),
        );
        self.items[index].terminate(record.clone())?;
        self.failures.record(record)
    }
}

pub struct WorkflowEngine {
    settings: Settings,
    registry: ProviderRegistry,
    sleeper: Box<dyn Sleeper>,
    cancel: CancelFlag,
}

impl WorkflowEngine {
    pub fn new(settings: Settings, registry: ProviderRegistry) -> Self {
        Self {
            settings,
            registry,
            sleeper: Box::new(ThreadSleeper),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome, OrchestratorError> {
        self.run_at(request, chrono::Local::now().naive_local())
    }

    /// Runs the enabled steps in canonical order. Errors are returned only
    /// when the run cannot be set up or its metadata cannot be written;
    /// step failures end up in the returned run's `fatal_error`.
    pub fn run_at(
        &self,
        request: &RunRequest,
        started_at: NaiveDateTime,
    ) -> Result<RunOutcome, OrchestratorError> {
        let steps = WorkflowStep::normalize(&request.steps);
        let Some(first_step) = steps.first().copied() else {
            return Err(OrchestratorError::Config(
                "at least one workflow step must be enabled".to_string(),
            ));
        };
        let config = &request.provider;
        let name = RunName::new(
            &request.name,
            config.provider.as_str(),
            &config.model,
            config.prompt_style.as_str(),
            started_at,
        );
        let run_dir = RunDirectory::create(&request.output_root, &name)?;
        let log = StatusLog::at(run_dir.status_log_path());
        let now = now_rfc3339();
        let run = WorkflowRun {
            run_id: run_dir.run_id(),
            name: request.name.clone(),
            provider: config.provider.to_string(),
            model: config.model.clone(),
            prompt_style: config.prompt_style.to_string(),
            steps: steps.clone(),
            provider_config: config.clone(),
            input_path: request.input_path.clone(),
            state: RunState::Running,
            current_step: None,
            counts: RunCounts::default(),
            start_time: now.clone(),
            end_time: None,
            updated_at: now,
            fatal_error: None,
        };
        let mut ctx = RunContext {
            store: WorkflowMetadataStore::new(run_dir.metadata_path()),
            run,
            items: Vec::new(),
            failures: FailureAggregator::new(),
            log,
            run_dir,
            html_requested: false,
        };
        ctx.store.write(&ctx.run)?;
        ctx.log.info(
            "run_started",
            &format!("run {} started", ctx.run.run_id),
            crate::log_fields!(
                "run_id" => ctx.run.run_id,
                "input" => request.input_path.display().to_string(),
                "steps" => steps.iter().map(|step| step.as_str()).collect::<Vec<_>>(),
                "provider" => ctx.run.provider,
                "model" => ctx.run.model,
            ),
        );

        let mut stop: Option<(WorkflowStep, StepOutcome)> = None;
        match self.collect_items(&mut ctx, request) {
            Ok(()) => ctx.checkpoint()?,
            Err(message) => stop = Some((first_step, StepOutcome::fatal(message))),
        }

        if stop.is_none() {
            for step in &steps {
                ctx.run.current_step = Some(*step);
                ctx.checkpoint()?;
                ctx.log.info(
                    "step_started",
                    &format!("step {step} started"),
                    crate::log_fields!("step" => step.as_str()),
                );
                let outcome = match step {
                    WorkflowStep::ExtractVideo => self.extract_step(&mut ctx)?,
                    WorkflowStep::Convert => self.convert_step(&mut ctx, request)?,
                    WorkflowStep::Describe => self.describe_step(&mut ctx, request)?,
                    WorkflowStep::Report => {
                        ctx.html_requested = true;
                        StepOutcome::Completed
                    }
                };
                ctx.log.info(
                    "step_finished",
                    &format!("step {step} finished"),
                    crate::log_fields!(
                        "step" => step.as_str(),
                        "outcome" => format!("{outcome:?}"),
                    ),
                );
                if outcome != StepOutcome::Completed {
                    stop = Some((*step, outcome));
                    break;
                }
            }
        }

        self.finalize(ctx, &steps, stop)
    }

    fn collect_items(&self, ctx: &mut RunContext, request: &RunRequest) -> Result<(), String> {
        let exclude = request.output_root.canonicalize().ok();
        let input = request
            .input_path
            .canonicalize()
            .unwrap_or_else(|_| request.input_path.clone());
        let discovery = discover_media(&input, exclude.as_deref()).map_err(|err| err.to_string())?;
        for message in &discovery.walk_errors {
            ctx.log.warn("walk_error", message, crate::log_fields!());
        }
        let mut unreadable = BTreeMap::new();
        let mut items = discovery.items;
        for entry in discovery.unreadable {
            let item = WorkItem::new(entry.path, entry.kind);
            unreadable.insert(item.id.clone(), entry.message);
            items.push(item);
        }
        items.sort_by(|a, b| a.path.cmp(&b.path));
        // Report paths the way the caller spelled the input.
        if input != request.input_path {
            for item in &mut items {
                if let Ok(relative) = item.path.strip_prefix(&input) {
                    let shown = if relative.as_os_str().is_empty() {
                        request.input_path.clone()
                    } else {
                        request.input_path.join(relative)
                    };
                    let renamed = WorkItem::new(shown, item.kind);
                    if let Some(message) = unreadable.remove(&item.id) {
                        unreadable.insert(renamed.id.clone(), message);
                    }
                    *item = renamed;
                }
            }
        }

        if let Some(previous) = &self.settings.resume.skip_described_from {
            let described = previous.join(DESCRIPTIONS_FILE);
            match read_entries(&described) {
                Ok(entries) => {
                    let mut done = BTreeSet::new();
                    for entry in entries.into_iter().filter(|e| !e.description.is_empty()) {
                        done.insert(entry.path);
                        if let Some(video) = entry.source_video {
                            done.insert(video);
                        }
                    }
                    let before = items.len();
                    items.retain(|item| !done.contains(&item.origin));
                    ctx.log.info(
                        "resume_filtered",
                        &format!("{} items already described", before - items.len()),
                        crate::log_fields!(
                            "previous_run" => previous.display().to_string(),
                            "skipped" => before - items.len(),
                        ),
                    );
                }
                Err(err) => ctx.log.warn(
                    "resume_unavailable",
                    &err.to_string(),
                    crate::log_fields!("previous_run" => previous.display().to_string()),
                ),
            }
        }

        ctx.log.info(
            "items_discovered",
            &format!("{} items discovered", items.len()),
            crate::log_fields!(
                "images" => items.iter().filter(|i| i.kind == ItemKind::Image).count(),
                "videos" => items.iter().filter(|i| i.kind == ItemKind::Video).count(),
            ),
        );
        ctx.items = items;
        for index in 0..ctx.items.len() {
            if let Some(message) = unreadable.get(&ctx.items[index].id) {
                let record = FailureRecord::validation(
                    &ctx.items[index],
                    ValidationReason::Unreadable,
                    message.clone(),
                );
                ctx.fail_item(index, record).map_err(|err| err.to_string())?;
            }
        }
        Ok(())
    }

    /// Replaces each extracted video with its frames. A video that cannot
    /// be extracted stays in the list as a skipped item.
    fn extract_step(&self, ctx: &mut RunContext) -> Result<StepOutcome, OrchestratorError> {
        if !ctx
            .items
            .iter()
            .any(|item| item.kind == ItemKind::Video && item.is_pending())
        {
            return Ok(StepOutcome::Completed);
        }
        let extractor = FrameExtractor::new(&self.settings.video, ctx.run_dir.frames_dir());
        if let Err(err) = extractor.probe() {
            return Ok(StepOutcome::fatal(err.to_string()));
        }

        let current = std::mem::take(&mut ctx.items);
        let mut next: Vec<WorkItem> = Vec::with_capacity(current.len());
        let mut remaining = current.into_iter();
        let mut outcome = StepOutcome::Completed;
        while let Some(item) = remaining.next() {
            if item.kind != ItemKind::Video || !item.is_pending() {
                next.push(item);
                continue;
            }
            if self.cancel.is_cancelled() {
                next.push(item);
                outcome = StepOutcome::Interrupted;
                break;
            }
            match extractor.extract(&item.path) {
                Ok(frames) => {
                    ctx.log.info(
                        "frames_extracted",
                        &format!("{} frames from {}", frames.len(), item.item_ref()),
                        crate::log_fields!("item_id" => item.id, "frames" => frames.len()),
                    );
                    next.extend(frames.into_iter().map(|frame| WorkItem::frame_of(&item, frame)));
                }
                Err(err) if err.is_fatal() => {
                    next.push(item);
                    outcome = StepOutcome::fatal(err.to_string());
                    break;
                }
                Err(err) => {
                    let record =
                        FailureRecord::validation(&item, ValidationReason::ExtractionFailed, err.to_string());
                    next.push(item);
                    let index = next.len() - 1;
                    ctx.log.warn(
                        "item_failed",
                        &record.message,
                        crate::log_fields!(
                            "item_id" => next[index].id,
                            "path" => record.item_ref,
                            "category" => record.category.as_str(),
                            "status" => record.status.to_string(),
                            "attempts" => 0,
                        ),
                    );
                    next[index].terminate(record.clone())?;
                    ctx.failures.record(record)?;
                }
            }
            ctx.checkpoint_counts(RunCounts::tally(next.iter().chain(remaining.as_slice())))?;
        }
        next.extend(remaining);
        ctx.items = next;
        Ok(outcome)
    }

    fn convert_step(
        &self,
        ctx: &mut RunContext,
        request: &RunRequest,
    ) -> Result<StepOutcome, OrchestratorError> {
        let provider = match self.registry.get(&request.provider.provider) {
            Ok(provider) => provider,
            Err(err) => return Ok(StepOutcome::fatal(err.to_string())),
        };
        let limits = effective_limits(provider.limits(), &self.settings.validation);
        let converter = Converter::new(&self.settings.convert, &limits, ctx.run_dir.converted_dir());

        for index in 0..ctx.items.len() {
            let item = &ctx.items[index];
            if item.kind == ItemKind::Video || !item.is_pending() {
                continue;
            }
            if self.cancel.is_cancelled() {
                return Ok(StepOutcome::Interrupted);
            }
            match converter.convert(&item.path) {
                Ok(Conversion::Unchanged) => {}
                Ok(Conversion::Converted(path)) => {
                    ctx.log.info(
                        "item_converted",
                        &format!("{} -> {}", item.item_ref(), path.display()),
                        crate::log_fields!("item_id" => item.id),
                    );
                    ctx.items[index].path = path;
                }
                Err(err) if err.is_fatal() => return Ok(StepOutcome::fatal(err.to_string())),
                Err(err) => {
                    let record = FailureRecord::validation(
                        item,
                        ValidationReason::ConversionFailed,
                        err.to_string(),
                    );
                    ctx.fail_item(index, record)?;
                    ctx.checkpoint()?;
                }
            }
        }
        Ok(StepOutcome::Completed)
    }

    fn describe_step(
        &self,
        ctx: &mut RunContext,
        request: &RunRequest,
    ) -> Result<StepOutcome, OrchestratorError> {
        let config = &request.provider;
        let provider: &dyn VisionProvider = match self.registry.get(&config.provider) {
            Ok(provider) => provider,
            Err(err) => return Ok(StepOutcome::fatal(err.to_string())),
        };
        let limits = effective_limits(provider.limits(), &self.settings.validation);
        let log = ctx.log.clone();
        let dispatcher = Dispatcher::new(
            provider,
            RetryPolicy::from_settings(&self.settings.retry),
            self.sleeper.as_ref(),
        )
        .with_log(&log);
        let writer = DescriptionWriter::new(
            ctx.run_dir.descriptions_path(),
            config.prompt_style.as_str(),
        );
        let auth_abort_after = self.settings.auth_abort_after.max(1);
        let mut consecutive_auth_errors = 0u32;
        let mut any_success = false;

        for index in 0..ctx.items.len() {
            if !ctx.items[index].is_pending() {
                continue;
            }
            if self.cancel.is_cancelled() {
                return Ok(StepOutcome::Interrupted);
            }
            if !any_success && consecutive_auth_errors >= auth_abort_after {
                return Ok(StepOutcome::Aborted {
                    category: FailureCategory::AuthError,
                    message: format!(
                        "provider {} rejected credentials {consecutive_auth_errors} times in a row",
                        config.provider
                    ),
                });
            }

            let validated = match validate_image(&ctx.items[index].path, &limits) {
                Ok(validated) => validated,
                Err(failure) => {
                    let record =
                        FailureRecord::validation(&ctx.items[index], failure.reason, failure.message);
                    ctx.fail_item(index, record)?;
                    ctx.checkpoint()?;
                    continue;
                }
            };

            ctx.items[index].begin()?;
            let provider_request = ProviderRequest {
                item_id: ctx.items[index].id.clone(),
                model: config.model.clone(),
                prompt: config.prompt.clone(),
                image: ImagePayload::new(validated.bytes, validated.format),
                params: GenerationParams {
                    max_tokens: config.max_tokens,
                    temperature: config.temperature,
                },
                timeout: Duration::from_secs(config.timeout_seconds),
            };

            match dispatcher.describe(&ctx.items[index], &provider_request) {
                Ok(dispatched) => {
                    let result = DescriptionResult {
                        text: dispatched.response.text.trim().to_string(),
                        provider: config.provider.to_string(),
                        model: dispatched.response.model,
                        usage: dispatched.response.usage,
                        finish_reason: dispatched.response.finish_reason,
                    };
                    if let Err(err) = writer.append(&ctx.items[index], &result) {
                        let failure = ProviderFailure::new(
                            FailureCategory::UnknownError,
                            format!("description could not be persisted: {err}"),
                        );
                        let record = FailureRecord::dispatch(
                            &ctx.items[index],
                            &failure,
                            dispatched.attempts,
                            false,
                        );
                        ctx.fail_item(index, record)?;
                        ctx.checkpoint()?;
                        return Ok(StepOutcome::fatal(err.to_string()));
                    }
                    ctx.log.info(
                        "item_described",
                        &format!("described {}", ctx.items[index].item_ref()),
                        crate::log_fields!(
                            "item_id" => ctx.items[index].id,
                            "attempts" => dispatched.attempts,
                            "prompt_tokens" => result.usage.prompt_tokens,
                            "completion_tokens" => result.usage.completion_tokens,
                        ),
                    );
                    ctx.items[index].succeed(result, dispatched.attempts)?;
                    any_success = true;
                    consecutive_auth_errors = 0;
                }
                Err(record) => {
                    if record.category == FailureCategory::AuthError {
                        consecutive_auth_errors += 1;
                    } else {
                        consecutive_auth_errors = 0;
                    }
                    ctx.fail_item(index, record)?;
                }
            }
            ctx.checkpoint()?;
        }
        Ok(StepOutcome::Completed)
    }

    fn finalize(
        &self,
        mut ctx: RunContext,
        steps: &[WorkflowStep],
        stop: Option<(WorkflowStep, StepOutcome)>,
    ) -> Result<RunOutcome, OrchestratorError> {
        let (state, leftover_category, leftover_message) = match &stop {
            None => (
                RunState::Completed,
                FailureCategory::UnknownError,
                if steps.contains(&WorkflowStep::Describe) {
                    "not described".to_string()
                } else {
                    "not described: the describe step is not enabled".to_string()
                },
            ),
            Some((_, StepOutcome::Interrupted)) => (
                RunState::Interrupted,
                FailureCategory::UnknownError,
                "run interrupted before this item was processed".to_string(),
            ),
            Some((step, StepOutcome::Aborted { category, message })) => {
                ctx.run.fatal_error = Some(StepFatal {
                    step: *step,
                    message: message.clone(),
                });
                (
                    RunState::Aborted,
                    *category,
                    format!("run aborted during {step}: {message}"),
                )
            }
            Some((_, StepOutcome::Completed)) => (
                RunState::Completed,
                FailureCategory::UnknownError,
                "not described".to_string(),
            ),
        };

        for index in 0..ctx.items.len() {
            if ctx.items[index].status.is_terminal() {
                continue;
            }
            let record = FailureRecord::not_dispatched(
                &ctx.items[index],
                leftover_category,
                leftover_message.clone(),
            );
            ctx.fail_item(index, record)?;
        }
        for item in &ctx.items {
            ctx.failures.register_item(&item.file_type);
        }

        let report = ctx.failures.summarize();
        write_failure_report(&ctx.run_dir, &report)?;

        ctx.run.transition_state(state)?;
        ctx.run.current_step = None;
        ctx.run.end_time = Some(now_rfc3339());
        if ctx.html_requested {
            write_html_index(&ctx.run_dir, &ctx.run, &ctx.items, &report)?;
        }
        ctx.checkpoint()?;

        let counts = ctx.run.counts;
        ctx.log.info(
            "run_finished",
            &format!("run {}: {}", ctx.run.state, report.headline()),
            crate::log_fields!(
                "state" => ctx.run.state.to_string(),
                "total" => counts.total,
                "succeeded" => counts.succeeded,
                "failed" => counts.failed,
                "skipped" => counts.skipped,
            ),
        );

        Ok(RunOutcome {
            run: ctx.run,
            items: ctx.items,
            report,
            run_dir: ctx.run_dir,
        })
    }
}

fn now_rfc3339() -> String {
    chrono::Local::now().to_rfc3339()
}
