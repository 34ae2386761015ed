use super::{ProviderRequest, ProviderResponse, RetryPolicy, Sleeper, VisionProvider};
use crate::failure::{FailureCategory, FailureRecord, ProviderFailure};
use crate::item::WorkItem;
use crate::shared::logging::StatusLog;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub response: ProviderResponse,
    pub attempts: u32,
}

/// Drives one provider through the retry policy for one item at a time.
///
/// The only side effects are status-log lines and backoff sleeps; the item
/// itself is not touched, the caller applies the returned result.
pub struct Dispatcher<'a> {
    provider: &'a dyn VisionProvider,
    policy: RetryPolicy,
    sleeper: &'a dyn Sleeper,
    log: Option<&'a StatusLog>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(provider: &'a dyn VisionProvider, policy: RetryPolicy, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            provider,
            policy,
            sleeper,
            log: None,
        }
    }

    pub fn with_log(mut self, log: &'a StatusLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn describe(
        &self,
        item: &WorkItem,
        request: &ProviderRequest,
    ) -> Result<Dispatched, FailureRecord> {
        let mut attempt = 0u32;
        let mut empty_retries = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            let outcome = self.provider.describe(request).and_then(reject_empty_text);
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let failure = match outcome {
                Ok(response) => {
                    self.log_attempt(item, request, attempt, elapsed_ms, Ok(&response));
                    return Ok(Dispatched {
                        response,
                        attempts: attempt,
                    });
                }
                Err(failure) => failure,
            };
            self.log_attempt(item, request, attempt, elapsed_ms, Err(&failure));

            if !self.policy.should_retry(failure.category, attempt, empty_retries) {
                let exhausted = self.policy.is_retryable(failure.category);
                return Err(FailureRecord::dispatch(item, &failure, attempt, exhausted));
            }
            if failure.category == FailureCategory::EmptyResponseError {
                empty_retries += 1;
            }

            let delay = self.policy.delay_for(attempt, failure.retry_after);
            if let Some(log) = self.log {
                log.info(
                    "provider_backoff",
                    &format!("retrying {} after {}ms", item.item_ref(), delay.as_millis()),
                    crate::log_fields!(
                        "item_id" => item.id,
                        "attempt" => attempt,
                        "delay_ms" => delay.as_millis() as u64,
                        "category" => failure.category.as_str(),
                    ),
                );
            }
            self.sleeper.sleep(delay);
        }
    }

    fn log_attempt(
        &self,
        item: &WorkItem,
        request: &ProviderRequest,
        attempt: u32,
        elapsed_ms: u64,
        outcome: Result<&ProviderResponse, &ProviderFailure>,
    ) {
        let Some(log) = self.log else {
            return;
        };
        let mut fields = crate::log_fields!(
            "item_id" => item.id,
            "path" => item.item_ref(),
            "provider" => self.provider.id().as_str(),
            "model" => request.model,
            "attempt" => attempt,
            "elapsed_ms" => elapsed_ms,
        );
        match outcome {
            Ok(response) => {
                fields.insert("http_status".to_string(), response.http_status.into());
                fields.insert(
                    "finish_reason".to_string(),
                    serde_json::json!(response.finish_reason),
                );
                fields.insert("outcome".to_string(), "success".into());
                fields.insert(
                    "completion_tokens".to_string(),
                    response.usage.completion_tokens.into(),
                );
                log.info("provider_attempt", "provider call succeeded", fields);
            }
            Err(failure) => {
                fields.insert("http_status".to_string(), serde_json::json!(failure.http_status));
                fields.insert(
                    "finish_reason".to_string(),
                    serde_json::json!(failure.finish_reason),
                );
                fields.insert("outcome".to_string(), failure.category.as_str().into());
                log.warn("provider_attempt", &failure.message, fields);
            }
        }
    }
}

/// A 200 with no usable text is a failure, whatever the token count says.
fn reject_empty_text(response: ProviderResponse) -> Result<ProviderResponse, ProviderFailure> {
    if !response.text.trim().is_empty() {
        return Ok(response);
    }
    Err(ProviderFailure::new(
        FailureCategory::EmptyResponseError,
        format!(
            "provider returned no description text ({} completion tokens, finish reason {})",
            response.usage.completion_tokens,
            response.finish_reason.as_deref().unwrap_or("none")
        ),
    )
    .with_status(response.http_status)
    .with_finish_reason(response.finish_reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;
    use crate::provider::{GenerationParams, ImagePayload, ProviderLimits, TokenUsage};
    use crate::shared::ids::ProviderId;
    use image::ImageFormat;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedProvider {
        id: ProviderId,
        limits: ProviderLimits,
        script: RefCell<VecDeque<Result<ProviderResponse, ProviderFailure>>>,
        calls: RefCell<u32>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<ProviderResponse, ProviderFailure>>) -> Self {
            Self {
                id: ProviderId::parse("scripted").expect("id"),
                limits: ProviderLimits {
                    supported_formats: vec![ImageFormat::Png],
                    max_bytes: 1024,
                    min_dimension: 1,
                    max_dimension: 100,
                },
                script: RefCell::new(script.into()),
                calls: RefCell::new(0),
            }
        }
    }

    impl VisionProvider for ScriptedProvider {
        fn id(&self) -> &ProviderId {
            &self.id
        }

        fn limits(&self) -> &ProviderLimits {
            &self.limits
        }

        fn describe(&self, _request: &ProviderRequest) -> Result<ProviderResponse, ProviderFailure> {
            *self.calls.borrow_mut() += 1;
            self.script
                .borrow_mut()
                .pop_front()
                .expect("script exhausted")
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.borrow_mut().push(duration);
        }
    }

    fn ok(text: &str) -> Result<ProviderResponse, ProviderFailure> {
        Ok(ProviderResponse {
            text: text.to_string(),
            model: "m".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 500,
            },
            http_status: 200,
            finish_reason: Some("stop".to_string()),
        })
    }

    fn fail(category: FailureCategory, status: u16) -> Result<ProviderResponse, ProviderFailure> {
        Err(ProviderFailure::new(category, format!("HTTP {status}")).with_status(status))
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            item_id: "abc".to_string(),
            model: "m".to_string(),
            prompt: "describe".to_string(),
            image: ImagePayload::new(vec![1, 2, 3], ImageFormat::Png),
            params: GenerationParams {
                max_tokens: 100,
                temperature: None,
            },
            timeout: Duration::from_secs(1),
        }
    }

    fn item() -> WorkItem {
        WorkItem::new("photos/a.png", ItemKind::Image)
    }

    #[test]
    fn transient_failure_then_success_reports_attempts() {
        let provider = ScriptedProvider::new(vec![fail(FailureCategory::ServerError, 503), ok("a cat")]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = Dispatcher::new(&provider, RetryPolicy::default(), &sleeper);

        let dispatched = dispatcher.describe(&item(), &request()).expect("success");
        assert_eq!(dispatched.attempts, 2);
        assert_eq!(dispatched.response.text, "a cat");
        assert_eq!(*sleeper.slept.borrow(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn persistent_server_errors_exhaust_attempts_with_backoff() {
        let provider = ScriptedProvider::new(vec![
            fail(FailureCategory::ServerError, 500),
            fail(FailureCategory::ServerError, 500),
            fail(FailureCategory::ServerError, 500),
        ]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = Dispatcher::new(&provider, RetryPolicy::default(), &sleeper);

        let record = dispatcher.describe(&item(), &request()).expect_err("failure");
        assert_eq!(record.category, FailureCategory::ServerError);
        assert_eq!(record.attempts, 3);
        assert!(record.attempts_exhausted);
        assert_eq!(record.http_status, Some(500));
        assert_eq!(
            *sleeper.slept.borrow(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn auth_and_validation_errors_are_not_retried() {
        for category in [FailureCategory::AuthError, FailureCategory::ValidationError] {
            let provider = ScriptedProvider::new(vec![fail(category, 401)]);
            let sleeper = RecordingSleeper::default();
            let dispatcher = Dispatcher::new(&provider, RetryPolicy::default(), &sleeper);

            let record = dispatcher.describe(&item(), &request()).expect_err("failure");
            assert_eq!(record.category, category);
            assert_eq!(record.attempts, 1);
            assert!(!record.attempts_exhausted);
            assert!(sleeper.slept.borrow().is_empty());
            assert_eq!(*provider.calls.borrow(), 1);
        }
    }

    #[test]
    fn empty_text_with_billed_tokens_is_a_failure() {
        let provider = ScriptedProvider::new(vec![ok("  \n ")]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = Dispatcher::new(&provider, RetryPolicy::default(), &sleeper);

        let record = dispatcher.describe(&item(), &request()).expect_err("failure");
        assert_eq!(record.category, FailureCategory::EmptyResponseError);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.http_status, Some(200));
        assert!(record.message.contains("500 completion tokens"));
    }

    #[test]
    fn empty_text_retries_once_when_enabled() {
        let provider = ScriptedProvider::new(vec![ok(""), ok(""), ok("never reached")]);
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            retry_empty_response: true,
            ..RetryPolicy::default()
        };
        let dispatcher = Dispatcher::new(&provider, policy, &sleeper);

        let record = dispatcher.describe(&item(), &request()).expect_err("failure");
        assert_eq!(record.attempts, 2);
        assert!(record.attempts_exhausted);
        assert_eq!(*provider.calls.borrow(), 2);
    }

    #[test]
    fn retry_after_hint_drives_the_delay() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderFailure::new(FailureCategory::RateLimitError, "slow down")
                .with_status(429)
                .with_retry_after(Some(Duration::from_secs(6)))),
            ok("done"),
        ]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = Dispatcher::new(&provider, RetryPolicy::default(), &sleeper);

        dispatcher.describe(&item(), &request()).expect("success");
        assert_eq!(*sleeper.slept.borrow(), vec![Duration::from_secs(6)]);
    }

    #[test]
    fn every_attempt_is_logged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = StatusLog::for_run_dir(dir.path());
        let provider = ScriptedProvider::new(vec![fail(FailureCategory::TimeoutError, 504), ok("ok")]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = Dispatcher::new(&provider, RetryPolicy::default(), &sleeper).with_log(&log);

        dispatcher.describe(&item(), &request()).expect("success");

        let attempts: Vec<_> = log
            .read_events()
            .expect("events")
            .into_iter()
            .filter(|event| event["event"] == "provider_attempt")
            .collect();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0]["outcome"], "TimeoutError");
        assert_eq!(attempts[0]["http_status"], 504);
        assert_eq!(attempts[1]["outcome"], "success");
        assert_eq!(attempts[1]["provider"], "scripted");
        assert_eq!(attempts[1]["attempt"], 2);
        assert!(attempts[1].get("elapsed_ms").is_some());
    }
}
