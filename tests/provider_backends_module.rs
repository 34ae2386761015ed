use image::ImageFormat;
use std::cell::RefCell;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use vistaflow::failure::FailureCategory;
use vistaflow::item::{ItemKind, WorkItem};
use vistaflow::provider::anthropic::AnthropicProvider;
use vistaflow::provider::ollama::OllamaProvider;
use vistaflow::provider::openai::OpenAiProvider;
use vistaflow::provider::{
    Dispatcher, GenerationParams, ImagePayload, ProviderRequest, RetryPolicy, Sleeper,
    VisionProvider,
};
use vistaflow::shared::ids::ProviderId;

#[derive(Debug, Clone)]
struct RecordedRequest {
    path: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl RecordedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body is json")
    }
}

struct MockReply {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: String,
}

impl MockReply {
    fn ok(body: serde_json::Value) -> Self {
        Self::status(200, body.to_string())
    }

    fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }
}

struct MockVisionServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockVisionServer {
    /// Serves the replies in order, one connection each.
    fn start(replies: Vec<MockReply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_for_thread = Arc::clone(&requests);

        let handle = thread::spawn(move || {
            for reply in replies {
                let (mut stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

                let mut request_line = String::new();
                reader
                    .read_line(&mut request_line)
                    .expect("read request line");
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();

                let mut headers = Vec::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).expect("read header");
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        let name = name.trim().to_ascii_lowercase();
                        let value = value.trim().to_string();
                        if name == "content-length" {
                            content_length = value.parse::<usize>().unwrap_or(0);
                        }
                        headers.push((name, value));
                    }
                }

                let mut body = vec![0_u8; content_length];
                if content_length > 0 {
                    reader.read_exact(&mut body).expect("read body");
                }
                requests_for_thread
                    .lock()
                    .expect("lock requests")
                    .push(RecordedRequest {
                        path,
                        headers,
                        body: String::from_utf8_lossy(&body).to_string(),
                    });

                let mut response = format!(
                    "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
                    reply.status,
                    reply.body.len()
                );
                for (name, value) in &reply.headers {
                    response.push_str(&format!("{name}: {value}\r\n"));
                }
                response.push_str("\r\n");
                response.push_str(&reply.body);
                stream
                    .write_all(response.as_bytes())
                    .expect("write response");
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            handle: Some(handle),
        }
    }

    fn finish(mut self) -> Vec<RecordedRequest> {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("join mock server");
        }
        self.requests.lock().expect("lock requests").clone()
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

fn id(raw: &str) -> ProviderId {
    ProviderId::parse(raw).expect("provider id")
}

fn request(model: &str) -> ProviderRequest {
    ProviderRequest {
        item_id: "abc123".to_string(),
        model: model.to_string(),
        prompt: "Describe this image.".to_string(),
        image: ImagePayload::new(vec![0x89, b'P', b'N', b'G'], ImageFormat::Png),
        params: GenerationParams {
            max_tokens: 300,
            temperature: Some(0.2),
        },
        timeout: Duration::from_secs(5),
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(8),
        retry_empty_response: false,
    }
}

#[test]
fn ollama_posts_chat_request_and_reads_usage() {
    let server = MockVisionServer::start(vec![MockReply::ok(serde_json::json!({
        "model": "llava:13b",
        "message": {"role": "assistant", "content": "A red barn in snow."},
        "done_reason": "stop",
        "prompt_eval_count": 620,
        "eval_count": 9
    }))]);
    let provider = OllamaProvider::new(id("ollama"), Some(&server.base_url));

    let response = provider.describe(&request("llava:13b")).expect("describe");
    assert_eq!(response.text, "A red barn in snow.");
    assert_eq!(response.http_status, 200);
    assert_eq!(response.usage.prompt_tokens, 620);
    assert_eq!(response.usage.completion_tokens, 9);
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));

    let recorded = server.finish();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].path, "/api/chat");
    let body = recorded[0].json();
    assert_eq!(body["stream"], false);
    assert_eq!(body["options"]["num_predict"], 300);
    assert_eq!(body["messages"][0]["images"][0], "iVBORw==");
}

#[test]
fn openai_null_content_with_tokens_becomes_empty_response_failure() {
    let server = MockVisionServer::start(vec![MockReply::ok(serde_json::json!({
        "model": "gpt-5-mini",
        "choices": [{
            "message": {"role": "assistant", "content": null},
            "finish_reason": "length"
        }],
        "usage": {"prompt_tokens": 812, "completion_tokens": 1000}
    }))]);
    let provider = OpenAiProvider::new(id("openai"), "sk-test".to_string(), Some(&server.base_url));
    let sleeper = RecordingSleeper::default();
    let item = WorkItem::new("photos/beach.png", ItemKind::Image);

    let record = Dispatcher::new(&provider, policy(), &sleeper)
        .describe(&item, &request("gpt-5-mini"))
        .expect_err("empty text is a failure");
    assert_eq!(record.category, FailureCategory::EmptyResponseError);
    assert_eq!(record.http_status, Some(200));
    assert_eq!(record.attempts, 1);
    assert!(record.message.contains("1000 completion tokens"), "{}", record.message);
    assert!(sleeper.slept.borrow().is_empty());

    let recorded = server.finish();
    assert_eq!(recorded[0].path, "/v1/chat/completions");
    assert_eq!(recorded[0].header("authorization"), Some("Bearer sk-test"));
    let body = recorded[0].json();
    assert_eq!(body["max_completion_tokens"], 300);
    let url = body["messages"][0]["content"][1]["image_url"]["url"]
        .as_str()
        .expect("data url");
    assert!(url.starts_with("data:image/png;base64,"));
}

#[test]
fn anthropic_http_errors_are_classified() {
    let server = MockVisionServer::start(vec![
        MockReply::status(429, r#"{"type":"error","error":{"type":"rate_limit_error"}}"#)
            .with_header("Retry-After", "3"),
        MockReply::status(401, r#"{"type":"error","error":{"type":"authentication_error"}}"#),
        MockReply::status(500, r#"{"type":"error","error":{"type":"api_error"}}"#),
    ]);
    let provider =
        AnthropicProvider::new(id("anthropic"), "key-123".to_string(), Some(&server.base_url));

    let rate_limited = provider
        .describe(&request("claude-sonnet"))
        .expect_err("429");
    assert_eq!(rate_limited.category, FailureCategory::RateLimitError);
    assert_eq!(rate_limited.http_status, Some(429));
    assert_eq!(rate_limited.retry_after, Some(Duration::from_secs(3)));

    let unauthorized = provider
        .describe(&request("claude-sonnet"))
        .expect_err("401");
    assert_eq!(unauthorized.category, FailureCategory::AuthError);
    assert!(unauthorized.message.contains("authentication_error"));

    let server_error = provider
        .describe(&request("claude-sonnet"))
        .expect_err("500");
    assert_eq!(server_error.category, FailureCategory::ServerError);

    let recorded = server.finish();
    assert_eq!(recorded.len(), 3);
    assert_eq!(recorded[0].path, "/v1/messages");
    assert_eq!(recorded[0].header("x-api-key"), Some("key-123"));
    assert_eq!(recorded[0].header("anthropic-version"), Some("2023-06-01"));
    let body = recorded[0].json();
    assert_eq!(body["messages"][0]["content"][0]["source"]["media_type"], "image/png");
}

#[test]
fn dispatcher_retries_server_error_then_succeeds() {
    let server = MockVisionServer::start(vec![
        MockReply::status(503, "overloaded"),
        MockReply::ok(serde_json::json!({
            "model": "claude-sonnet",
            "content": [{"type": "text", "text": "Two dogs on a dock."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1500, "output_tokens": 8}
        })),
    ]);
    let provider =
        AnthropicProvider::new(id("anthropic"), "key-123".to_string(), Some(&server.base_url));
    let sleeper = RecordingSleeper::default();
    let item = WorkItem::new("photos/dock.png", ItemKind::Image);

    let dispatched = Dispatcher::new(&provider, policy(), &sleeper)
        .describe(&item, &request("claude-sonnet"))
        .expect("second attempt succeeds");
    assert_eq!(dispatched.attempts, 2);
    assert_eq!(dispatched.response.text, "Two dogs on a dock.");
    assert_eq!(dispatched.response.usage.completion_tokens, 8);
    assert_eq!(*sleeper.slept.borrow(), vec![Duration::from_secs(2)]);
    assert_eq!(server.finish().len(), 2);
}

#[test]
fn rate_limits_without_retry_after_back_off_exponentially_then_succeed() {
    let server = MockVisionServer::start(vec![
        MockReply::status(429, "slow down"),
        MockReply::status(429, "slow down"),
        MockReply::ok(serde_json::json!({
            "model": "llava",
            "message": {"role": "assistant", "content": "A queue at a ticket booth."},
            "done_reason": "stop",
            "prompt_eval_count": 580,
            "eval_count": 8
        })),
    ]);
    let provider = OllamaProvider::new(id("ollama"), Some(&server.base_url));
    let sleeper = RecordingSleeper::default();
    let item = WorkItem::new("photos/queue.png", ItemKind::Image);

    let dispatched = Dispatcher::new(&provider, policy(), &sleeper)
        .describe(&item, &request("llava"))
        .expect("third attempt succeeds");
    assert_eq!(dispatched.attempts, 3);
    assert_eq!(dispatched.response.text, "A queue at a ticket booth.");
    assert_eq!(
        *sleeper.slept.borrow(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
    assert_eq!(server.finish().len(), 3);
}

#[test]
fn dispatcher_honors_retry_after_and_gives_up_after_max_attempts() {
    let server = MockVisionServer::start(vec![
        MockReply::status(429, "slow down").with_header("Retry-After", "5"),
        MockReply::status(429, "slow down").with_header("Retry-After", "30"),
        MockReply::status(429, "slow down"),
    ]);
    let provider = OllamaProvider::new(id("ollama"), Some(&server.base_url));
    let sleeper = RecordingSleeper::default();
    let item = WorkItem::new("photos/crowd.png", ItemKind::Image);

    let record = Dispatcher::new(&provider, policy(), &sleeper)
        .describe(&item, &request("llava"))
        .expect_err("rate limited throughout");
    assert_eq!(record.category, FailureCategory::RateLimitError);
    assert_eq!(record.attempts, 3);
    assert!(record.attempts_exhausted);
    assert_eq!(record.remediation_hint, "reduce request rate / add delay");
    assert_eq!(
        *sleeper.slept.borrow(),
        vec![Duration::from_secs(5), Duration::from_secs(8)]
    );
    assert_eq!(server.finish().len(), 3);
}

#[test]
fn connection_refused_is_not_an_http_status() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let provider = OllamaProvider::new(id("ollama"), Some(&format!("http://{addr}")));
    let failure = provider.describe(&request("llava")).expect_err("refused");
    assert_eq!(failure.http_status, None);
    assert_eq!(failure.category, FailureCategory::ServerError);
}
