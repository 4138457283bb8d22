use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use chat_relay::config::AppConfig;
use chat_relay::error::{RelayError, RATE_LIMIT_NOTICE};
use chat_relay::provider::{ModelClient, TurnInput};
use chat_relay::relay::{ChatRelay, EMPTY_RESPONSE_NOTICE, TOOL_FALLBACK_NOTICE};
use chat_relay::routing::dispatch::dispatch_request;
use chat_relay::state::AppState;
use chat_relay::stream::{
    CompletedTurn, EventStream, FunctionCall, StreamEvent, ThinkingTags, TokenUsage,
};
use chat_relay::tool::{SearchTool, ToolDeclaration, ToolOutcome};
use chat_relay::transport::RetryPolicy;
use futures_util::StreamExt;
use serde_json::json;

type Script = Result<Vec<Result<StreamEvent, RelayError>>, RelayError>;

/// What the relay asked the model for, per call.
#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Open { user_content: String },
    ToolResult { call: String, outcome: String },
}

#[derive(Default)]
struct ScriptedModel {
    scripts: Mutex<VecDeque<Script>>,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedModel {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            seen: Mutex::default(),
        })
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn open_turn_stream(&self, input: TurnInput<'_>) -> Result<EventStream, RelayError> {
        let seen = match input {
            TurnInput::Open(request) => Seen::Open {
                user_content: request.user_content.clone(),
            },
            TurnInput::ToolResult {
                completed, outcome, ..
            } => Seen::ToolResult {
                call: completed
                    .function_call
                    .as_ref()
                    .map(|call| call.name.clone())
                    .unwrap_or_default(),
                outcome: outcome.text.clone(),
            },
        };
        self.seen.lock().unwrap().push(seen);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RelayError::Internal("no scripted stream left".into())));
        Ok(futures_util::stream::iter(script?).boxed())
    }
}

struct ScriptedSearch {
    queries: Mutex<Vec<String>>,
    answer: String,
}

impl ScriptedSearch {
    fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            queries: Mutex::default(),
            answer: answer.to_string(),
        })
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchTool for ScriptedSearch {
    async fn search(&self, query: &str) -> ToolOutcome {
        self.queries.lock().unwrap().push(query.to_string());
        ToolOutcome::text(self.answer.clone())
    }
}

fn text(delta: &str) -> Result<StreamEvent, RelayError> {
    Ok(StreamEvent::TextDelta(delta.to_string()))
}

fn end() -> Result<StreamEvent, RelayError> {
    Ok(StreamEvent::End(CompletedTurn::default()))
}

fn search_call(args: serde_json::Value) -> FunctionCall {
    FunctionCall {
        name: "search_documents".into(),
        args: args.as_object().cloned().unwrap_or_default(),
        call_id: None,
    }
}

fn end_with_call(call: FunctionCall) -> Result<StreamEvent, RelayError> {
    Ok(StreamEvent::End(CompletedTurn {
        function_call: Some(call),
        model_turn: Vec::new(),
        usage: Some(TokenUsage {
            input_tokens: Some(12),
            output_tokens: Some(3),
            total_tokens: Some(15),
        }),
    }))
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

fn build_state(model: Arc<ScriptedModel>, search: Option<Arc<ScriptedSearch>>) -> Arc<AppState> {
    let mut relay = ChatRelay::new(
        model,
        fast_retry(),
        ThinkingTags::default(),
        "You are a test assistant.",
    );
    if let Some(search) = search {
        relay = relay.with_search_tool(
            ToolDeclaration::search("search_documents", "Search the document store."),
            search,
        );
    }
    Arc::new(AppState::new(AppConfig::default(), relay))
}

fn chat_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("serialize request")))
        .expect("build request")
}

fn ask(question: &str) -> Request<Body> {
    chat_request(json!({
        "messages": [{ "role": "user", "content": question }]
    }))
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> Response {
    dispatch_request(Arc::clone(state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch")
}

async fn body_text(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}

#[tokio::test]
async fn test_thinking_split_across_chunks_is_scrubbed() {
    let model = ScriptedModel::new(vec![Ok(vec![
        text("<think"),
        text("ing>plan</thin"),
        text("king>Hello"),
        end(),
    ])]);
    let state = build_state(Arc::clone(&model), None);

    let response = send(&state, ask("hi")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.headers()["cache-control"], "no-cache, no-transform");
    assert_eq!(body_text(response).await, "Hello");
    assert_eq!(
        model.seen(),
        vec![Seen::Open {
            user_content: "hi".into()
        }]
    );
}

#[tokio::test]
async fn test_tool_round_trip_relays_second_turn() {
    let model = ScriptedModel::new(vec![
        Ok(vec![
            Ok(StreamEvent::FunctionCall(search_call(
                json!({ "query": "Salsipuedes" }),
            ))),
            end_with_call(search_call(json!({ "query": "Salsipuedes" }))),
        ]),
        Ok(vec![text("Based on the doc, "), text("X"), end()]),
    ]);
    let search = ScriptedSearch::new("Salsipuedes: pending invoice review");
    let state = build_state(Arc::clone(&model), Some(Arc::clone(&search)));

    let response = send(&state, ask("What is pending for Salsipuedes?")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Based on the doc, X");
    assert_eq!(search.queries(), vec!["Salsipuedes".to_string()]);
    assert_eq!(
        model.seen(),
        vec![
            Seen::Open {
                user_content: "What is pending for Salsipuedes?".into()
            },
            Seen::ToolResult {
                call: "search_documents".into(),
                outcome: "Salsipuedes: pending invoice review".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_call_without_query_is_reported_in_stream() {
    let model = ScriptedModel::new(vec![Ok(vec![end_with_call(search_call(json!({})))])]);
    let search = ScriptedSearch::new("unused");
    let state = build_state(Arc::clone(&model), Some(Arc::clone(&search)));

    let response = send(&state, ask("find it")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.starts_with("Invalid tool call:"), "body: {body}");
    assert!(search.queries().is_empty());
    assert_eq!(model.seen().len(), 1);
}

#[tokio::test]
async fn test_call_to_undeclared_tool_is_invalid() {
    let model = ScriptedModel::new(vec![Ok(vec![end_with_call(search_call(
        json!({ "query": "anything" }),
    ))])]);
    let state = build_state(Arc::clone(&model), None);

    let body = body_text(send(&state, ask("find it")).await).await;
    assert!(body.starts_with("Invalid tool call:"), "body: {body}");
    assert_eq!(model.seen().len(), 1);
}

#[tokio::test]
async fn test_empty_turn_writes_notice() {
    let model = ScriptedModel::new(vec![Ok(vec![end()])]);
    let state = build_state(model, None);

    let body = body_text(send(&state, ask("hello?")).await).await;
    assert_eq!(body, EMPTY_RESPONSE_NOTICE);
}

#[tokio::test]
async fn test_turn_that_is_only_thinking_writes_notice() {
    let model = ScriptedModel::new(vec![Ok(vec![text("<thinking>nothing to say</thinking>"), end()])]);
    let state = build_state(model, None);

    let body = body_text(send(&state, ask("hello?")).await).await;
    assert_eq!(body, EMPTY_RESPONSE_NOTICE);
}

#[tokio::test]
async fn test_empty_turn_after_tool_writes_fallback() {
    let model = ScriptedModel::new(vec![
        Ok(vec![end_with_call(search_call(json!({ "query": "brief" })))]),
        Ok(vec![end()]),
    ]);
    let search = ScriptedSearch::new("no matching documents");
    let state = build_state(model, Some(search));

    let body = body_text(send(&state, ask("summarize the brief")).await).await;
    assert_eq!(body, TOOL_FALLBACK_NOTICE);
}

#[tokio::test]
async fn test_second_tool_call_is_ignored() {
    let model = ScriptedModel::new(vec![
        Ok(vec![end_with_call(search_call(json!({ "query": "brief" })))]),
        Ok(vec![
            text("Here is what I found."),
            end_with_call(search_call(json!({ "query": "more" }))),
        ]),
    ]);
    let search = ScriptedSearch::new("brief contents");
    let state = build_state(Arc::clone(&model), Some(Arc::clone(&search)));

    let body = body_text(send(&state, ask("summarize the brief")).await).await;
    assert_eq!(body, "Here is what I found.");
    assert_eq!(search.queries().len(), 1);
    assert_eq!(model.seen().len(), 2);
}

#[tokio::test]
async fn test_announced_call_that_never_completes_is_invalid() {
    let model = ScriptedModel::new(vec![Ok(vec![
        Ok(StreamEvent::FunctionCall(search_call(json!({ "query": "x" })))),
        end(),
    ])]);
    let search = ScriptedSearch::new("unused");
    let state = build_state(model, Some(Arc::clone(&search)));

    let body = body_text(send(&state, ask("find x")).await).await;
    assert!(body.starts_with("Invalid tool call:"), "body: {body}");
    assert!(search.queries().is_empty());
}

#[tokio::test]
async fn test_mid_stream_error_is_appended_as_text() {
    let model = ScriptedModel::new(vec![Ok(vec![
        text("Partial answer"),
        Err(RelayError::Transport(
            "Upstream stream interrupted: connection reset".into(),
        )),
    ])]);
    let state = build_state(model, None);

    let response = send(&state, ask("tell me")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "Partial answer\n\nTransport error: Upstream stream interrupted: connection reset"
    );
}

#[tokio::test]
async fn test_mid_stream_rate_limit_uses_notice() {
    let model = ScriptedModel::new(vec![Ok(vec![Err(RelayError::Upstream {
        status: 429,
        message: "RESOURCE_EXHAUSTED: quota".into(),
    })])]);
    let state = build_state(model, None);

    let body = body_text(send(&state, ask("tell me")).await).await;
    assert_eq!(body, RATE_LIMIT_NOTICE);
}

#[tokio::test]
async fn test_rate_limited_open_retries_then_streams() {
    let model = ScriptedModel::new(vec![
        Err(RelayError::Upstream {
            status: 429,
            message: "slow down".into(),
        }),
        Err(RelayError::Upstream {
            status: 429,
            message: "slow down".into(),
        }),
        Ok(vec![text("finally"), end()]),
    ]);
    let state = build_state(Arc::clone(&model), None);

    let response = send(&state, ask("hi")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "finally");
    assert_eq!(model.seen().len(), 3);
}

#[tokio::test]
async fn test_rate_limit_exhausted_before_stream_is_429() {
    let limited = || {
        Err(RelayError::Upstream {
            status: 429,
            message: "quota".into(),
        })
    };
    let model = ScriptedModel::new(vec![limited(), limited(), limited(), limited()]);
    let state = build_state(Arc::clone(&model), None);

    let response = send(&state, ask("hi")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let payload: serde_json::Value =
        serde_json::from_str(&body_text(response).await).expect("json payload");
    assert_eq!(payload["error"], RATE_LIMIT_NOTICE);
    assert_eq!(model.seen().len(), 3);
}

#[tokio::test]
async fn test_non_rate_limit_open_failure_is_500_without_retry() {
    let model = ScriptedModel::new(vec![Err(RelayError::Upstream {
        status: 403,
        message: "API key not valid".into(),
    })]);
    let state = build_state(Arc::clone(&model), None);

    let response = send(&state, ask("hi")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload: serde_json::Value =
        serde_json::from_str(&body_text(response).await).expect("json payload");
    assert!(payload["error"]
        .as_str()
        .is_some_and(|message| message.contains("API key not valid")));
    assert_eq!(model.seen().len(), 1);
}

#[tokio::test]
async fn test_invalid_requests_are_400_without_model_call() {
    let bodies = [
        json!({}),
        json!({ "messages": "hello" }),
        json!({ "messages": [] }),
        json!({ "messages": [{ "role": "user", "content": "" }] }),
    ];
    for body in bodies {
        let model = ScriptedModel::new(Vec::new());
        let state = build_state(Arc::clone(&model), None);
        let response = send(&state, chat_request(body.clone())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
        let payload: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("json payload");
        assert!(payload["error"].is_string());
        assert!(model.seen().is_empty());
    }
}

#[tokio::test]
async fn test_history_is_forwarded_with_last_message_as_user_content() {
    let model = ScriptedModel::new(vec![Ok(vec![text("ok"), end()])]);
    let state = build_state(Arc::clone(&model), None);

    let request = chat_request(json!({
        "messages": [
            { "role": "user", "content": "hi" },
            { "role": "assistant", "content": "hello" },
            { "role": "user", "content": "and now?" }
        ]
    }));
    assert_eq!(body_text(send(&state, request).await).await, "ok");
    assert_eq!(
        model.seen(),
        vec![Seen::Open {
            user_content: "and now?".into()
        }]
    );
}

/// Flags when the model stream it is attached to has been dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct EndlessModel {
    dropped: Arc<AtomicBool>,
    produced: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelClient for EndlessModel {
    fn model(&self) -> &str {
        "endless-model"
    }

    async fn open_turn_stream(&self, _input: TurnInput<'_>) -> Result<EventStream, RelayError> {
        let flag = DropFlag(Arc::clone(&self.dropped));
        let produced = Arc::clone(&self.produced);
        Ok(futures_util::stream::unfold(flag, move |flag| {
            let produced = Arc::clone(&produced);
            async move {
                produced.fetch_add(1, Ordering::SeqCst);
                Some((Ok(StreamEvent::TextDelta("tick ".into())), flag))
            }
        })
        .boxed())
    }
}

#[tokio::test]
async fn test_client_disconnect_abandons_model_stream() {
    let dropped = Arc::new(AtomicBool::new(false));
    let produced = Arc::new(AtomicUsize::new(0));
    let relay = ChatRelay::new(
        Arc::new(EndlessModel {
            dropped: Arc::clone(&dropped),
            produced: Arc::clone(&produced),
        }),
        fast_retry(),
        ThinkingTags::default(),
        "",
    );
    let state = Arc::new(AppState::new(AppConfig::default(), relay));

    let response = send(&state, ask("talk forever")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.expect("first chunk").expect("chunk");
    assert_eq!(&first[..], b"tick ");
    drop(body);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("model stream should be dropped after the client leaves");
    let after_drop = produced.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(produced.load(Ordering::SeqCst), after_drop);
}
