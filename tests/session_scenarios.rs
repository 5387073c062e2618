//! 会话级集成测试：脚本化模型 + mock 后端驱动公开的 run_session 接口
//!
//! 视频轮询间隔为真实的 3s，测试统一使用暂停时钟（start_paused），由 tokio 自动推进。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use campaign_agent::backends::{
    BackendError, BackendSet, MockImageBackend, MockTextBackend, MockVideoBackend,
};
use campaign_agent::content::{ContentKind, ContentStatus};
use campaign_agent::core::AgentError;
use campaign_agent::llm::{
    Message, ModelResponse, Role, ScriptStep, ScriptedTransport, StopSignal, ToolInvocation,
    TransportError,
};
use campaign_agent::session::{
    CampaignBrief, ConversationLoop, ProgressReporter, ProgressUpdate, SessionConfig, SessionEvent,
    SessionStatus, BUDGET_SKIP_MESSAGE, CONTINUE_PROMPT,
};
use campaign_agent::tools::{DispatchSettings, ToolDispatcher, ToolRegistry};
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct Harness {
    transport: Arc<ScriptedTransport>,
    text: Arc<MockTextBackend>,
    image: Arc<MockImageBackend>,
    video: Arc<MockVideoBackend>,
    runtime: ConversationLoop,
}

fn harness_with(
    steps: Vec<ScriptStep>,
    text: MockTextBackend,
    image: MockImageBackend,
    video: MockVideoBackend,
    settings: DispatchSettings,
) -> Harness {
    let transport = Arc::new(ScriptedTransport::from_steps(steps));
    let text = Arc::new(text);
    let image = Arc::new(image);
    let video = Arc::new(video);
    let backends = BackendSet::new()
        .with_text(text.clone())
        .with_image(image.clone())
        .with_video(video.clone());
    let dispatcher =
        ToolDispatcher::new(ToolRegistry::builtin().unwrap(), backends, settings).unwrap();
    let runtime = ConversationLoop::new(transport.clone(), Arc::new(dispatcher));
    Harness {
        transport,
        text,
        image,
        video,
        runtime,
    }
}

fn harness(responses: Vec<ModelResponse>) -> Harness {
    harness_with(
        responses.into_iter().map(ScriptStep::Respond).collect(),
        MockTextBackend::with_body("hello"),
        MockImageBackend::new(),
        MockVideoBackend::never_completing(),
        DispatchSettings::default(),
    )
}

fn recorder() -> (ProgressReporter, Arc<Mutex<Vec<ProgressUpdate>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let reporter = ProgressReporter::new(move |u| sink.lock().unwrap().push(u));
    (reporter, seen)
}

fn campaign(expected_items: usize) -> SessionConfig {
    let brief = CampaignBrief {
        brand_name: "Acme".to_string(),
        campaign_goal: "Spring launch".to_string(),
        ..CampaignBrief::default()
    };
    SessionConfig::campaign(brief, vec!["instagram".to_string()]).with_expected_items(expected_items)
}

fn post(id: &str) -> ToolInvocation {
    ToolInvocation::new(
        id,
        "generate_social_post",
        json!({ "platform": "instagram", "key_message": "Spring sale" }),
    )
}

fn image(id: &str) -> ToolInvocation {
    ToolInvocation::new(
        id,
        "generate_image",
        json!({ "platform": "instagram", "prompt": "Sneakers on a sunny street" }),
    )
}

fn video(id: &str) -> ToolInvocation {
    ToolInvocation::new(
        id,
        "generate_video",
        json!({ "platform": "tiktok", "prompt": "Ten second teaser" }),
    )
}

fn tool_results(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| m.role == Role::Tool).collect()
}

fn hundred_count(updates: &[ProgressUpdate]) -> usize {
    updates.iter().filter(|u| u.percent == 100).count()
}

#[tokio::test(start_paused = true)]
async fn test_text_tool_yields_complete_record() {
    let h = harness(vec![
        ModelResponse::tool_use("", vec![post("call_1")]),
        ModelResponse::complete("One post ready."),
    ]);
    let (progress, updates) = recorder();

    let result = h
        .runtime
        .run_session(&campaign(1), progress, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Complete);
    assert_eq!(result.records.len(), 1);
    let record = &result.records[0];
    assert_eq!(record.kind, ContentKind::Text);
    assert_eq!(record.status, ContentStatus::Complete);
    assert_eq!(record.payload, "hello");
    assert_eq!(record.invocation_id, "call_1");
    assert_eq!(result.summary.as_deref(), Some("One post ready."));
    assert_eq!(h.text.calls(), 1);

    let updates = updates.lock().unwrap();
    assert_eq!(hundred_count(&updates), 1);
    assert_eq!(updates.last().unwrap().percent, 100);
    let percents: Vec<u8> = updates.iter().map(|u| u.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert!(updates
        .iter()
        .any(|u| u.record.as_ref().is_some_and(|r| r.payload == "hello")));
}

#[tokio::test(start_paused = true)]
async fn test_missing_image_credentials_degrade_to_placeholder() {
    let h = harness_with(
        vec![
            ScriptStep::Respond(ModelResponse::tool_use("", vec![image("img_1")])),
            ScriptStep::Respond(ModelResponse::complete("done")),
        ],
        MockTextBackend::new(),
        MockImageBackend::failing(BackendError::MissingCredentials("OPENAI_API_KEY".to_string())),
        MockVideoBackend::never_completing(),
        DispatchSettings {
            image_placeholder_on_error: false,
            ..DispatchSettings::default()
        },
    );

    let result = h
        .runtime
        .run_session(&campaign(1), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.records.len(), 1);
    let record = &result.records[0];
    assert_eq!(record.kind, ContentKind::Image);
    assert_eq!(record.status, ContentStatus::Complete);
    assert!(record.payload.starts_with("placeholder://image/instagram/"));
    assert!(record.reason.as_deref().unwrap().contains("placeholder"));
    assert_eq!(h.image.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_image_provider_error_without_placeholder_policy_is_error_record() {
    let h = harness_with(
        vec![ScriptStep::Respond(ModelResponse::tool_use("", vec![image("img_1")]))],
        MockTextBackend::new(),
        MockImageBackend::failing(BackendError::Unavailable("HTTP 503".to_string())),
        MockVideoBackend::never_completing(),
        DispatchSettings {
            image_placeholder_on_error: false,
            ..DispatchSettings::default()
        },
    );

    let result = h
        .runtime
        .run_session(&campaign(1), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].status, ContentStatus::Error);
    assert!(result.records[0].payload.is_empty());
    // 失败信息也回传给了模型
    let second = h.transport.request_messages(1).unwrap();
    let results = tool_results(&second);
    assert_eq!(results.len(), 1);
    assert!(results[0].content.contains("HTTP 503"));
}

#[tokio::test(start_paused = true)]
async fn test_video_completes_after_three_pending_polls() {
    let h = harness_with(
        vec![
            ScriptStep::Respond(ModelResponse::tool_use("", vec![video("vid_1")])),
            ScriptStep::Respond(ModelResponse::complete("Teaser ready.")),
        ],
        MockTextBackend::new(),
        MockImageBackend::new(),
        MockVideoBackend::completing_after(3, "https://cdn.example/teaser.mp4"),
        DispatchSettings::default(),
    );

    let result = h
        .runtime
        .run_session(&campaign(1), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Complete);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].kind, ContentKind::Video);
    assert_eq!(result.records[0].status, ContentStatus::Complete);
    assert_eq!(result.records[0].payload, "https://cdn.example/teaser.mp4");
    assert_eq!(h.video.submits(), 1);
    assert_eq!(h.video.polls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_video_poll_cap_yields_skipped_record() {
    let h = harness(vec![
        ModelResponse::tool_use("", vec![video("vid_1")]),
        ModelResponse::complete("Video could not be finished."),
    ]);

    let result = h
        .runtime
        .run_session(&campaign(1), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].status, ContentStatus::Skipped);
    assert_eq!(h.video.polls(), 40);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.video.polls(), 40);
}

#[tokio::test(start_paused = true)]
async fn test_no_tools_and_not_done_appends_one_continuation() {
    let h = harness(vec![
        ModelResponse::incomplete(""),
        ModelResponse::complete("Nothing else needed."),
    ]);

    let result = h
        .runtime
        .run_session(&campaign(1), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Complete);
    assert_eq!(result.iterations, 2);
    assert_eq!(h.transport.request_count(), 2);

    let first = h.transport.request_messages(0).unwrap();
    let second = h.transport.request_messages(1).unwrap();
    assert_eq!(second.len(), first.len() + 1);
    let last = second.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(last.content, CONTINUE_PROMPT);
    let continuations = second.iter().filter(|m| m.content == CONTINUE_PROMPT).count();
    assert_eq!(continuations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_poll_keeps_partial_results() {
    let h = harness(vec![
        ModelResponse::tool_use("", vec![post("call_1"), video("vid_1")]),
        ModelResponse::complete("unreachable"),
    ]);
    let (progress, updates) = recorder();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    let result = h.runtime.run_session(&campaign(2), progress, cancel).await.unwrap();

    assert_eq!(result.status, SessionStatus::Cancelled);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].kind, ContentKind::Text);
    assert_eq!(h.transport.request_count(), 1);

    let polls_at_cancel = h.video.polls();
    assert_eq!(polls_at_cancel, 3);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.video.polls(), polls_at_cancel);
    assert_eq!(h.text.calls(), 1);
    assert_eq!(hundred_count(&updates.lock().unwrap()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_item_cap_skips_excess_invocations() {
    let h = harness(vec![ModelResponse::tool_use(
        "",
        vec![post("a"), post("b"), post("c")],
    )]);
    let config = campaign(2).with_tolerance(1.0);

    let result = h
        .runtime
        .run_session(&config, ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::BudgetExhausted);
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.dispatched, 2);
    assert_eq!(h.text.calls(), 2);
    assert_eq!(h.transport.request_count(), 1);

    let results = tool_results(&result.messages);
    assert_eq!(results.len(), 3);
    assert_eq!(results[2].tool_call_id.as_deref(), Some("c"));
    assert_eq!(results[2].content, BUDGET_SKIP_MESSAGE);
}

#[tokio::test(start_paused = true)]
async fn test_iteration_budget_stops_loop() {
    let h = harness(vec![
        ModelResponse::incomplete("hmm"),
        ModelResponse::incomplete("still thinking"),
        ModelResponse::incomplete("more"),
    ]);
    let (progress, updates) = recorder();
    let config = campaign(1).with_max_iterations(2);

    let result = h
        .runtime
        .run_session(&config, progress, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::BudgetExhausted);
    assert_eq!(result.iterations, 2);
    assert_eq!(h.transport.request_count(), 2);
    assert_eq!(hundred_count(&updates.lock().unwrap()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_aborts_session() {
    let h = harness_with(
        vec![
            ScriptStep::Respond(ModelResponse::tool_use("", vec![post("call_1")])),
            ScriptStep::Fail(TransportError::Api("upstream overloaded".to_string())),
        ],
        MockTextBackend::with_body("hello"),
        MockImageBackend::new(),
        MockVideoBackend::never_completing(),
        DispatchSettings::default(),
    );
    let (progress, updates) = recorder();

    let err = h
        .runtime
        .run_session(&campaign(1), progress, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Transport(TransportError::Api(_))));
    assert!(!err.is_configuration());
    assert_eq!(hundred_count(&updates.lock().unwrap()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_tool_and_invalid_input_are_reported_to_model() {
    let bad_post = ToolInvocation::new(
        "bad",
        "generate_social_post",
        json!({ "platform": "instagram" }),
    );
    let unknown = ToolInvocation::new("coffee", "make_coffee", json!({}));
    let h = harness(vec![
        ModelResponse::tool_use("", vec![bad_post, unknown]),
        ModelResponse::complete("Gave up."),
    ]);

    let result = h
        .runtime
        .run_session(&campaign(1), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert!(result.records.is_empty());
    assert_eq!(result.rejected, 2);
    assert_eq!(h.text.calls(), 0);

    let second = h.transport.request_messages(1).unwrap();
    let results = tool_results(&second);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].tool_call_id.as_deref(), Some("bad"));
    assert!(results[0].content.contains("key_message"));
    assert_eq!(results[1].content, "unknown tool: make_coffee");
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_invocation_id_is_not_dispatched_twice() {
    let h = harness(vec![
        ModelResponse::tool_use("", vec![post("same")]),
        ModelResponse::tool_use("", vec![post("same")]),
        ModelResponse::complete("done"),
    ]);

    let result = h
        .runtime
        .run_session(&campaign(2), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Complete);
    assert_eq!(h.text.calls(), 1);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.dispatched, 1);
}

#[tokio::test(start_paused = true)]
async fn test_research_session_restricts_tools() {
    let h = harness(vec![
        ModelResponse::tool_use("", vec![image("img_1"), post("call_1")]),
        ModelResponse::complete("Here is your post."),
    ]);
    let history = vec![
        Message::user("Who buys our sneakers?"),
        Message::assistant("Mostly runners aged 25 to 40."),
    ];
    let config = SessionConfig::research(history, "Write an Instagram post for them")
        .with_allowed_tools(vec!["generate_social_post".to_string()]);

    let result = h
        .runtime
        .run_session(&config, ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.image.calls(), 0);
    assert_eq!(h.text.calls(), 1);
    assert_eq!(result.records.len(), 1);
    let first = h.transport.request_messages(0).unwrap();
    assert_eq!(first.len(), 3);
    let results = tool_results(&result.messages);
    assert_eq!(results[0].content, "unknown tool: generate_image");
}

#[tokio::test(start_paused = true)]
async fn test_wall_clock_limit_returns_partial_results() {
    let h = harness(vec![
        ModelResponse::tool_use("", vec![post("call_1"), video("vid_1")]),
        ModelResponse::complete("unreachable"),
    ]);
    let config = campaign(2).with_wall_clock_limit(Some(Duration::from_secs(30)));

    let result = h
        .runtime
        .run_session(&config, ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::DeadlineExceeded);
    assert!(result.status.is_degraded());
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].kind, ContentKind::Text);
    assert_eq!(result.rejected, 0);
    assert_eq!(h.transport.request_count(), 1);

    let results = tool_results(&result.messages);
    assert_eq!(results.len(), 2);
    assert!(results[1].content.contains("cancelled"));

    let polls_at_deadline = h.video.polls();
    assert!(polls_at_deadline <= 10);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.video.polls(), polls_at_deadline);
}

#[tokio::test(start_paused = true)]
async fn test_wall_clock_limit_bounds_dispatch_phase() {
    let videos: Vec<ToolInvocation> = (1..=6).map(|i| video(&format!("vid_{i}"))).collect();
    let h = harness(vec![
        ModelResponse::tool_use("", videos),
        ModelResponse::complete("unreachable"),
    ]);
    let limit = Duration::from_secs(30);
    let poll_interval = DispatchSettings::default().poll.interval;
    let config = campaign(6).with_wall_clock_limit(Some(limit));
    let (progress, updates) = recorder();

    let started = tokio::time::Instant::now();
    let result = h
        .runtime
        .run_session(&config, progress, CancellationToken::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed <= limit + poll_interval, "session ran for {elapsed:?}");
    assert_eq!(result.status, SessionStatus::DeadlineExceeded);
    assert!(result.records.is_empty());
    assert_eq!(result.dispatched, 6);
    assert_eq!(result.rejected, 0);
    assert_eq!(h.transport.request_count(), 1);
    // 排队等槽位的三个调用在到点后不再提交
    assert_eq!(h.video.submits(), 3);
    assert_eq!(tool_results(&result.messages).len(), 6);
    assert_eq!(hundred_count(&updates.lock().unwrap()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_records_follow_completion_order() {
    let h = harness_with(
        vec![
            ScriptStep::Respond(ModelResponse::tool_use("", vec![video("vid_1"), post("call_1")])),
            ScriptStep::Respond(ModelResponse::complete("All set.")),
        ],
        MockTextBackend::with_body("hello"),
        MockImageBackend::new(),
        MockVideoBackend::completing_after(0, "https://cdn.example/teaser.mp4"),
        DispatchSettings::default(),
    );

    let result = h
        .runtime
        .run_session(&campaign(2), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Complete);
    let kinds: Vec<ContentKind> = result.records.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![ContentKind::Text, ContentKind::Video]);

    // 折回对话的工具结果仍按调用顺序
    let results = tool_results(&result.messages);
    let ids: Vec<Option<&str>> = results.iter().map(|m| m.tool_call_id.as_deref()).collect();
    assert_eq!(ids, vec![Some("vid_1"), Some("call_1")]);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_progress_callback_does_not_abort_session() {
    let h = harness(vec![
        ModelResponse::tool_use("", vec![post("call_1")]),
        ModelResponse::complete("One post ready."),
    ]);
    let progress = ProgressReporter::new(|update| panic!("progress sink closed at {}%", update.percent));

    let result = h
        .runtime
        .run_session(&campaign(1), progress, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Complete);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].status, ContentStatus::Complete);
    assert_eq!(h.text.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_null_optional_fields_produce_complete_record() {
    let h = harness(vec![
        ModelResponse::tool_use(
            "",
            vec![ToolInvocation::new(
                "call_1",
                "generate_social_post",
                json!({
                    "platform": "instagram",
                    "key_message": "hi",
                    "include_hashtags": null,
                    "content_type": null
                }),
            )],
        ),
        ModelResponse::complete("done"),
    ]);

    let result = h
        .runtime
        .run_session(&campaign(1), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.rejected, 0);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].status, ContentStatus::Complete);
    assert_eq!(h.text.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_stream_ends_with_terminated() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = Arc::new(ScriptedTransport::new(vec![
        ModelResponse::tool_use("", vec![post("call_1")]),
        ModelResponse::complete("done"),
    ]));
    let backends = BackendSet::new()
        .with_text(Arc::new(MockTextBackend::with_body("hello")))
        .with_image(Arc::new(MockImageBackend::new()))
        .with_video(Arc::new(MockVideoBackend::never_completing()));
    let dispatcher = ToolDispatcher::new(
        ToolRegistry::builtin().unwrap(),
        backends,
        DispatchSettings::default(),
    )
    .unwrap();
    let runtime = ConversationLoop::new(transport, Arc::new(dispatcher)).with_event_tx(tx);

    runtime
        .run_session(&campaign(1), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();
    drop(runtime);

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    assert!(matches!(events[0], SessionEvent::Thinking { iteration: 1, .. }));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ToolResult { ok: true, .. })));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Terminated {
            status: SessionStatus::Complete,
            records: 1
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_complete_signal_with_tool_calls_finishes_after_folding() {
    let h = harness(vec![ModelResponse::tool_use("Last post, then done.", vec![post("call_1")])
        .with_stop(StopSignal::Complete)]);

    let result = h
        .runtime
        .run_session(&campaign(1), ProgressReporter::silent(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Complete);
    assert_eq!(result.records.len(), 1);
    assert_eq!(h.transport.request_count(), 1);
    assert_eq!(result.summary.as_deref(), Some("Last post, then done."));
    assert_eq!(tool_results(&result.messages).len(), 1);
}
