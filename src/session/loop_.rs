//! 会话主循环
//!
//! Thinking -> Dispatching -> Folding -> Thinking ... -> Terminated。
//! 一轮回复中的多个工具调用并发分发（TaskScheduler 限流），结果按完成顺序进入累加器，
//! 工具结果消息按调用顺序折回对话。终止条件：模型结束信号、轮数 / 条数上限、取消、墙钟上限（模型调用与工具分发期间都生效）。
//! 只有模型传输失败是致命的；单个工具的失败都以数据形式返回给模型与调用方。

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, TaskScheduler};
use crate::llm::{Message, ModelRequest, ModelResponse, ModelTransport, StopSignal, ToolInvocation};
use crate::session::events::preview;
use crate::session::{
    ProgressReporter, ResultAccumulator, SessionConfig, SessionEvent, SessionResult, SessionStatus,
    UsageSummary, CONTINUE_PROMPT,
};
use crate::tools::{DispatchOutcome, ToolDispatcher};

/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 超出条数上限的调用返回给模型的说明
pub const BUDGET_SKIP_MESSAGE: &str = "skipped: item budget reached";

/// 同一 id 重复出现时返回给模型的说明
const DUPLICATE_MESSAGE: &str = "skipped: duplicate invocation id, already handled";

/// 循环状态
#[derive(Debug)]
enum LoopState {
    Thinking,
    Dispatching(ModelResponse),
    Folding(ModelResponse, Vec<DispatchOutcome>),
    Terminated(SessionStatus),
}

/// 单个调用在本轮的安排：真正分发，或由循环直接给出结果
enum Planned<'a> {
    Run(&'a ToolInvocation),
    Settled(DispatchOutcome),
}

/// 模型调用被打断的原因
enum Interrupted {
    Cancelled,
    Deadline,
}

/// 循环内的可变记账
struct Ledger {
    messages: Vec<Message>,
    seen_ids: HashSet<String>,
    iterations: usize,
    dispatched: usize,
    rejected: usize,
    budget_hit: bool,
    /// 墙钟在分发阶段到点
    deadline_hit: bool,
    summary: Option<String>,
}

fn send_event(tx: &Option<UnboundedSender<SessionEvent>>, ev: SessionEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

fn final_message(status: SessionStatus, records: usize) -> String {
    match status {
        SessionStatus::Complete => format!("Campaign complete: {records} item(s)"),
        SessionStatus::BudgetExhausted => format!("Stopped at budget limit: {records} item(s)"),
        SessionStatus::Cancelled => format!("Cancelled: {records} item(s) kept"),
        SessionStatus::DeadlineExceeded => format!("Time limit reached: {records} item(s) kept"),
    }
}

/// 会话循环：持有模型传输与工具分发器，可重复运行多个会话
pub struct ConversationLoop {
    transport: Arc<dyn ModelTransport>,
    dispatcher: Arc<ToolDispatcher>,
    event_tx: Option<UnboundedSender<SessionEvent>>,
}

impl ConversationLoop {
    pub fn new(transport: Arc<dyn ModelTransport>, dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            transport,
            dispatcher,
            event_tx: None,
        }
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<SessionEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// 运行一个会话直到终止。
    ///
    /// 返回 Err 只有一种情况：模型传输失败。已累积的记录随错误一起丢弃前会写入日志。
    pub async fn run_session(
        &self,
        config: &SessionConfig,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<SessionResult, AgentError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let registry = self.dispatcher.registry().restricted(&config.allowed_tools);
        let tools = registry.definitions();
        let system = config.system_prompt(&registry);
        let scheduler = TaskScheduler::new(config.max_concurrent_dispatches);
        let deadline = config.wall_clock_limit.map(|limit| Instant::now() + limit);
        let item_cap = config.item_cap();
        let usage_before = self.transport.token_usage();
        let accumulator = ResultAccumulator::new();

        let mut ledger = Ledger {
            messages: config.initial_messages(),
            seen_ids: HashSet::new(),
            iterations: 0,
            dispatched: 0,
            rejected: 0,
            budget_hit: false,
            deadline_hit: false,
            summary: None,
        };

        tracing::info!(
            session_id = %session_id,
            tools = tools.len(),
            expected_items = config.expected_items,
            item_cap,
            max_iterations = config.max_iterations,
            max_concurrent = scheduler.max_concurrent(),
            "session started"
        );

        let mut state = LoopState::Thinking;
        let status = loop {
            state = match state {
                LoopState::Thinking => {
                    if cancel.is_cancelled() {
                        LoopState::Terminated(SessionStatus::Cancelled)
                    } else if ledger.iterations >= config.max_iterations {
                        tracing::warn!(session_id = %session_id, iterations = ledger.iterations, "iteration budget exhausted");
                        LoopState::Terminated(SessionStatus::BudgetExhausted)
                    } else if deadline.is_some_and(|at| Instant::now() >= at) {
                        LoopState::Terminated(SessionStatus::DeadlineExceeded)
                    } else {
                        progress.report(
                            accumulator.len(),
                            config.expected_items,
                            format!("Thinking (turn {}/{})", ledger.iterations + 1, config.max_iterations),
                            None,
                        );
                        send_event(
                            &self.event_tx,
                            SessionEvent::Thinking {
                                iteration: ledger.iterations + 1,
                                max_iterations: config.max_iterations,
                            },
                        );

                        let request = ModelRequest {
                            system: &system,
                            tools: &tools,
                            messages: &ledger.messages,
                        };
                        let response = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
                            _ = wait_deadline(deadline) => Err(Interrupted::Deadline),
                            r = self.transport.respond(request) => Ok(r),
                        };
                        ledger.iterations += 1;

                        match response {
                            Err(Interrupted::Cancelled) => LoopState::Terminated(SessionStatus::Cancelled),
                            Err(Interrupted::Deadline) => {
                                tracing::warn!(session_id = %session_id, "wall clock limit hit during model call");
                                LoopState::Terminated(SessionStatus::DeadlineExceeded)
                            }
                            Ok(Err(e)) => {
                                tracing::error!(
                                    session_id = %session_id,
                                    iteration = ledger.iterations,
                                    records = accumulator.len(),
                                    error = %e,
                                    "model transport failed, aborting session"
                                );
                                progress.finish(format!("Session aborted: {e}"));
                                return Err(AgentError::Transport(e));
                            }
                            Ok(Ok(response)) => self.route(response, &mut ledger),
                        }
                    }
                }

                LoopState::Dispatching(response) => {
                    let planned = self.plan(&response.tool_calls, &registry, item_cap, &mut ledger);
                    // 本轮分发用子 token：墙钟到点时只取消在途分发，会话 token 不受影响
                    let turn_cancel = cancel.child_token();
                    let outcomes = {
                        let scheduler = &scheduler;
                        let accumulator = &accumulator;
                        let progress = &progress;
                        let turn_cancel = &turn_cancel;
                        let expected = config.expected_items;
                        let dispatches = join_all(planned.into_iter().map(|plan| async move {
                            let invocation = match plan {
                                Planned::Settled(outcome) => return outcome,
                                Planned::Run(invocation) => invocation,
                            };
                            let _permit = scheduler.acquire_tool().await;
                            tracing::debug!(
                                invocation_id = %invocation.id,
                                tool = %invocation.name,
                                free_slots = scheduler.available(),
                                "dispatch slot acquired"
                            );
                            send_event(
                                &self.event_tx,
                                SessionEvent::ToolCall {
                                    id: invocation.id.clone(),
                                    tool: invocation.name.clone(),
                                    input: invocation.input.clone(),
                                },
                            );
                            let outcome = self.dispatcher.dispatch(invocation, turn_cancel).await;
                            let completed = match &outcome.record {
                                Some(record) => accumulator.append(record.clone()),
                                None => accumulator.len(),
                            };
                            progress.report(
                                completed,
                                expected,
                                format!("{} finished", invocation.name),
                                outcome.record.as_ref(),
                            );
                            outcome
                        }));
                        tokio::pin!(dispatches);
                        tokio::select! {
                            biased;
                            outcomes = &mut dispatches => outcomes,
                            _ = wait_deadline(deadline) => {
                                tracing::warn!(session_id = %session_id, "wall clock limit hit during dispatch, cancelling in-flight tools");
                                ledger.deadline_hit = true;
                                turn_cancel.cancel();
                                dispatches.await
                            }
                        }
                    };
                    LoopState::Folding(response, outcomes)
                }

                LoopState::Folding(response, outcomes) => {
                    self.fold(&response, &outcomes, &mut ledger);
                    if cancel.is_cancelled() {
                        LoopState::Terminated(SessionStatus::Cancelled)
                    } else if ledger.deadline_hit {
                        LoopState::Terminated(SessionStatus::DeadlineExceeded)
                    } else if response.stop == StopSignal::Complete {
                        if !response.content.trim().is_empty() {
                            ledger.summary = Some(response.content.clone());
                        }
                        LoopState::Terminated(SessionStatus::Complete)
                    } else if ledger.budget_hit {
                        tracing::warn!(session_id = %session_id, item_cap, "item budget exhausted");
                        LoopState::Terminated(SessionStatus::BudgetExhausted)
                    } else {
                        LoopState::Thinking
                    }
                }

                LoopState::Terminated(status) => break status,
            };
            if let LoopState::Terminated(status) = state {
                break status;
            }
        };

        let records = accumulator.into_records();
        progress.finish(final_message(status, records.len()));
        send_event(
            &self.event_tx,
            SessionEvent::Terminated {
                status,
                records: records.len(),
            },
        );

        let (p1, c1, t1) = self.transport.token_usage();
        let (p0, c0, t0) = usage_before;
        let usage = UsageSummary {
            prompt_tokens: p1.saturating_sub(p0),
            completion_tokens: c1.saturating_sub(c0),
            total_tokens: t1.saturating_sub(t0),
        };

        tracing::info!(
            session_id = %session_id,
            status = ?status,
            records = records.len(),
            iterations = ledger.iterations,
            dispatched = ledger.dispatched,
            rejected = ledger.rejected,
            total_tokens = usage.total_tokens,
            "session finished"
        );

        Ok(SessionResult {
            session_id,
            status,
            records,
            summary: ledger.summary,
            iterations: ledger.iterations,
            dispatched: ledger.dispatched,
            rejected: ledger.rejected,
            usage,
            messages: ledger.messages,
        })
    }

    /// 根据模型回复决定下一状态
    fn route(&self, response: ModelResponse, ledger: &mut Ledger) -> LoopState {
        if !response.tool_calls.is_empty() {
            return LoopState::Dispatching(response);
        }
        let has_text = !response.content.trim().is_empty();
        if response.stop == StopSignal::Complete {
            if has_text {
                ledger.messages.push(Message::assistant(response.content.clone()));
                ledger.summary = Some(response.content);
            }
            return LoopState::Terminated(SessionStatus::Complete);
        }
        // 未结束也未调用工具：补一条继续指令再问一次
        if has_text {
            ledger.messages.push(Message::assistant(response.content));
        }
        ledger.messages.push(Message::user(CONTINUE_PROMPT));
        send_event(
            &self.event_tx,
            SessionEvent::Continuation {
                iteration: ledger.iterations,
            },
        );
        LoopState::Thinking
    }

    /// 为本轮每个调用安排去向：重复 id、超出条数上限、本会话不可用的工具由循环直接给出结果
    fn plan<'r>(
        &self,
        calls: &'r [ToolInvocation],
        registry: &crate::tools::ToolRegistry,
        item_cap: usize,
        ledger: &mut Ledger,
    ) -> Vec<Planned<'r>> {
        calls
            .iter()
            .map(|invocation| {
                if !ledger.seen_ids.insert(invocation.id.clone()) {
                    tracing::warn!(invocation_id = %invocation.id, tool = %invocation.name, "duplicate invocation id ignored");
                    return Planned::Settled(DispatchOutcome::not_run(invocation, DUPLICATE_MESSAGE));
                }
                if ledger.dispatched >= item_cap {
                    ledger.budget_hit = true;
                    return Planned::Settled(DispatchOutcome::not_run(invocation, BUDGET_SKIP_MESSAGE));
                }
                ledger.dispatched += 1;
                if !registry.contains(&invocation.name) {
                    return Planned::Settled(DispatchOutcome::rejected(
                        invocation,
                        format!("unknown tool: {}", invocation.name),
                    ));
                }
                Planned::Run(invocation)
            })
            .collect()
    }

    /// 把本轮的 assistant 消息与每个调用的结果折回对话（按调用顺序，一一对应）
    fn fold(&self, response: &ModelResponse, outcomes: &[DispatchOutcome], ledger: &mut Ledger) {
        ledger.messages.push(Message::assistant_with_tools(
            response.content.clone(),
            response.tool_calls.clone(),
        ));
        for outcome in outcomes {
            if outcome.is_error && outcome.record.is_none() {
                ledger.rejected += 1;
            }
            send_event(
                &self.event_tx,
                SessionEvent::ToolResult {
                    id: outcome.invocation_id.clone(),
                    tool: outcome.tool.clone(),
                    ok: !outcome.is_error,
                    preview: preview(&outcome.message, RESULT_PREVIEW_CHARS),
                },
            );
            ledger
                .messages
                .push(Message::tool_result(outcome.invocation_id.clone(), outcome.message.clone()));
        }
    }
}
