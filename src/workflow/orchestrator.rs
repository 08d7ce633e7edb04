//! 工作流编排器
//!
//! Input → (ToolExecution →) MessageSummary → Input … → FinishWorkflow。
//! 每次运行创建独立的 WorkflowState，编排器本身只读共享，可并发运行多个工作流。
//! 单步失败时按 RecoveryEngine 的建议整步重试（默认最多一次），仍失败则终止本次运行。
//! 可选 event_tx：向观察者推送状态转移、工具结果等事件。

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::llm::LlmClient;
use crate::memory::{ContextWindowManager, Message};
use crate::tools::ToolExecutor;
use crate::workflow::decision::{decision_messages, decision_system_prompt, parse_decision};
use crate::workflow::events::WorkflowEvent;
use crate::workflow::report::{parse_report, report_messages, FinalReport};
use crate::workflow::state::{PruningParameters, WorkflowPhase, WorkflowState};

/// 工具结果事件中的预览长度
const RESULT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// 单次运行 Input 访问上限
    pub max_steps: usize,
    pub pruning: PruningParameters,
    pub self_schedule: bool,
    /// 附加到决策与报告提示中的自定义说明
    pub instructions: Option<String>,
    /// 单步整步重试次数
    pub step_retries: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_steps: 50,
            pruning: PruningParameters::default(),
            self_schedule: true,
            instructions: None,
            step_retries: 1,
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_steps: config.workflow.max_steps,
            pruning: PruningParameters::from(&config.workflow),
            self_schedule: config.workflow.self_schedule,
            instructions: None,
            step_retries: config.retry.step_retries,
        }
    }
}

/// 一次运行的完整结果：最终状态（含访问序列）与报告或错误
#[derive(Debug)]
pub struct WorkflowRun {
    pub state: WorkflowState,
    pub outcome: Result<FinalReport, AgentError>,
}

enum StepOutcome {
    Next(WorkflowPhase),
    Finished(FinalReport),
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    recovery: RecoveryEngine,
    options: OrchestratorOptions,
    cancel_token: CancellationToken,
    event_tx: Option<UnboundedSender<WorkflowEvent>>,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, executor: Arc<ToolExecutor>, options: OrchestratorOptions) -> Self {
        Self {
            llm,
            executor,
            recovery: RecoveryEngine::new(),
            options,
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<WorkflowEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// 决策客户端累计的 (prompt, completion, total) token
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 运行一次工作流，返回最终报告；编排器层面的失败以 Err 返回
    pub async fn run_workflow(&self, initial_messages: Vec<Message>) -> Result<FinalReport, AgentError> {
        self.run(initial_messages).await.outcome
    }

    /// 总是返回报告：失败时报告的 error 字段非空
    pub async fn run_reported(&self, initial_messages: Vec<Message>) -> FinalReport {
        match self.run_workflow(initial_messages).await {
            Ok(report) => report,
            Err(e) => FinalReport::failed(&e, Utc::now()),
        }
    }

    /// 运行一次工作流并保留最终状态
    pub async fn run(&self, initial_messages: Vec<Message>) -> WorkflowRun {
        let mut state = WorkflowState::new(initial_messages, self.options.pruning);
        info!(run_id = %state.run_id, messages = state.history.len(), "workflow started");

        let outcome = self.drive(&mut state).await;
        match &outcome {
            Ok(report) => info!(
                run_id = %state.run_id,
                steps = state.input_steps,
                extraction_failed = report.extraction_failed,
                "workflow finished"
            ),
            Err(e) => error!(run_id = %state.run_id, steps = state.input_steps, error = %e, "workflow aborted"),
        }
        self.emit(WorkflowEvent::Finished {
            run_id: state.run_id.clone(),
            failed: outcome.as_ref().map(|r| r.is_failure()).unwrap_or(true),
        });

        WorkflowRun { state, outcome }
    }

    async fn drive(&self, state: &mut WorkflowState) -> Result<FinalReport, AgentError> {
        let system_prompt = decision_system_prompt(
            &self.executor.registry().to_schema_json(),
            self.options.instructions.as_deref(),
        );
        let context = ContextWindowManager::new(state.pruning.max_history_before_summary);
        let mut phase = WorkflowPhase::Input;

        loop {
            if self.cancel_token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if phase == WorkflowPhase::Input {
                if state.input_steps >= self.options.max_steps {
                    return Err(AgentError::RunawayWorkflow {
                        max_steps: self.options.max_steps,
                    });
                }
                state.input_steps += 1;
            }
            state.visited.push(phase);
            self.emit(WorkflowEvent::StateEntered {
                run_id: state.run_id.clone(),
                phase,
            });

            let mut retries = 0;
            let outcome = loop {
                let attempt = tokio::select! {
                    biased;
                    _ = self.cancel_token.cancelled() => Err(AgentError::Cancelled),
                    r = self.step(phase, state, &system_prompt, &context) => r,
                };
                match attempt {
                    Ok(outcome) => break outcome,
                    Err(e) => {
                        let action = self.recovery.handle(&e);
                        if action == RecoveryAction::RetryStep && retries < self.options.step_retries {
                            retries += 1;
                            warn!(run_id = %state.run_id, %phase, error = %e, "step failed, retrying");
                            self.emit(WorkflowEvent::StepRetried {
                                run_id: state.run_id.clone(),
                                phase,
                                error: e.to_string(),
                            });
                            continue;
                        }
                        return Err(e);
                    }
                }
            };

            match outcome {
                StepOutcome::Next(next) => phase = next,
                StepOutcome::Finished(report) => return Ok(report),
            }
        }
    }

    async fn step(
        &self,
        phase: WorkflowPhase,
        state: &mut WorkflowState,
        system_prompt: &str,
        context: &ContextWindowManager,
    ) -> Result<StepOutcome, AgentError> {
        match phase {
            WorkflowPhase::Input => {
                let messages = decision_messages(system_prompt, &state.prompt_window());
                let output = self.llm.complete(&messages).await?;
                let decision = parse_decision(&output);

                state.history.push(Message::assistant(decision.text));
                state.pending_tool_calls = decision.tool_calls;
                state.control = Some(decision.control);

                if let Some(control) = &state.control {
                    self.emit(WorkflowEvent::Decided {
                        run_id: state.run_id.clone(),
                        tool_calls: state.pending_tool_calls.len(),
                        should_stop: control.should_stop,
                        reason: control.reason.clone(),
                    });
                }
                Ok(StepOutcome::Next(state.next_after_input()))
            }
            WorkflowPhase::ToolExecution => {
                for call in std::mem::take(&mut state.pending_tool_calls) {
                    let result = self.executor.execute(&call.name, call.arguments).await;
                    let ok = result.is_ok();
                    let content = match result {
                        Ok(output) => output,
                        Err(e) => {
                            warn!(run_id = %state.run_id, tool = %call.name, error = %e, "tool failed");
                            format!("Error: {}", e)
                        }
                    };
                    self.emit(WorkflowEvent::ToolResult {
                        run_id: state.run_id.clone(),
                        tool: call.name.clone(),
                        ok,
                        preview: content.chars().take(RESULT_PREVIEW_CHARS).collect(),
                    });
                    state.history.push(Message::tool(call.name, content));
                }
                Ok(StepOutcome::Next(WorkflowPhase::MessageSummary))
            }
            WorkflowPhase::MessageSummary => {
                let before = state.history.len();
                if context.maybe_summarize(&mut state.history, self.llm.as_ref()).await? {
                    self.emit(WorkflowEvent::Summarized {
                        run_id: state.run_id.clone(),
                        replaced: before - 1,
                    });
                }
                Ok(StepOutcome::Next(WorkflowPhase::Input))
            }
            WorkflowPhase::FinishWorkflow => {
                let finished_at = Utc::now();
                let messages = report_messages(
                    &state.history,
                    finished_at,
                    self.options.self_schedule,
                    self.options.instructions.as_deref(),
                );
                let output = self.llm.complete(&messages).await?;
                let mut report = parse_report(&output, finished_at, self.options.self_schedule);
                report.stop_reason = state.control.as_ref().map(|c| c.reason.clone());
                Ok(StepOutcome::Finished(report))
            }
        }
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}
