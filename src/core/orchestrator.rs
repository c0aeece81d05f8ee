//! 编排循环：一个回合内在模型调用与工具调度之间交替，直到模型给出最终回复或达到上限
//!
//! AWAITING_MODEL → 模型请求工具 → 逐个调度并回灌结果 → AWAITING_MODEL …
//! → 模型直接回复（Final）| 达到 max_iterations（MaxIterations，取最后一段非空文本或固定兜底语）。
//! 回合开始时使用调用方传入的模型快照，期间切换模型不影响本回合。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{ActiveModel, TokenUsage};
use crate::memory::Message;
use crate::tools::{ToolContext, ToolDispatcher, ToolResult};

/// 默认单回合模型调用上限
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// 达到上限且模型从未给出文本时的兜底回复
pub const TIMEOUT_FALLBACK: &str = "抱歉，处理时间过长。";

/// 一个回合的输入
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub user_id: String,
    pub system_prompt: String,
    /// 近期历史（不含本次输入）
    pub history: Vec<Message>,
    /// 本次用户输入，可带附件
    pub input: Message,
}

/// 回合内的一次工具调用
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: String,
    pub result: ToolResult,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Final,
    MaxIterations,
}

/// 回合结果
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    /// 发给用户的回复（含「已调用」汇总）
    pub reply: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: TokenUsage,
    pub iterations: usize,
    pub termination: Termination,
    pub model_id: String,
}

/// 编排器
pub struct Orchestrator {
    dispatcher: Arc<ToolDispatcher>,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(dispatcher: Arc<ToolDispatcher>, max_iterations: usize) -> Self {
        Self {
            dispatcher,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// 执行一个回合；模型后端失败直接返回错误，工具失败只作为结果回灌给模型
    pub async fn run_turn(&self, model: &ActiveModel, request: TurnRequest) -> Result<TurnOutcome, AgentError> {
        let profile = &model.profile;
        if !request.input.attachments.is_empty() && !profile.vision {
            return Err(AgentError::CapabilityMismatch(profile.id.clone()));
        }

        let registry = self.dispatcher.registry();
        let tools = registry.schemas_for(profile);
        let ctx = ToolContext::new(request.user_id.clone());

        let mut transcript = Vec::with_capacity(request.history.len() + 2);
        if !request.system_prompt.trim().is_empty() {
            transcript.push(Message::system(request.system_prompt));
        }
        transcript.extend(request.history);
        transcript.push(request.input);

        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut last_text: Option<String> = None;
        let mut iterations = 0;

        let termination = loop {
            if iterations >= self.max_iterations {
                break Termination::MaxIterations;
            }
            iterations += 1;

            let completion = model.client.complete(&transcript, &tools).await?;
            if let Some(u) = &completion.usage {
                usage.add(u);
            }
            let text = completion.content.unwrap_or_default();
            if !text.trim().is_empty() {
                last_text = Some(text.trim().to_string());
            }
            if completion.tool_calls.is_empty() {
                break Termination::Final;
            }

            transcript.push(Message::assistant_with_tools(text, completion.tool_calls.clone()));
            for call in completion.tool_calls {
                let result = self
                    .dispatcher
                    .dispatch_declared(&ctx, &tools, &call.name, &call.arguments)
                    .await;
                transcript.push(Message::tool(call.id.clone(), result.to_json_string()));
                records.push(ToolCallRecord {
                    name: call.name,
                    arguments: call.arguments,
                    result,
                });
            }
        };

        if termination == Termination::MaxIterations {
            tracing::warn!(
                user = %request.user_id,
                model = %profile.id,
                max_iterations = self.max_iterations,
                "turn reached max iterations"
            );
        }

        let mut reply = last_text.unwrap_or_else(|| TIMEOUT_FALLBACK.to_string());
        let categories = used_categories(&records, |name| registry.category_of(name));
        if !categories.is_empty() && !reply.contains("[已调用") {
            reply.push_str(&format!("\n\n[已调用{}]", categories.join("、")));
        }

        let tool_names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        tracing::info!(
            user = %request.user_id,
            model = %profile.id,
            iterations,
            tools = ?tool_names,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "turn finished"
        );

        Ok(TurnOutcome {
            reply,
            tool_calls: records,
            usage,
            iterations,
            termination,
            model_id: profile.id.clone(),
        })
    }
}

/// 去重后的类别名，保持首次出现顺序
fn used_categories(records: &[ToolCallRecord], category_of: impl Fn(&str) -> String) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for record in records {
        let category = category_of(&record.name);
        if !seen.contains(&category) {
            seen.push(category);
        }
    }
    seen
}
