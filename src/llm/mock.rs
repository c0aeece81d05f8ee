//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 默认回显最后一条用户消息；可预置脚本（依次返回）或固定返回同一结果，并记录每次收到的请求。

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::core::LlmError;
use crate::llm::{Completion, LlmClient, ToolSchema};
use crate::memory::{Message, Role};

enum Mode {
    Echo,
    Script(VecDeque<Result<Completion, LlmError>>),
    Repeat(Result<Completion, LlmError>),
}

/// 一次被记录的请求
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

/// Mock 客户端
pub struct MockLlmClient {
    mode: Mutex<Mode>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    /// 回显模式
    pub fn new() -> Self {
        Self::with_mode(Mode::Echo)
    }

    /// 依次返回脚本中的结果，用完后回到回显模式
    pub fn scripted(script: Vec<Completion>) -> Self {
        Self::with_mode(Mode::Script(script.into_iter().map(Ok).collect()))
    }

    /// 每次都返回同一结果（如总是请求工具）
    pub fn repeating(completion: Completion) -> Self {
        Self::with_mode(Mode::Repeat(Ok(completion)))
    }

    /// 每次都失败
    pub fn failing(error: LlmError) -> Self {
        Self::with_mode(Mode::Repeat(Err(error)))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode: Mutex::new(mode),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn echo(messages: &[Message]) -> Completion {
        if matches!(messages.last().map(|m| m.role), Some(Role::Tool)) {
            return Completion::text("好的，已为您处理完成。");
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Completion::text(format!("收到：{last_user}"))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Completion, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });

        let mut mode = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *mode {
            Mode::Echo => Ok(Self::echo(messages)),
            Mode::Repeat(result) => result.clone(),
            Mode::Script(script) => match script.pop_front() {
                Some(result) => result,
                None => Ok(Self::echo(messages)),
            },
        }
    }
}
