//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、模型注册表与运行时切换

pub mod mock;
pub mod openai;
pub mod registry;
pub mod traits;

use std::sync::Arc;

pub use mock::{MockLlmClient, RecordedRequest};
pub use openai::OpenAiClient;
pub use registry::{ActiveModel, ClientFactory, ModelProfile, ModelRegistry, Provider};
pub use traits::{Completion, LlmClient, TokenUsage, ToolInvocation, ToolSchema};

use crate::core::AgentError;

/// 按 profile.provider 构建客户端的默认工厂
pub fn default_client_factory(request_timeout_secs: u64) -> ClientFactory {
    Arc::new(move |profile: &ModelProfile| -> Result<Arc<dyn LlmClient>, AgentError> {
        match profile.provider {
            Provider::Mock => Ok(Arc::new(MockLlmClient::new())),
            Provider::OpenAi => {
                let client = OpenAiClient::new(profile, request_timeout_secs)?;
                Ok(Arc::new(client))
            }
        }
    })
}
