//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、Gemini 代理等。
//! 工具声明与 tool_calls 往返、图片 data URL 均使用 async_openai 的类型；
//! Gemini 的 thinking_config 不在标准请求里，配置了思考预算时改走 byot 请求。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart, ChatCompletionTool,
    ChatCompletionTools, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, FunctionCall, FunctionObjectArgs, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use crate::core::LlmError;
use crate::llm::{Completion, LlmClient, ModelProfile, TokenUsage, ToolInvocation, ToolSchema};
use crate::memory::{Message, Role};

#[derive(Clone, Copy, Debug)]
struct ThinkingConfig {
    budget: i64,
    include_thoughts: bool,
}

/// OpenAI 兼容客户端：持有 async_openai Client 与模型参数
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    thinking: Option<ThinkingConfig>,
}

impl OpenAiClient {
    pub fn new(profile: &ModelProfile, request_timeout_secs: u64) -> Result<Self, LlmError> {
        let api_key = profile
            .resolve_api_key()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());
        let config = OpenAIConfig::new()
            .with_api_base(profile.base_url.trim_end_matches('/'))
            .with_api_key(api_key);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        Ok(Self {
            client: Client::with_config(config).with_http_client(http),
            model: profile.model.clone(),
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            thinking: profile.thinking_budget.map(|budget| ThinkingConfig {
                budget,
                include_thoughts: profile.include_thoughts,
            }),
        })
    }

    // 兼容端点普遍只认 max_tokens
    #[allow(deprecated)]
    fn build_request(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: &[ToolSchema],
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(request_error)?;
        if !tools.is_empty() {
            request.tools = Some(tools.iter().map(to_openai_tool).collect::<Result<Vec<_>, _>>()?);
        }
        Ok(request)
    }

    /// 标准请求体加上 Gemini 的 extra_body.google.thinking_config
    fn with_thinking(request: &CreateChatCompletionRequest, thinking: ThinkingConfig) -> Result<Value, LlmError> {
        let mut body = serde_json::to_value(request).map_err(|e| LlmError::Request(e.to_string()))?;
        body["extra_body"] = json!({
            "google": {
                "thinking_config": {
                    "thinking_budget": thinking.budget,
                    "include_thoughts": thinking.include_thoughts,
                }
            }
        });
        Ok(body)
    }
}

fn request_error(e: OpenAIError) -> LlmError {
    LlmError::Request(e.to_string())
}

fn to_openai_tool(tool: &ToolSchema) -> Result<ChatCompletionTools, LlmError> {
    let function = FunctionObjectArgs::default()
        .name(tool.name.clone())
        .description(tool.description.clone())
        .parameters(tool.parameters.clone())
        .build()
        .map_err(request_error)?;
    let tool = ChatCompletionTool { function };
    Ok(ChatCompletionTools::Function(tool))
}

/// 内部消息转为 API 消息；带附件的用户消息转为文本 + 图片多段 content
async fn to_openai_message(message: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let converted: ChatCompletionRequestMessage = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(request_error)?
            .into(),
        Role::Tool => ChatCompletionRequestToolMessageArgs::default()
            .tool_call_id(message.tool_call_id.clone().unwrap_or_default())
            .content(message.content.clone())
            .build()
            .map_err(request_error)?
            .into(),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls = message
                .tool_calls
                .iter()
                .map(|c| {
                    ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                        id: c.id.clone(),
                        function: FunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                })
                .collect::<Vec<_>>();
            // 部分兼容端点不接受 null content
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.clone())
                .tool_calls(calls)
                .build()
                .map_err(request_error)?
                .into()
        }
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(request_error)?
            .into(),
        Role::User if !message.attachments.is_empty() => {
            let text = ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(message.content.clone())
                .build()
                .map_err(request_error)?;
            let mut parts = vec![ChatCompletionRequestUserMessageContentPart::Text(text)];
            for attachment in &message.attachments {
                let bytes = attachment
                    .load()
                    .await
                    .map_err(|e| LlmError::Request(format!("read attachment: {e}")))?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                let image_url = ImageUrlArgs::default()
                    .url(format!("data:{};base64,{}", attachment.mime_type, encoded))
                    .build()
                    .map_err(request_error)?;
                let image = ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(image_url)
                    .build()
                    .map_err(request_error)?;
                parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(image));
            }
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(parts))
                .build()
                .map_err(request_error)?
                .into()
        }
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(request_error)?
            .into(),
    };
    Ok(converted)
}

/// 取首个 choice 的文本与函数调用；缺失的调用 id 补生成
fn completion_from_response(response: CreateChatCompletionResponse) -> Result<Completion, LlmError> {
    let usage = response.usage.map(|u| {
        let prompt_tokens = u64::from(u.prompt_tokens);
        let completion_tokens = u64::from(u.completion_tokens);
        let total_tokens = match u64::from(u.total_tokens) {
            0 => prompt_tokens + completion_tokens,
            total => total,
        };
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    });
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse)?;
    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|call| match call {
            ChatCompletionMessageToolCalls::Function(call) => {
                let id = if call.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    call.id
                };
                Some(ToolInvocation::new(id, call.function.name, call.function.arguments))
            }
            _ => {
                tracing::warn!("ignoring non-function tool call");
                None
            }
        })
        .collect();
    Ok(Completion {
        content: choice.message.content,
        tool_calls,
        usage,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Completion, LlmError> {
        let mut converted = Vec::with_capacity(messages.len());
        for message in messages {
            converted.push(to_openai_message(message).await?);
        }
        let request = self.build_request(converted, tools)?;

        let result: Result<CreateChatCompletionResponse, OpenAIError> = match self.thinking {
            Some(thinking) => {
                let body = Self::with_thinking(&request, thinking)?;
                self.client.chat().create_byot(body).await
            }
            None => self.client.chat().create(request).await,
        };
        let completion = completion_from_response(result.map_err(request_error)?)?;

        if let Some(usage) = &completion.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "llm call"
            );
        }
        Ok(completion)
    }
}
