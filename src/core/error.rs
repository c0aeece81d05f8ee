//! 错误类型
//!
//! 库内部一律返回类型化错误；只有在 Assistant 边界（agent.rs）才转换成给用户看的文字。

use thiserror::Error;

/// 调用模型后端时的错误（网络、HTTP 状态、响应解析）
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("empty response")]
    EmptyResponse,
}

/// 编排层错误：模型后端失败、能力不匹配、模型切换失败、注册冲突、配置错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("upstream model error: {0}")]
    UpstreamModel(#[from] LlmError),

    /// 有附件但当前模型不支持视觉
    #[error("model {0} does not accept attachments")]
    CapabilityMismatch(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("duplicate model profile: {0}")]
    DuplicateModel(String),

    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("storage: {0}")]
    Storage(#[from] ServiceError),
}

/// 工具执行错误，由 Dispatcher 统一转成 `{success:false, message}`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// 参数缺失或格式错误，回灌给模型让其修正
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NotAuthorized(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("tool timeout: {0}")]
    Timeout(String),
}

/// 协作服务（待办、记账存储）错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("record not found")]
    NotFound,

    #[error("not authorized")]
    NotAuthorized,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for ServiceError {
    fn from(e: rusqlite::Error) -> Self {
        ServiceError::Storage(e.to_string())
    }
}

impl From<ServiceError> for ToolError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound => ToolError::NotFound("记录不存在".to_string()),
            ServiceError::NotAuthorized => ToolError::NotAuthorized("无权操作该记录".to_string()),
            ServiceError::Storage(msg) => ToolError::Execution(msg),
        }
    }
}
