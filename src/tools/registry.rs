//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / category / description / parameters_schema / execute），
//! 启动时一次性注册；名称重复直接拒绝，保证 名称 ↔ 处理器 ↔ schema 一一对应。
//! 注册顺序即声明给模型的顺序。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{AgentError, ToolError};
use crate::llm::{ModelProfile, ToolSchema};

/// 工具执行上下文：当前用户
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub user_id: String,
}

impl ToolContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// 工具结果：`{success, message, ...extra}`，既回灌给模型，也用于日志
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            extra: Map::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            extra: Map::new(),
        }
    }

    /// 附加字段（如 todo、todos、count）
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 工具 trait
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型 function name）
    fn name(&self) -> &str;

    /// 展示给用户的类别名，用于回复末尾的「已调用」汇总
    fn category(&self) -> &str {
        self.name()
    }

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 是否仅在模型具备联网搜索能力时声明
    fn requires_search(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError>;
}

/// 工具注册表：保持注册顺序，按名称查找
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// 工具名对应的类别名；未注册时原样返回
    pub fn category_of(&self, name: &str) -> String {
        self.get(name)
            .map(|t| t.category().to_string())
            .unwrap_or_else(|| name.to_string())
    }

    /// 声明给当前模型的工具 schema（按能力过滤）
    pub fn schemas_for(&self, profile: &ModelProfile) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .filter(|t| profile.search || !t.requires_search())
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
