//! 待办工具：create_todo / get_todo_list / complete_todo / delete_todo / update_todo
//!
//! 完成、删除、更新既可用 todo_id 精确指定，也可用 query（如「开会那个」）经模糊匹配定位；
//! 匹配不到时返回失败并列出候选，让模型向用户确认，不做猜测。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::{ServiceError, ToolError};
use crate::services::{parse_due_date, NewTodo, Todo, TodoPatch, TodoService, TodoStatus};
use crate::tools::resolver::{resolve, Candidate, Resolution};
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolContext, ToolResult};

const NOT_FOUND: &str = "待办事项不存在或无权操作";

fn todo_error(e: ServiceError) -> ToolError {
    match e {
        ServiceError::NotFound | ServiceError::NotAuthorized => ToolError::NotFound(NOT_FOUND.to_string()),
        other => other.into(),
    }
}

/// 截止时间：无法解析时忽略
fn due(s: Option<&str>) -> Option<chrono::NaiveDateTime> {
    s.filter(|s| !s.trim().is_empty()).and_then(parse_due_date)
}

/// 待办定位参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
struct Target {
    /// 待办事项的ID
    #[serde(default)]
    todo_id: Option<i64>,
    /// 没有ID时，用户对该待办的描述（如「开会」），用于模糊匹配
    #[serde(default)]
    query: Option<String>,
}

/// 共用的定位逻辑
struct Locator {
    todos: Arc<dyn TodoService>,
    threshold: f64,
}

impl Locator {
    async fn locate(
        &self,
        ctx: &ToolContext,
        target: &Target,
        scope: Option<TodoStatus>,
    ) -> Result<i64, ToolError> {
        if let Some(id) = target.todo_id {
            return Ok(id);
        }
        let query = target
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("todo_id 或 query 至少提供一个".to_string()))?;

        let todos = self.todos.list(&ctx.user_id, scope).await.map_err(todo_error)?;
        let candidates: Vec<Candidate> = todos.iter().map(|t| Candidate::new(t.id, t.content.clone())).collect();
        match resolve(&candidates, query, self.threshold) {
            Resolution::Match { id, score } => {
                tracing::debug!(query = %query, id, score, "todo resolved");
                Ok(id)
            }
            Resolution::NoMatch => Err(ToolError::NotFound(no_match_message(query, &todos))),
        }
    }
}

fn no_match_message(query: &str, todos: &[Todo]) -> String {
    if todos.is_empty() {
        return format!("没有找到与「{query}」相关的待办事项，当前没有可操作的待办");
    }
    let listed: Vec<String> = todos
        .iter()
        .take(10)
        .map(|t| format!("{}. {}", t.id, t.content))
        .collect();
    format!(
        "没有找到与「{query}」足够接近的待办事项，请让用户确认是哪一项：\n{}",
        listed.join("\n")
    )
}

// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateArgs {
    /// 待办事项的具体内容
    content: String,
    /// 备注信息，可选
    #[serde(default)]
    notes: Option<String>,
    /// 截止日期，格式：YYYY-MM-DD HH:MM:SS，可选
    #[serde(default)]
    due_date: Option<String>,
}

/// 创建待办
pub struct CreateTodoTool {
    todos: Arc<dyn TodoService>,
}

impl CreateTodoTool {
    pub fn new(todos: Arc<dyn TodoService>) -> Self {
        Self { todos }
    }
}

#[async_trait]
impl Tool for CreateTodoTool {
    fn name(&self) -> &str {
        "create_todo"
    }

    fn category(&self) -> &str {
        "待办创建"
    }

    fn description(&self) -> &str {
        "创建一个新的待办事项。当用户表达要做某事、记录某个任务时调用此函数。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<CreateArgs>()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: CreateArgs = parse_args(args)?;
        let content = args.content.trim().to_string();
        if content.is_empty() {
            return Err(ToolError::InvalidArguments("content 不能为空".to_string()));
        }
        let new = NewTodo {
            content: content.clone(),
            notes: args.notes,
            due_date: due(args.due_date.as_deref()),
        };
        let todo = self.todos.create(&ctx.user_id, new).await?;
        Ok(ToolResult::ok(format!("已创建待办事项：{content}")).with("todo", &todo))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum StatusFilter {
    #[default]
    Pending,
    Completed,
    All,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct ListArgs {
    /// 状态筛选：pending(待办)、completed(已完成)、all(全部)，默认为pending
    #[serde(default)]
    status: StatusFilter,
}

/// 查询待办列表
pub struct ListTodosTool {
    todos: Arc<dyn TodoService>,
}

impl ListTodosTool {
    pub fn new(todos: Arc<dyn TodoService>) -> Self {
        Self { todos }
    }
}

#[async_trait]
impl Tool for ListTodosTool {
    fn name(&self) -> &str {
        "get_todo_list"
    }

    fn category(&self) -> &str {
        "待办查询"
    }

    fn description(&self) -> &str {
        "查询用户的待办事项列表。可以按状态筛选。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ListArgs>()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: ListArgs = parse_args(args)?;
        let status = match args.status {
            StatusFilter::Pending => Some(TodoStatus::Pending),
            StatusFilter::Completed => Some(TodoStatus::Completed),
            StatusFilter::All => None,
        };
        let todos = self.todos.list(&ctx.user_id, status).await?;
        Ok(ToolResult::ok(format!("共 {} 个待办事项", todos.len()))
            .with("count", todos.len())
            .with("todos", &todos))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct CompleteArgs {
    #[serde(flatten)]
    target: Target,
    /// 完成感想，用户对完成这个任务的感受或总结，可选
    #[serde(default)]
    completion_reflection: Option<String>,
}

/// 完成待办
pub struct CompleteTodoTool {
    locator: Locator,
}

impl CompleteTodoTool {
    pub fn new(todos: Arc<dyn TodoService>, threshold: f64) -> Self {
        Self {
            locator: Locator { todos, threshold },
        }
    }
}

#[async_trait]
impl Tool for CompleteTodoTool {
    fn name(&self) -> &str {
        "complete_todo"
    }

    fn category(&self) -> &str {
        "待办完成"
    }

    fn description(&self) -> &str {
        "标记一个待办事项为已完成。当用户说完成了某个任务时调用。提供 todo_id，或用 query 描述该任务。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<CompleteArgs>()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: CompleteArgs = parse_args(args)?;
        let id = self
            .locator
            .locate(ctx, &args.target, Some(TodoStatus::Pending))
            .await?;
        let todo = self
            .locator
            .todos
            .complete(&ctx.user_id, id, args.completion_reflection)
            .await
            .map_err(todo_error)?;
        Ok(ToolResult::ok(format!("已完成：{}", todo.content)).with("todo", &todo))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteArgs {
    #[serde(flatten)]
    target: Target,
}

/// 删除待办
pub struct DeleteTodoTool {
    locator: Locator,
}

impl DeleteTodoTool {
    pub fn new(todos: Arc<dyn TodoService>, threshold: f64) -> Self {
        Self {
            locator: Locator { todos, threshold },
        }
    }
}

#[async_trait]
impl Tool for DeleteTodoTool {
    fn name(&self) -> &str {
        "delete_todo"
    }

    fn category(&self) -> &str {
        "待办删除"
    }

    fn description(&self) -> &str {
        "删除一个待办事项。当用户明确表示要删除某个任务时调用。提供 todo_id，或用 query 描述该任务。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<DeleteArgs>()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: DeleteArgs = parse_args(args)?;
        let id = self.locator.locate(ctx, &args.target, None).await?;
        self.locator
            .todos
            .delete(&ctx.user_id, id)
            .await
            .map_err(todo_error)?;
        Ok(ToolResult::ok("已删除待办事项").with("todo_id", id))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateArgs {
    #[serde(flatten)]
    target: Target,
    /// 新的待办内容，可选
    #[serde(default)]
    content: Option<String>,
    /// 新的备注信息，可选
    #[serde(default)]
    notes: Option<String>,
    /// 新的截止日期，格式：YYYY-MM-DD HH:MM:SS，可选
    #[serde(default)]
    due_date: Option<String>,
}

/// 更新待办
pub struct UpdateTodoTool {
    locator: Locator,
}

impl UpdateTodoTool {
    pub fn new(todos: Arc<dyn TodoService>, threshold: f64) -> Self {
        Self {
            locator: Locator { todos, threshold },
        }
    }
}

#[async_trait]
impl Tool for UpdateTodoTool {
    fn name(&self) -> &str {
        "update_todo"
    }

    fn category(&self) -> &str {
        "待办更新"
    }

    fn description(&self) -> &str {
        "更新待办事项的内容、备注或截止日期。提供 todo_id，或用 query 描述该任务。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<UpdateArgs>()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: UpdateArgs = parse_args(args)?;
        let id = self.locator.locate(ctx, &args.target, None).await?;
        let patch = TodoPatch {
            content: args.content.filter(|c| !c.trim().is_empty()),
            notes: args.notes,
            due_date: due(args.due_date.as_deref()),
        };
        let todo = self
            .locator
            .todos
            .update(&ctx.user_id, id, patch)
            .await
            .map_err(todo_error)?;
        Ok(ToolResult::ok("已更新待办事项").with("todo", &todo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryTodoService;
    use crate::tools::resolver::DEFAULT_THRESHOLD;
    use serde_json::json;

    fn service() -> Arc<dyn TodoService> {
        Arc::new(InMemoryTodoService::default())
    }

    fn ctx() -> ToolContext {
        ToolContext::new("u1")
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let todos = service();
        let create = CreateTodoTool::new(todos.clone());
        let result = create
            .execute(&ctx(), json!({"content": "明天开会", "due_date": "2024-03-05"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.message, "已创建待办事项：明天开会");
        assert_eq!(result.extra["todo"]["due_date"], "2024-03-05 00:00:00");
        assert_eq!(result.extra["todo"]["status"], "pending");

        let list = ListTodosTool::new(todos).execute(&ctx(), json!({})).await.unwrap();
        assert_eq!(list.extra["count"], 1);
        assert_eq!(list.extra["todos"][0]["content"], "明天开会");
    }

    #[tokio::test]
    async fn test_create_requires_content() {
        let err = CreateTodoTool::new(service()).execute(&ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_complete_by_query() {
        let todos = service();
        todos.create("u1", NewTodo::new("开会")).await.unwrap();
        todos.create("u1", NewTodo::new("买菜")).await.unwrap();

        let tool = CompleteTodoTool::new(todos.clone(), DEFAULT_THRESHOLD);
        let result = tool.execute(&ctx(), json!({"query": "开会"})).await.unwrap();
        assert_eq!(result.message, "已完成：开会");

        let pending = todos.list("u1", Some(TodoStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content, "买菜");
    }

    #[tokio::test]
    async fn test_unmatched_query_asks_for_clarification() {
        let todos = service();
        todos.create("u1", NewTodo::new("开会")).await.unwrap();
        let tool = DeleteTodoTool::new(todos.clone(), DEFAULT_THRESHOLD);
        let err = tool.execute(&ctx(), json!({"query": "xyz"})).await.unwrap_err();
        match err {
            ToolError::NotFound(msg) => assert!(msg.contains("开会")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(todos.list("u1", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_todo_is_not_touched() {
        let todos = service();
        let theirs = todos.create("u2", NewTodo::new("别人的待办")).await.unwrap();
        let tool = UpdateTodoTool::new(todos.clone(), DEFAULT_THRESHOLD);
        let err = tool
            .execute(&ctx(), json!({"todo_id": theirs.id, "content": "改掉"}))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::NotFound(NOT_FOUND.to_string()));
        assert_eq!(todos.get("u2", theirs.id).await.unwrap().content, "别人的待办");
    }

    #[tokio::test]
    async fn test_update_and_delete_by_id() {
        let todos = service();
        let todo = todos.create("u1", NewTodo::new("写报告")).await.unwrap();
        let updated = UpdateTodoTool::new(todos.clone(), DEFAULT_THRESHOLD)
            .execute(&ctx(), json!({"todo_id": todo.id, "notes": "周五前"}))
            .await
            .unwrap();
        assert_eq!(updated.message, "已更新待办事项");
        assert_eq!(updated.extra["todo"]["notes"], "周五前");

        let deleted = DeleteTodoTool::new(todos.clone(), DEFAULT_THRESHOLD)
            .execute(&ctx(), json!({"todo_id": todo.id}))
            .await
            .unwrap();
        assert_eq!(deleted.message, "已删除待办事项");
        assert!(todos.list("u1", None).await.unwrap().is_empty());
    }

    #[test]
    fn test_target_schema_exposes_id_and_query() {
        let schema = parameters_for::<CompleteArgs>();
        assert!(schema["properties"].get("todo_id").is_some());
        assert!(schema["properties"].get("query").is_some());
        assert!(schema["properties"].get("completion_reflection").is_some());
    }
}
