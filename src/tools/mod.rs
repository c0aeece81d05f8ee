//! 工具层：注册表、调度器、模糊匹配、参数 schema，以及待办 / 记账 / 搜索工具

pub mod dispatcher;
pub mod ledger;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod search;
pub mod todo;

use std::sync::Arc;

pub use dispatcher::ToolDispatcher;
pub use ledger::{BalanceTool, DeleteTransactionTool, RecordTool, SummaryTool, TransactionsTool};
pub use registry::{Tool, ToolContext, ToolRegistry, ToolResult};
pub use resolver::{resolve, similarity, Candidate, Resolution};
pub use search::SearchWebTool;
pub use todo::{CompleteTodoTool, CreateTodoTool, DeleteTodoTool, ListTodosTool, UpdateTodoTool};

use crate::config::ToolsSection;
use crate::core::AgentError;
use crate::services::{LedgerService, TodoService};

/// 注册全部内置工具；注册顺序即声明给模型的顺序
pub fn build_default_registry(
    todos: Arc<dyn TodoService>,
    ledger: Arc<dyn LedgerService>,
    cfg: &ToolsSection,
) -> Result<ToolRegistry, AgentError> {
    let threshold = cfg.resolver_threshold;
    let mut registry = ToolRegistry::new();
    registry.register(CreateTodoTool::new(todos.clone()))?;
    registry.register(ListTodosTool::new(todos.clone()))?;
    registry.register(CompleteTodoTool::new(todos.clone(), threshold))?;
    registry.register(DeleteTodoTool::new(todos.clone(), threshold))?;
    registry.register(UpdateTodoTool::new(todos, threshold))?;
    registry.register(RecordTool::expense(ledger.clone()))?;
    registry.register(RecordTool::income(ledger.clone()))?;
    registry.register(RecordTool::adjustment(ledger.clone()))?;
    registry.register(BalanceTool::new(ledger.clone()))?;
    registry.register(TransactionsTool::new(ledger.clone()))?;
    registry.register(SummaryTool::new(ledger.clone()))?;
    registry.register(DeleteTransactionTool::new(ledger))?;
    registry.register(SearchWebTool::new(&cfg.search))?;
    tracing::debug!(tools = registry.len(), "tool registry built");
    Ok(registry)
}
