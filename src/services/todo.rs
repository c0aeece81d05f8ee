//! 待办服务

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::core::ServiceError;
use crate::services::{serialize_opt_time, serialize_time};

/// 待办状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoStatus {
    Pending,
    Completed,
    Cancelled,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "pending",
            TodoStatus::Completed => "completed",
            TodoStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TodoStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TodoStatus::Pending),
            "completed" => Ok(TodoStatus::Completed),
            "cancelled" => Ok(TodoStatus::Cancelled),
            other => Err(ServiceError::Storage(format!("unknown todo status: {other}"))),
        }
    }
}

/// 待办记录
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Todo {
    pub id: i64,
    pub user_id: String,
    pub content: String,
    pub status: TodoStatus,
    pub notes: Option<String>,
    #[serde(serialize_with = "serialize_opt_time")]
    pub due_date: Option<NaiveDateTime>,
    #[serde(serialize_with = "serialize_time")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_opt_time")]
    pub completed_at: Option<NaiveDateTime>,
    pub completion_reflection: Option<String>,
    #[serde(serialize_with = "serialize_time")]
    pub updated_at: NaiveDateTime,
}

/// 新建待办
#[derive(Clone, Debug, Default)]
pub struct NewTodo {
    pub content: String,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDateTime>,
}

impl NewTodo {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// 更新待办：None 表示不修改
#[derive(Clone, Debug, Default)]
pub struct TodoPatch {
    pub content: Option<String>,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDateTime>,
}

impl TodoPatch {
    pub(crate) fn apply(self, todo: &mut Todo, now: NaiveDateTime) {
        if let Some(content) = self.content {
            todo.content = content;
        }
        if self.notes.is_some() {
            todo.notes = self.notes;
        }
        if self.due_date.is_some() {
            todo.due_date = self.due_date;
        }
        todo.updated_at = now;
    }
}

/// 待办服务 trait
#[async_trait]
pub trait TodoService: Send + Sync {
    async fn create(&self, user_id: &str, new: NewTodo) -> Result<Todo, ServiceError>;

    /// 按状态筛选（None 为全部），最新的在前
    async fn list(&self, user_id: &str, status: Option<TodoStatus>) -> Result<Vec<Todo>, ServiceError>;

    async fn get(&self, user_id: &str, id: i64) -> Result<Todo, ServiceError>;

    async fn complete(&self, user_id: &str, id: i64, reflection: Option<String>) -> Result<Todo, ServiceError>;

    async fn update(&self, user_id: &str, id: i64, patch: TodoPatch) -> Result<Todo, ServiceError>;

    async fn delete(&self, user_id: &str, id: i64) -> Result<(), ServiceError>;

    /// 删除用户全部待办，返回条数
    async fn delete_all(&self, user_id: &str) -> Result<usize, ServiceError>;

    /// 在 [start, end) 内完成的待办，最近完成的在前
    async fn completed_between(
        &self,
        user_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Todo>, ServiceError>;

    /// 今日待办：未完成，且今天创建或截止时间不早于今天，按创建时间升序
    async fn due_from(&self, user_id: &str, day_start: NaiveDateTime) -> Result<Vec<Todo>, ServiceError>;

    /// 拥有待办记录的用户
    async fn user_ids(&self) -> Result<Vec<String>, ServiceError>;
}

pub(crate) fn is_due_from(todo: &Todo, day_start: NaiveDateTime) -> bool {
    todo.status == TodoStatus::Pending
        && (todo.created_at >= day_start || todo.due_date.map_or(false, |d| d >= day_start))
}
