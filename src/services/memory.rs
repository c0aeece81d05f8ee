//! 内存实现：测试与离线演示使用，进程退出即丢失

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::RwLock;

use crate::core::ServiceError;
use crate::services::ledger::{LedgerService, Transaction, TransactionFilter, TransactionKind};
use crate::services::todo::{is_due_from, NewTodo, Todo, TodoPatch, TodoService, TodoStatus};
use crate::services::Clock;

/// 内存待办服务
pub struct InMemoryTodoService {
    todos: RwLock<Vec<Todo>>,
    next_id: AtomicI64,
    clock: Clock,
}

impl Default for InMemoryTodoService {
    fn default() -> Self {
        Self::new(Clock::default())
    }
}

impl InMemoryTodoService {
    pub fn new(clock: Clock) -> Self {
        Self {
            todos: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            clock,
        }
    }
}

/// 按 id 找到记录并校验归属
fn owned_mut<'a>(todos: &'a mut [Todo], user_id: &str, id: i64) -> Result<&'a mut Todo, ServiceError> {
    let todo = todos
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or(ServiceError::NotFound)?;
    if todo.user_id != user_id {
        return Err(ServiceError::NotAuthorized);
    }
    Ok(todo)
}

fn newest_first(todos: &mut [Todo]) {
    todos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl TodoService for InMemoryTodoService {
    async fn create(&self, user_id: &str, new: NewTodo) -> Result<Todo, ServiceError> {
        let now = self.clock.now();
        let todo = Todo {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: user_id.to_string(),
            content: new.content,
            status: TodoStatus::Pending,
            notes: new.notes,
            due_date: new.due_date,
            created_at: now,
            completed_at: None,
            completion_reflection: None,
            updated_at: now,
        };
        self.todos.write().await.push(todo.clone());
        Ok(todo)
    }

    async fn list(&self, user_id: &str, status: Option<TodoStatus>) -> Result<Vec<Todo>, ServiceError> {
        let mut list: Vec<Todo> = self
            .todos
            .read()
            .await
            .iter()
            .filter(|t| t.user_id == user_id && status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        newest_first(&mut list);
        Ok(list)
    }

    async fn get(&self, user_id: &str, id: i64) -> Result<Todo, ServiceError> {
        let mut todos = self.todos.write().await;
        owned_mut(&mut todos, user_id, id).map(|t| t.clone())
    }

    async fn complete(&self, user_id: &str, id: i64, reflection: Option<String>) -> Result<Todo, ServiceError> {
        let now = self.clock.now();
        let mut todos = self.todos.write().await;
        let todo = owned_mut(&mut todos, user_id, id)?;
        todo.status = TodoStatus::Completed;
        todo.completed_at = Some(now);
        if reflection.is_some() {
            todo.completion_reflection = reflection;
        }
        todo.updated_at = now;
        Ok(todo.clone())
    }

    async fn update(&self, user_id: &str, id: i64, patch: TodoPatch) -> Result<Todo, ServiceError> {
        let now = self.clock.now();
        let mut todos = self.todos.write().await;
        let todo = owned_mut(&mut todos, user_id, id)?;
        patch.apply(todo, now);
        Ok(todo.clone())
    }

    async fn delete(&self, user_id: &str, id: i64) -> Result<(), ServiceError> {
        let mut todos = self.todos.write().await;
        owned_mut(&mut todos, user_id, id)?;
        todos.retain(|t| t.id != id);
        Ok(())
    }

    async fn delete_all(&self, user_id: &str) -> Result<usize, ServiceError> {
        let mut todos = self.todos.write().await;
        let before = todos.len();
        todos.retain(|t| t.user_id != user_id);
        Ok(before - todos.len())
    }

    async fn completed_between(
        &self,
        user_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Todo>, ServiceError> {
        let mut list: Vec<Todo> = self
            .todos
            .read()
            .await
            .iter()
            .filter(|t| {
                t.user_id == user_id
                    && t.status == TodoStatus::Completed
                    && t.completed_at.map_or(false, |at| at >= start && at < end)
            })
            .cloned()
            .collect();
        list.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then(b.id.cmp(&a.id)));
        Ok(list)
    }

    async fn due_from(&self, user_id: &str, day_start: NaiveDateTime) -> Result<Vec<Todo>, ServiceError> {
        let mut list: Vec<Todo> = self
            .todos
            .read()
            .await
            .iter()
            .filter(|t| t.user_id == user_id && is_due_from(t, day_start))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn user_ids(&self) -> Result<Vec<String>, ServiceError> {
        let mut ids: Vec<String> = self.todos.read().await.iter().map(|t| t.user_id.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// 内存记账服务
pub struct InMemoryLedgerService {
    transactions: RwLock<Vec<Transaction>>,
    next_id: AtomicI64,
    clock: Clock,
}

impl Default for InMemoryLedgerService {
    fn default() -> Self {
        Self::new(Clock::default())
    }
}

impl InMemoryLedgerService {
    pub fn new(clock: Clock) -> Self {
        Self {
            transactions: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            clock,
        }
    }
}

#[async_trait]
impl LedgerService for InMemoryLedgerService {
    async fn record(
        &self,
        user_id: &str,
        kind: TransactionKind,
        amount: f64,
        notes: Option<String>,
    ) -> Result<Transaction, ServiceError> {
        let (amount, notes) = kind.normalize(amount, notes);
        let transaction = Transaction {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: user_id.to_string(),
            amount,
            kind,
            notes,
            created_at: self.clock.now(),
        };
        self.transactions.write().await.push(transaction.clone());
        Ok(transaction)
    }

    async fn list(&self, user_id: &str, filter: TransactionFilter) -> Result<Vec<Transaction>, ServiceError> {
        let since = filter.days.map(|d| self.clock.days_ago(d));
        let mut list: Vec<Transaction> = self
            .transactions
            .read()
            .await
            .iter()
            .filter(|t| {
                t.user_id == user_id
                    && filter.kind.map_or(true, |k| t.kind == k)
                    && since.map_or(true, |s| t.created_at >= s)
            })
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            list.truncate(limit);
        }
        Ok(list)
    }

    async fn balance(&self, user_id: &str) -> Result<f64, ServiceError> {
        Ok(self
            .transactions
            .read()
            .await
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.amount)
            .sum())
    }

    async fn get(&self, user_id: &str, id: i64) -> Result<Transaction, ServiceError> {
        let transactions = self.transactions.read().await;
        let t = transactions
            .iter()
            .find(|t| t.id == id)
            .ok_or(ServiceError::NotFound)?;
        if t.user_id != user_id {
            return Err(ServiceError::NotAuthorized);
        }
        Ok(t.clone())
    }

    async fn delete(&self, user_id: &str, id: i64) -> Result<(), ServiceError> {
        self.get(user_id, id).await?;
        self.transactions.write().await.retain(|t| t.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::parse_due_date;

    #[tokio::test]
    async fn test_todo_lifecycle_and_ownership() {
        let svc = InMemoryTodoService::default();
        let a = svc.create("u1", NewTodo::new("开会")).await.unwrap();
        let b = svc.create("u1", NewTodo::new("买菜")).await.unwrap();
        svc.create("u2", NewTodo::new("别人的")).await.unwrap();

        let list = svc.list("u1", None).await.unwrap();
        assert_eq!(list.iter().map(|t| t.id).collect::<Vec<_>>(), vec![b.id, a.id]);

        let done = svc.complete("u1", a.id, Some("顺利".into())).await.unwrap();
        assert_eq!(done.status, TodoStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(svc.list("u1", Some(TodoStatus::Pending)).await.unwrap().len(), 1);

        assert_eq!(svc.complete("u2", a.id, None).await, Err(ServiceError::NotAuthorized));
        assert_eq!(svc.get("u1", 999).await, Err(ServiceError::NotFound));

        let patch = TodoPatch {
            content: Some("去超市买菜".into()),
            ..Default::default()
        };
        assert_eq!(svc.update("u1", b.id, patch).await.unwrap().content, "去超市买菜");

        svc.delete("u1", b.id).await.unwrap();
        assert_eq!(svc.delete("u1", b.id).await, Err(ServiceError::NotFound));
        assert_eq!(svc.delete_all("u1").await.unwrap(), 1);
        assert_eq!(svc.user_ids().await.unwrap(), vec!["u2".to_string()]);
    }

    #[tokio::test]
    async fn test_daily_windows() {
        let now = parse_due_date("2024-03-02 08:00:00").unwrap();
        let svc = InMemoryTodoService::new(Clock::frozen(now));
        let old = NewTodo {
            content: "本周报告".into(),
            due_date: parse_due_date("2024-03-05"),
            ..Default::default()
        };
        let today = svc.create("u1", NewTodo::new("开会")).await.unwrap();
        let due = svc.create("u1", old).await.unwrap();
        let done = svc.create("u1", NewTodo::new("写周报")).await.unwrap();
        svc.complete("u1", done.id, None).await.unwrap();

        let day_start = parse_due_date("2024-03-02").unwrap();
        let ids: Vec<_> = svc
            .due_from("u1", day_start)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![today.id, due.id]);

        let completed = svc
            .completed_between("u1", day_start, parse_due_date("2024-03-03").unwrap())
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_balance_filters_and_delete() {
        let svc = InMemoryLedgerService::default();
        svc.record("u1", TransactionKind::Income, 1000.0, Some("工资".into())).await.unwrap();
        let lunch = svc.record("u1", TransactionKind::Expense, 35.0, Some("午饭".into())).await.unwrap();
        svc.record("u1", TransactionKind::Adjustment, -5.0, None).await.unwrap();
        svc.record("u2", TransactionKind::Income, 1.0, None).await.unwrap();

        assert_eq!(lunch.amount, -35.0);
        assert_eq!(svc.balance("u1").await.unwrap(), 960.0);

        let expenses = svc
            .list(
                "u1",
                TransactionFilter {
                    kind: Some(TransactionKind::Expense),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(expenses.len(), 1);

        let limited = svc
            .list(
                "u1",
                TransactionFilter {
                    limit: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].kind, TransactionKind::Adjustment);

        let summary = svc.summary("u1", 30).await.unwrap();
        assert_eq!(summary.total_expense, 35.0);
        assert_eq!(summary.transaction_count, 3);

        assert_eq!(svc.delete("u2", lunch.id).await, Err(ServiceError::NotAuthorized));
        svc.delete("u1", lunch.id).await.unwrap();
        assert_eq!(svc.balance("u1").await.unwrap(), 995.0);
    }
}
