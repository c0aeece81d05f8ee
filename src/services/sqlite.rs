//! SQLite 实现（rusqlite）：同一个库文件同时承载待办与记账两张表
//!
//! 连接放在 std Mutex 中，每次操作短暂持锁；时间以 `%Y-%m-%d %H:%M:%S` 文本存储，可直接按字符串比较。

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::core::ServiceError;
use crate::services::ledger::{LedgerService, Transaction, TransactionFilter, TransactionKind};
use crate::services::todo::{NewTodo, Todo, TodoPatch, TodoService, TodoStatus};
use crate::services::{Clock, TIME_FORMAT};

/// SQLite 存储
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Clock,
}

const TODO_COLUMNS: &str = "id, user_id, content, status, notes, due_date, created_at, completed_at, completion_reflection, updated_at";

impl SqliteStore {
    /// 打开（或创建）数据库文件
    pub fn open(path: impl AsRef<Path>, clock: Clock) -> Result<Self, ServiceError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn, clock)
    }

    pub fn open_in_memory(clock: Clock) -> Result<Self, ServiceError> {
        Self::with_connection(Connection::open_in_memory()?, clock)
    }

    fn with_connection(conn: Connection, clock: Clock) -> Result<Self, ServiceError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS todo_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                notes TEXT,
                due_date TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                completion_reflection TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_todo_user ON todo_items(user_id, status);

            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                amount REAL NOT NULL,
                type TEXT NOT NULL,
                notes TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tx_user ON transactions(user_id, created_at);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_text(&self) -> String {
        fmt_time(&self.clock.now())
    }

    /// 读取并校验归属
    fn owned_todo(&self, conn: &Connection, user_id: &str, id: i64) -> Result<Todo, ServiceError> {
        let sql = format!("SELECT {TODO_COLUMNS} FROM todo_items WHERE id = ?1");
        let todo = conn
            .query_row(&sql, params![id], todo_from_row)
            .optional()?
            .ok_or(ServiceError::NotFound)?;
        if todo.user_id != user_id {
            return Err(ServiceError::NotAuthorized);
        }
        Ok(todo)
    }

    fn query_todos(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Todo>, ServiceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, todo_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn fmt_time(t: &NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let text: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&text, TIME_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => time_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn todo_from_row(row: &Row<'_>) -> rusqlite::Result<Todo> {
    let status: String = row.get(3)?;
    Ok(Todo {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        status: status
            .parse::<TodoStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        notes: row.get(4)?,
        due_date: opt_time_at(row, 5)?,
        created_at: time_at(row, 6)?,
        completed_at: opt_time_at(row, 7)?,
        completion_reflection: row.get(8)?,
        updated_at: time_at(row, 9)?,
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let kind: String = row.get(3)?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        kind: kind
            .parse::<TransactionKind>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        notes: row.get(4)?,
        created_at: time_at(row, 5)?,
    })
}

#[async_trait]
impl TodoService for SqliteStore {
    async fn create(&self, user_id: &str, new: NewTodo) -> Result<Todo, ServiceError> {
        let now = self.now_text();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO todo_items (user_id, content, status, notes, due_date, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?5)",
            params![user_id, new.content, new.notes, new.due_date.as_ref().map(fmt_time), now],
        )?;
        let id = conn.last_insert_rowid();
        self.owned_todo(&conn, user_id, id)
    }

    async fn list(&self, user_id: &str, status: Option<TodoStatus>) -> Result<Vec<Todo>, ServiceError> {
        match status {
            Some(status) => self.query_todos(
                &format!(
                    "SELECT {TODO_COLUMNS} FROM todo_items WHERE user_id = ?1 AND status = ?2
                     ORDER BY created_at DESC, id DESC"
                ),
                &[&user_id, &status.as_str()],
            ),
            None => self.query_todos(
                &format!("SELECT {TODO_COLUMNS} FROM todo_items WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"),
                &[&user_id],
            ),
        }
    }

    async fn get(&self, user_id: &str, id: i64) -> Result<Todo, ServiceError> {
        let conn = self.conn();
        self.owned_todo(&conn, user_id, id)
    }

    async fn complete(&self, user_id: &str, id: i64, reflection: Option<String>) -> Result<Todo, ServiceError> {
        let now = self.now_text();
        let conn = self.conn();
        self.owned_todo(&conn, user_id, id)?;
        conn.execute(
            "UPDATE todo_items
             SET status = 'completed', completed_at = ?1, updated_at = ?1,
                 completion_reflection = COALESCE(?2, completion_reflection)
             WHERE id = ?3",
            params![now, reflection, id],
        )?;
        self.owned_todo(&conn, user_id, id)
    }

    async fn update(&self, user_id: &str, id: i64, patch: TodoPatch) -> Result<Todo, ServiceError> {
        let now = self.clock.now();
        let conn = self.conn();
        let mut todo = self.owned_todo(&conn, user_id, id)?;
        patch.apply(&mut todo, now);
        conn.execute(
            "UPDATE todo_items SET content = ?1, notes = ?2, due_date = ?3, updated_at = ?4 WHERE id = ?5",
            params![
                todo.content,
                todo.notes,
                todo.due_date.as_ref().map(fmt_time),
                fmt_time(&todo.updated_at),
                id
            ],
        )?;
        Ok(todo)
    }

    async fn delete(&self, user_id: &str, id: i64) -> Result<(), ServiceError> {
        let conn = self.conn();
        self.owned_todo(&conn, user_id, id)?;
        conn.execute("DELETE FROM todo_items WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn delete_all(&self, user_id: &str) -> Result<usize, ServiceError> {
        let conn = self.conn();
        Ok(conn.execute("DELETE FROM todo_items WHERE user_id = ?1", params![user_id])?)
    }

    async fn completed_between(
        &self,
        user_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Todo>, ServiceError> {
        self.query_todos(
            &format!(
                "SELECT {TODO_COLUMNS} FROM todo_items
                 WHERE user_id = ?1 AND status = 'completed' AND completed_at >= ?2 AND completed_at < ?3
                 ORDER BY completed_at DESC, id DESC"
            ),
            &[&user_id, &fmt_time(&start), &fmt_time(&end)],
        )
    }

    async fn due_from(&self, user_id: &str, day_start: NaiveDateTime) -> Result<Vec<Todo>, ServiceError> {
        self.query_todos(
            &format!(
                "SELECT {TODO_COLUMNS} FROM todo_items
                 WHERE user_id = ?1 AND status = 'pending' AND (created_at >= ?2 OR due_date >= ?2)
                 ORDER BY created_at ASC, id ASC"
            ),
            &[&user_id, &fmt_time(&day_start)],
        )
    }

    async fn user_ids(&self) -> Result<Vec<String>, ServiceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM todo_items ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl LedgerService for SqliteStore {
    async fn record(
        &self,
        user_id: &str,
        kind: TransactionKind,
        amount: f64,
        notes: Option<String>,
    ) -> Result<Transaction, ServiceError> {
        let (amount, notes) = kind.normalize(amount, notes);
        let now = self.now_text();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO transactions (user_id, amount, type, notes, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, amount, kind.as_str(), notes, now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            "SELECT id, user_id, amount, type, notes, created_at FROM transactions WHERE id = ?1",
            params![id],
            transaction_from_row,
        )?)
    }

    async fn list(&self, user_id: &str, filter: TransactionFilter) -> Result<Vec<Transaction>, ServiceError> {
        let since = filter.days.map(|d| fmt_time(&self.clock.days_ago(d)));
        let kind = filter.kind.map(|k| k.as_str());
        let limit = sql_limit(filter.limit);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, amount, type, notes, created_at FROM transactions
             WHERE user_id = ?1 AND (?2 IS NULL OR type = ?2) AND (?3 IS NULL OR created_at >= ?3)
             ORDER BY created_at DESC, id DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(params![user_id, kind, since, limit], transaction_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn balance(&self, user_id: &str) -> Result<f64, ServiceError> {
        let conn = self.conn();
        let sum: Option<f64> = conn.query_row(
            "SELECT SUM(amount) FROM transactions WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(sum.unwrap_or(0.0))
    }

    async fn get(&self, user_id: &str, id: i64) -> Result<Transaction, ServiceError> {
        let conn = self.conn();
        let t = conn
            .query_row(
                "SELECT id, user_id, amount, type, notes, created_at FROM transactions WHERE id = ?1",
                params![id],
                transaction_from_row,
            )
            .optional()?
            .ok_or(ServiceError::NotFound)?;
        if t.user_id != user_id {
            return Err(ServiceError::NotAuthorized);
        }
        Ok(t)
    }

    async fn delete(&self, user_id: &str, id: i64) -> Result<(), ServiceError> {
        LedgerService::get(self, user_id, id).await?;
        self.conn()
            .execute("DELETE FROM transactions WHERE id = ?1", params![id])?;
        Ok(())
    }
}

/// LIMIT 参数：None 为 -1（SQLite 视负数为不限），过大的值饱和到 i64::MAX
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::parse_due_date;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(Clock::frozen(parse_due_date("2024-03-02 08:30:00").unwrap())).unwrap()
    }

    #[test]
    fn test_sql_limit_never_wraps_negative() {
        assert_eq!(sql_limit(None), -1);
        assert_eq!(sql_limit(Some(5)), 5);
        assert_eq!(sql_limit(Some(usize::MAX)), i64::MAX);
    }

    #[tokio::test]
    async fn test_todos_persist_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zaiban.db");
        let id = {
            let db = SqliteStore::open(&path, Clock::default()).unwrap();
            let new = NewTodo {
                content: "开会".into(),
                notes: Some("带电脑".into()),
                due_date: parse_due_date("2024-03-05 15:00:00"),
            };
            db.create("u1", new).await.unwrap().id
        };
        let db = SqliteStore::open(&path, Clock::default()).unwrap();
        let todo = TodoService::get(&db, "u1", id).await.unwrap();
        assert_eq!(todo.content, "开会");
        assert_eq!(todo.notes.as_deref(), Some("带电脑"));
        assert_eq!(todo.due_date, parse_due_date("2024-03-05 15:00:00"));
        assert_eq!(todo.status, TodoStatus::Pending);
    }

    #[tokio::test]
    async fn test_todo_ownership_and_updates() {
        let db = store();
        let a = db.create("u1", NewTodo::new("开会")).await.unwrap();
        let b = db.create("u1", NewTodo::new("买菜")).await.unwrap();

        let ids: Vec<_> = TodoService::list(&db, "u1", None).await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);

        assert_eq!(TodoService::get(&db, "u2", a.id).await, Err(ServiceError::NotAuthorized));
        assert_eq!(TodoService::delete(&db, "u1", 42).await, Err(ServiceError::NotFound));

        let done = db.complete("u1", a.id, Some("顺利".into())).await.unwrap();
        assert_eq!(done.status, TodoStatus::Completed);
        assert_eq!(done.completion_reflection.as_deref(), Some("顺利"));
        assert_eq!(TodoService::list(&db, "u1", Some(TodoStatus::Completed)).await.unwrap().len(), 1);

        let patch = TodoPatch {
            notes: Some("记得带袋子".into()),
            ..Default::default()
        };
        let updated = db.update("u1", b.id, patch).await.unwrap();
        assert_eq!(updated.content, "买菜");
        assert_eq!(updated.notes.as_deref(), Some("记得带袋子"));

        let start = parse_due_date("2024-03-02").unwrap();
        let end = parse_due_date("2024-03-03").unwrap();
        assert_eq!(db.completed_between("u1", start, end).await.unwrap().len(), 1);
        assert_eq!(db.due_from("u1", start).await.unwrap().len(), 1);
        assert_eq!(db.user_ids().await.unwrap(), vec!["u1".to_string()]);
        assert_eq!(db.delete_all("u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ledger_queries() {
        let db = store();
        db.record("u1", TransactionKind::Income, 1000.0, None).await.unwrap();
        let lunch = db.record("u1", TransactionKind::Expense, 35.5, Some("午饭".into())).await.unwrap();
        let fix = db.record("u1", TransactionKind::Adjustment, 10.0, None).await.unwrap();
        assert_eq!(lunch.amount, -35.5);
        assert_eq!(fix.notes.as_deref(), Some("资金矫正"));

        assert_eq!(db.balance("u1").await.unwrap(), 974.5);
        assert_eq!(db.balance("nobody").await.unwrap(), 0.0);

        let all = LedgerService::list(&db, "u1", TransactionFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, fix.id);

        let filter = TransactionFilter {
            kind: Some(TransactionKind::Expense),
            limit: Some(5),
            days: Some(7),
        };
        assert_eq!(LedgerService::list(&db, "u1", filter).await.unwrap().len(), 1);

        let summary = db.summary("u1", 30).await.unwrap();
        assert_eq!(summary.net_income, 964.5);

        assert_eq!(LedgerService::delete(&db, "u2", lunch.id).await, Err(ServiceError::NotAuthorized));
        LedgerService::delete(&db, "u1", lunch.id).await.unwrap();
        assert_eq!(db.balance("u1").await.unwrap(), 1010.0);
    }
}
