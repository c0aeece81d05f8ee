//! 协作服务：待办与记账
//!
//! 以 trait 对外（TodoService / LedgerService），按不透明 user_id 隔离数据；
//! 提供内存实现（测试、演示）与 SQLite 实现（rusqlite）。
//! 时间统一为配置时区下的本地时间（NaiveDateTime，精确到秒）。

pub mod ledger;
pub mod memory;
pub mod sqlite;
pub mod todo;

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, Timelike, Utc};
use serde::Serializer;

pub use ledger::{LedgerService, PeriodSummary, Transaction, TransactionFilter, TransactionKind};
pub use memory::{InMemoryLedgerService, InMemoryTodoService};
pub use sqlite::SqliteStore;
pub use todo::{NewTodo, Todo, TodoPatch, TodoService, TodoStatus};

/// 记录与展示使用的时间格式
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 本地时钟：固定 UTC 偏移；测试可冻结时间
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    offset: FixedOffset,
    frozen: Option<NaiveDateTime>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::with_offset_hours(8)
    }
}

impl Clock {
    pub fn with_offset_hours(hours: i32) -> Self {
        let offset = FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix());
        Self {
            offset,
            frozen: None,
        }
    }

    /// 固定在某一时刻
    pub fn frozen(at: NaiveDateTime) -> Self {
        Self {
            offset: Utc.fix(),
            frozen: Some(at),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        let now = match self.frozen {
            Some(at) => at,
            None => Utc::now().with_timezone(&self.offset).naive_local(),
        };
        now.with_nanosecond(0).unwrap_or(now)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// 今天 00:00:00
    pub fn today_start(&self) -> NaiveDateTime {
        self.today().and_hms_opt(0, 0, 0).unwrap_or_else(|| self.now())
    }

    pub fn days_ago(&self, days: u32) -> NaiveDateTime {
        self.now() - Duration::days(i64::from(days))
    }
}

/// 按 `%Y-%m-%d %H:%M:%S`，后退到 `%Y-%m-%d` 解析日期
pub fn parse_due_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, TIME_FORMAT).ok().or_else(|| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

pub(crate) fn serialize_time<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.format(TIME_FORMAT).to_string())
}

pub(crate) fn serialize_opt_time<S: Serializer>(t: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
    match t {
        Some(t) => serialize_time(t, s),
        None => s.serialize_none(),
    }
}
