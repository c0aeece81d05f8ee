//! 记账服务
//!
//! 金额符号：支出为负、收入为正、矫正可正可负；余额为全部记录之和。

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::core::ServiceError;
use crate::services::serialize_time;

/// 记账类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Expense,
    Income,
    Adjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Expense => "expense",
            TransactionKind::Income => "income",
            TransactionKind::Adjustment => "adjustment",
        }
    }

    /// 按类型规范化金额与备注
    pub fn normalize(&self, amount: f64, notes: Option<String>) -> (f64, Option<String>) {
        match self {
            TransactionKind::Expense => (-amount.abs(), notes),
            TransactionKind::Income => (amount.abs(), notes),
            TransactionKind::Adjustment => (amount, notes.or_else(|| Some("资金矫正".to_string()))),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expense" => Ok(TransactionKind::Expense),
            "income" => Ok(TransactionKind::Income),
            "adjustment" => Ok(TransactionKind::Adjustment),
            other => Err(ServiceError::Storage(format!("unknown transaction type: {other}"))),
        }
    }
}

/// 记账记录
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub notes: Option<String>,
    #[serde(serialize_with = "serialize_time")]
    pub created_at: NaiveDateTime,
}

/// 查询条件
#[derive(Clone, Debug, Default)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub limit: Option<usize>,
    /// 最近 N 天
    pub days: Option<u32>,
}

/// 期间收支汇总
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub period_days: u32,
    pub total_income: f64,
    /// 支出总额（正数）
    pub total_expense: f64,
    pub net_income: f64,
    pub total_adjustment: f64,
    pub transaction_count: usize,
}

impl PeriodSummary {
    pub fn from_transactions(period_days: u32, transactions: &[Transaction]) -> Self {
        let sum_of = |kind: TransactionKind| -> f64 {
            transactions
                .iter()
                .filter(|t| t.kind == kind)
                .map(|t| t.amount)
                .sum()
        };
        let total_income = sum_of(TransactionKind::Income);
        let total_expense = transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Expense)
            .map(|t| t.amount.abs())
            .sum::<f64>();
        Self {
            period_days,
            total_income,
            total_expense,
            net_income: total_income - total_expense,
            total_adjustment: sum_of(TransactionKind::Adjustment),
            transaction_count: transactions.len(),
        }
    }
}

/// 记账服务 trait
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// 新增一条记录；金额按类型规范化
    async fn record(
        &self,
        user_id: &str,
        kind: TransactionKind,
        amount: f64,
        notes: Option<String>,
    ) -> Result<Transaction, ServiceError>;

    /// 最新的在前
    async fn list(&self, user_id: &str, filter: TransactionFilter) -> Result<Vec<Transaction>, ServiceError>;

    async fn balance(&self, user_id: &str) -> Result<f64, ServiceError>;

    async fn summary(&self, user_id: &str, days: u32) -> Result<PeriodSummary, ServiceError> {
        let filter = TransactionFilter {
            days: Some(days),
            ..Default::default()
        };
        let transactions = self.list(user_id, filter).await?;
        Ok(PeriodSummary::from_transactions(days, &transactions))
    }

    async fn get(&self, user_id: &str, id: i64) -> Result<Transaction, ServiceError>;

    async fn delete(&self, user_id: &str, id: i64) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_signs() {
        assert_eq!(TransactionKind::Expense.normalize(35.0, None).0, -35.0);
        assert_eq!(TransactionKind::Expense.normalize(-35.0, None).0, -35.0);
        assert_eq!(TransactionKind::Income.normalize(-100.0, None).0, 100.0);
        let (amount, notes) = TransactionKind::Adjustment.normalize(-12.5, None);
        assert_eq!(amount, -12.5);
        assert_eq!(notes.as_deref(), Some("资金矫正"));
    }

    #[test]
    fn test_summary_from_transactions() {
        let at = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap();
        let t = |id, amount, kind| Transaction {
            id,
            user_id: "u".into(),
            amount,
            kind,
            notes: None,
            created_at: at,
        };
        let list = vec![
            t(1, 1000.0, TransactionKind::Income),
            t(2, -30.0, TransactionKind::Expense),
            t(3, -20.0, TransactionKind::Expense),
            t(4, 5.0, TransactionKind::Adjustment),
        ];
        let summary = PeriodSummary::from_transactions(30, &list);
        assert_eq!(summary.total_income, 1000.0);
        assert_eq!(summary.total_expense, 50.0);
        assert_eq!(summary.net_income, 950.0);
        assert_eq!(summary.total_adjustment, 5.0);
        assert_eq!(summary.transaction_count, 4);
    }
}
