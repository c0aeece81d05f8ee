//! 记账工具：record_expense / record_income / adjust_balance / get_balance /
//! get_transactions / get_financial_summary / delete_transaction

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::{ServiceError, ToolError};
use crate::services::{LedgerService, TransactionFilter, TransactionKind};
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolContext, ToolResult};

#[derive(Debug, Deserialize, JsonSchema)]
struct AmountArgs {
    /// 金额（元）
    amount: f64,
    /// 备注说明，如「午饭」「工资」，可选
    #[serde(default)]
    notes: Option<String>,
}

/// 记一笔：支出、收入、矫正共用，按 kind 区分
pub struct RecordTool {
    ledger: Arc<dyn LedgerService>,
    kind: TransactionKind,
}

impl RecordTool {
    pub fn expense(ledger: Arc<dyn LedgerService>) -> Self {
        Self {
            ledger,
            kind: TransactionKind::Expense,
        }
    }

    pub fn income(ledger: Arc<dyn LedgerService>) -> Self {
        Self {
            ledger,
            kind: TransactionKind::Income,
        }
    }

    pub fn adjustment(ledger: Arc<dyn LedgerService>) -> Self {
        Self {
            ledger,
            kind: TransactionKind::Adjustment,
        }
    }
}

#[async_trait]
impl Tool for RecordTool {
    fn name(&self) -> &str {
        match self.kind {
            TransactionKind::Expense => "record_expense",
            TransactionKind::Income => "record_income",
            TransactionKind::Adjustment => "adjust_balance",
        }
    }

    fn category(&self) -> &str {
        match self.kind {
            TransactionKind::Expense => "记录支出",
            TransactionKind::Income => "记录收入",
            TransactionKind::Adjustment => "资金矫正",
        }
    }

    fn description(&self) -> &str {
        match self.kind {
            TransactionKind::Expense => "记录一笔支出。当用户说花了多少钱、买了什么东西时调用，金额填正数。",
            TransactionKind::Income => "记录一笔收入。当用户说收到工资、红包、报销等进账时调用，金额填正数。",
            TransactionKind::Adjustment => {
                "资金矫正，用于修正账户余额与实际不符的情况。金额可正可负：正数增加余额，负数减少余额。"
            }
        }
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<AmountArgs>()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: AmountArgs = parse_args(args)?;
        if !args.amount.is_finite() || args.amount == 0.0 {
            return Err(ToolError::InvalidArguments("amount 必须是非零数字".to_string()));
        }
        let t = self
            .ledger
            .record(&ctx.user_id, self.kind, args.amount, args.notes)
            .await?;
        let balance = self.ledger.balance(&ctx.user_id).await?;
        let message = match self.kind {
            TransactionKind::Expense => format!("已记录支出：{:.2}元", t.amount.abs()),
            TransactionKind::Income => format!("已记录收入：{:.2}元", t.amount),
            TransactionKind::Adjustment => format!("已矫正资金：{:+.2}元", t.amount),
        };
        Ok(ToolResult::ok(message)
            .with("transaction", &t)
            .with("balance", round2(balance)))
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------

/// 查询余额
pub struct BalanceTool {
    ledger: Arc<dyn LedgerService>,
}

impl BalanceTool {
    pub fn new(ledger: Arc<dyn LedgerService>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Tool for BalanceTool {
    fn name(&self) -> &str {
        "get_balance"
    }

    fn category(&self) -> &str {
        "查询余额"
    }

    fn description(&self) -> &str {
        "查询用户当前余额（所有收支记录的总和）。"
    }

    async fn execute(&self, ctx: &ToolContext, _args: Value) -> Result<ToolResult, ToolError> {
        let balance = round2(self.ledger.balance(&ctx.user_id).await?);
        Ok(ToolResult::ok(format!("当前余额：{balance:.2}元")).with("balance", balance))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum KindArg {
    Expense,
    Income,
    Adjustment,
}

impl From<KindArg> for TransactionKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Expense => TransactionKind::Expense,
            KindArg::Income => TransactionKind::Income,
            KindArg::Adjustment => TransactionKind::Adjustment,
        }
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct ListArgs {
    /// 类型筛选：expense(支出)、income(收入)、adjustment(矫正)，不填为全部
    #[serde(default, rename = "type")]
    kind: Option<KindArg>,
    /// 返回条数上限，默认10
    #[serde(default)]
    limit: Option<usize>,
    /// 只看最近N天，可选
    #[serde(default)]
    days: Option<u32>,
}

/// 查询记账明细
pub struct TransactionsTool {
    ledger: Arc<dyn LedgerService>,
}

impl TransactionsTool {
    pub fn new(ledger: Arc<dyn LedgerService>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Tool for TransactionsTool {
    fn name(&self) -> &str {
        "get_transactions"
    }

    fn category(&self) -> &str {
        "查询记账"
    }

    fn description(&self) -> &str {
        "查询记账明细，可按类型、条数、最近天数筛选，最新的在前。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ListArgs>()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: ListArgs = parse_args(args)?;
        let filter = TransactionFilter {
            kind: args.kind.map(Into::into),
            limit: Some(args.limit.unwrap_or(10)),
            days: args.days,
        };
        let list = self.ledger.list(&ctx.user_id, filter).await?;
        Ok(ToolResult::ok(format!("共 {} 条记录", list.len()))
            .with("count", list.len())
            .with("transactions", &list))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct SummaryArgs {
    /// 统计最近N天，默认30天
    #[serde(default)]
    days: Option<u32>,
}

/// 收支汇总
pub struct SummaryTool {
    ledger: Arc<dyn LedgerService>,
}

impl SummaryTool {
    pub fn new(ledger: Arc<dyn LedgerService>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Tool for SummaryTool {
    fn name(&self) -> &str {
        "get_financial_summary"
    }

    fn category(&self) -> &str {
        "收支汇总"
    }

    fn description(&self) -> &str {
        "获取最近一段时间的收支汇总：总收入、总支出、净收益、矫正金额与记录数。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<SummaryArgs>()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: SummaryArgs = parse_args(args)?;
        let days = args.days.filter(|d| *d > 0).unwrap_or(30);
        let summary = self.ledger.summary(&ctx.user_id, days).await?;
        Ok(ToolResult::ok(format!("最近{days}天收支汇总")).with("summary", &summary))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteArgs {
    /// 记账记录的ID
    transaction_id: i64,
}

/// 删除记账记录
pub struct DeleteTransactionTool {
    ledger: Arc<dyn LedgerService>,
}

impl DeleteTransactionTool {
    pub fn new(ledger: Arc<dyn LedgerService>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Tool for DeleteTransactionTool {
    fn name(&self) -> &str {
        "delete_transaction"
    }

    fn category(&self) -> &str {
        "删除记账"
    }

    fn description(&self) -> &str {
        "删除一条记账记录。需要先通过 get_transactions 查到记录ID。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<DeleteArgs>()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: DeleteArgs = parse_args(args)?;
        self.ledger
            .delete(&ctx.user_id, args.transaction_id)
            .await
            .map_err(|e| match e {
                ServiceError::NotFound | ServiceError::NotAuthorized => {
                    ToolError::NotFound("记账记录不存在或无权操作".to_string())
                }
                other => other.into(),
            })?;
        Ok(ToolResult::ok("已删除记账记录").with("transaction_id", args.transaction_id))
    }
}
