//! 工具调度器
//!
//! 持有 ToolRegistry，dispatch(name, args) 解析参数并调用处理器。
//! 未知工具、参数错误、处理器返回 Err、处理器 panic、（可选）超时，全部转为 `{success:false, message}`，
//! 不会向外传播；每次调用输出结构化审计日志（JSON）。
//! 编排循环走 `dispatch_declared`：模型点名了本回合未声明的工具（如无搜索能力时的 search_web）同样按失败处理。

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;

use crate::core::ToolError;
use crate::llm::ToolSchema;
use crate::tools::{ToolContext, ToolRegistry, ToolResult};

/// 工具调度器
pub struct ToolDispatcher {
    registry: ToolRegistry,
    timeout: Option<Duration>,
}

impl ToolDispatcher {
    /// timeout_secs 为 0 表示不限时
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 以模型给出的原始 JSON 字符串调用工具
    pub async fn dispatch(&self, ctx: &ToolContext, name: &str, raw_args: &str) -> ToolResult {
        let args = if raw_args.trim().is_empty() {
            Ok(Value::Object(Default::default()))
        } else {
            serde_json::from_str::<Value>(raw_args)
                .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))
        };
        match args {
            Ok(args) => self.dispatch_value(ctx, name, args).await,
            Err(e) => {
                audit(name, false, "invalid_arguments", Duration::ZERO, raw_args);
                ToolResult::fail(e.to_string())
            }
        }
    }

    /// 只执行 `declared` 中的工具；已注册但未声明的返回失败结果
    pub async fn dispatch_declared(
        &self,
        ctx: &ToolContext,
        declared: &[ToolSchema],
        name: &str,
        raw_args: &str,
    ) -> ToolResult {
        if self.registry.get(name).is_some() && !declared.iter().any(|t| t.name == name) {
            audit(name, false, "undeclared_tool", Duration::ZERO, raw_args);
            return ToolResult::fail(format!("tool not available for this model: {name}"));
        }
        self.dispatch(ctx, name, raw_args).await
    }

    pub async fn dispatch_value(&self, ctx: &ToolContext, name: &str, args: Value) -> ToolResult {
        let start = Instant::now();
        let preview = args.to_string();

        let Some(tool) = self.registry.get(name) else {
            audit(name, false, "unknown_tool", start.elapsed(), &preview);
            return ToolResult::fail(format!("unknown tool: {name}"));
        };

        let call = AssertUnwindSafe(tool.execute(ctx, args)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(r) => r,
                Err(_) => Ok(Err(ToolError::Timeout(name.to_string()))),
            },
            None => call.await,
        };

        let (result, label) = match outcome {
            Ok(Ok(result)) => {
                let label = if result.success { "ok" } else { "failed" };
                (result, label)
            }
            Ok(Err(e)) => {
                let label = match e {
                    ToolError::InvalidArguments(_) => "invalid_arguments",
                    ToolError::Timeout(_) => "timeout",
                    _ => "error",
                };
                (ToolResult::fail(e.to_string()), label)
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::error!(tool = %name, reason = %reason, "tool panicked");
                (ToolResult::fail(format!("tool execution failed: {reason}")), "panic")
            }
        };
        audit(name, result.success, label, start.elapsed(), &preview);
        result
    }
}

fn audit(tool: &str, ok: bool, outcome: &str, elapsed: Duration, args: &str) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": elapsed.as_millis() as u64,
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &str) -> String {
    if args.chars().count() > 200 {
        format!("{}...", args.chars().take(200).collect::<String>())
    } else {
        args.to_string()
    }
}
