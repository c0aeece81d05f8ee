//! 每日规划推送
//!
//! 每天在配置的本地时间，为每个有待办记录的用户汇总「昨天完成」与「今天待办」，
//! 交给当前模型（不声明工具）生成一段规划，再通过 Notifier 发出。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime};
use tokio_util::sync::CancellationToken;

use crate::agent::Assistant;
use crate::core::AgentError;
use crate::llm::ModelRegistry;
use crate::memory::Message;
use crate::prompts::{weekday_cn, PromptBook};
use crate::services::{Clock, Todo, TodoService, TIME_FORMAT};

pub const PLAN_FALLBACK: &str = "抱歉，无法生成今日规划。";

/// 规划消息的出口（微信客服消息、日志等）
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, text: &str) -> anyhow::Result<()>;
}

/// 只写日志的 Notifier，用于没有推送通道的前端
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, text: &str) -> anyhow::Result<()> {
        tracing::info!(user_id = %user_id, chars = text.chars().count(), "daily plan: {}", text);
        Ok(())
    }
}

pub struct DailyPlanner {
    todos: Arc<dyn TodoService>,
    models: Arc<ModelRegistry>,
    prompts: PromptBook,
    clock: Clock,
}

impl DailyPlanner {
    pub fn new(todos: Arc<dyn TodoService>, models: Arc<ModelRegistry>, prompts: PromptBook, clock: Clock) -> Self {
        Self {
            todos,
            models,
            prompts,
            clock,
        }
    }

    pub fn from_assistant(assistant: &Assistant) -> Self {
        Self::new(
            assistant.todos().clone(),
            assistant.models().clone(),
            assistant.prompts().clone(),
            assistant.clock(),
        )
    }

    /// 生成单个用户的规划；任何失败都退回固定文案
    pub async fn generate_plan(&self, user_id: &str) -> String {
        match self.try_generate(user_id).await {
            Ok(Some(plan)) => plan,
            Ok(None) => PLAN_FALLBACK.to_string(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "daily plan generation failed");
                PLAN_FALLBACK.to_string()
            }
        }
    }

    async fn try_generate(&self, user_id: &str) -> Result<Option<String>, AgentError> {
        let today_start = self.clock.today_start();
        let yesterday_start = today_start - chrono::Duration::days(1);

        let done = self.todos.completed_between(user_id, yesterday_start, today_start).await?;
        let today = self.todos.due_from(user_id, today_start).await?;
        let yesterday_summary = bullet_list(&done, |t| format!("- {}", t.content));
        let today_tasks = bullet_list(&today, |t| match t.due_date {
            Some(due) => format!("- {}（截止：{}）", t.content, due.format(TIME_FORMAT)),
            None => format!("- {}", t.content),
        });

        let Some(prompt) = self.prompts.daily_planning_prompt(&yesterday_summary, &today_tasks) else {
            tracing::warn!("daily_planning_prompt missing");
            return Ok(None);
        };
        let messages = vec![
            Message::system(self.prompts.system_prompt(self.clock.now())),
            Message::user(prompt),
        ];

        let model = self.models.active();
        let completion = model.client.complete(&messages, &[]).await?;
        if let Some(usage) = &completion.usage {
            tracing::info!(
                user_id = %user_id,
                model = %model.profile.id,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "daily plan generated"
            );
        }
        Ok(completion
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()))
    }

    /// 推送给用户的完整文本：问候 + 规划
    pub async fn compose_message(&self, user_id: &str) -> String {
        let today = self.clock.today();
        let plan = self.generate_plan(user_id).await;
        format!(
            "早上好！☀️\n\n今天是 {} {}\n\n{plan}",
            today.format("%Y年%m月%d日"),
            weekday_cn(today)
        )
    }

    /// 为所有用户生成并推送一次，返回 (成功数, 失败数)
    pub async fn run_once(&self, notifier: &dyn Notifier) -> (usize, usize) {
        let users = match self.todos.user_ids().await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(error = %e, "cannot list users for daily plan");
                return (0, 0);
            }
        };
        let mut sent = 0;
        let mut failed = 0;
        for user_id in users {
            let message = self.compose_message(&user_id).await;
            match notifier.notify(&user_id, &message).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(user_id = %user_id, error = %e, "daily plan delivery failed");
                }
            }
        }
        tracing::info!(sent, failed, "daily plan round finished");
        (sent, failed)
    }

    /// 每天 `at` 执行一次 run_once，直到 token 被取消
    pub async fn run(&self, at: NaiveTime, notifier: Arc<dyn Notifier>, token: CancellationToken) {
        loop {
            let delay = next_run_delay(self.clock.now(), at);
            tracing::info!(next_in_secs = delay.as_secs(), "daily planner waiting");
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("daily planner stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            self.run_once(notifier.as_ref()).await;
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        at: NaiveTime,
        notifier: Arc<dyn Notifier>,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(at, notifier, token).await })
    }
}

fn bullet_list(todos: &[Todo], line: impl Fn(&Todo) -> String) -> String {
    if todos.is_empty() {
        return "无".to_string();
    }
    todos.iter().map(line).collect::<Vec<_>>().join("\n")
}

/// 解析 "HH:MM"
pub fn parse_plan_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// 距离下一次 `at` 的时长；今天已过（含恰好等于）则排到明天
pub fn next_run_delay(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
