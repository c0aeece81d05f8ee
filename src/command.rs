//! 系统命令：在进入编排循环之前识别，不经过模型
//!
//! 字面命令（大小写不敏感）：clear、help/帮助、reset/重置、stats/统计、models/模型；
//! 前缀命令：`use <模型>`、`切换 <模型>`、`切换到<模型>`。回复一律以 `[sys] ` 开头。

use std::sync::Arc;

use crate::core::{AgentError, ServiceError};
use crate::llm::ModelRegistry;
use crate::memory::{AttachmentStore, ConversationStore, Role};
use crate::services::{TodoService, TodoStatus};

pub const SYS_PREFIX: &str = "[sys] ";

const HELP_TEXT: &str = "[sys] 📖 系统命令帮助

🔧 系统命令（直接输入即可）：
• clear - 清空对话历史
• help / 帮助 - 显示此帮助信息
• stats / 统计 - 查看统计信息
• reset / 重置 - 重置所有数据（慎用）
• models / 模型 - 查看可用模型
• use <模型> / 切换 <模型> - 切换模型

💡 使用提示：
直接和我说话，我会帮你管理待办事项！
例如：
• \"明天下午开会\"
• \"查看我的待办\"
• \"完成第一个任务\"";

/// 系统命令
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Clear,
    Help,
    Reset,
    Stats,
    Models,
    Use(String),
}

impl Command {
    /// 识别命令；不是命令时返回 None，原文作为普通对话转发
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let lower = trimmed.to_lowercase();
        match lower.as_str() {
            "clear" => return Some(Command::Clear),
            "help" | "帮助" => return Some(Command::Help),
            "reset" | "重置" => return Some(Command::Reset),
            "stats" | "统计" => return Some(Command::Stats),
            "models" | "模型" => return Some(Command::Models),
            _ => {}
        }

        let target = if let Some(rest) = trimmed.strip_prefix("切换到") {
            rest
        } else if let Some(rest) = strip_word(trimmed, "切换") {
            rest
        } else {
            strip_word(trimmed, "use")?
        };
        let target = target.trim();
        if target.is_empty() {
            return None;
        }
        Some(Command::Use(target.to_string()))
    }

    /// 会清空历史的命令不写入历史
    pub fn clears_history(&self) -> bool {
        matches!(self, Command::Clear | Command::Reset)
    }
}

/// 去掉前缀词，要求其后紧跟空白
fn strip_word<'a>(input: &'a str, word: &str) -> Option<&'a str> {
    let head = input.get(..word.len())?;
    if !head.eq_ignore_ascii_case(word) {
        return None;
    }
    let rest = &input[word.len()..];
    rest.starts_with(char::is_whitespace).then_some(rest)
}

/// 命令执行器
pub struct CommandHandler {
    conversations: Arc<ConversationStore>,
    attachments: Arc<AttachmentStore>,
    todos: Arc<dyn TodoService>,
    models: Arc<ModelRegistry>,
}

impl CommandHandler {
    pub fn new(
        conversations: Arc<ConversationStore>,
        attachments: Arc<AttachmentStore>,
        todos: Arc<dyn TodoService>,
        models: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            conversations,
            attachments,
            todos,
            models,
        }
    }

    /// 执行命令并按规则写入历史：非清空类命令记录原文与去掉 `[sys] ` 的回复
    pub async fn run(&self, user_id: &str, raw: &str, command: &Command) -> String {
        let record = !command.clears_history();
        if record {
            self.conversations.add(user_id, Role::User, raw.trim(), None).await;
        }
        let reply = match self.execute(user_id, command).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(user_id = %user_id, command = ?command, error = %e, "command failed");
                format!("{SYS_PREFIX}❌ 命令执行失败：{e}")
            }
        };
        if record {
            let clean = reply.replacen(SYS_PREFIX, "", 1);
            self.conversations.add(user_id, Role::Assistant, clean.trim(), None).await;
        }
        reply
    }

    pub async fn execute(&self, user_id: &str, command: &Command) -> Result<String, ServiceError> {
        tracing::info!(user_id = %user_id, command = ?command, "system command");
        match command {
            Command::Clear => {
                let cleared = self.conversations.clear(user_id).await;
                Ok(format!("{SYS_PREFIX}✅ 已清空对话历史！\n共清除了 {cleared} 条记录。"))
            }
            Command::Help => Ok(HELP_TEXT.to_string()),
            Command::Reset => self.reset(user_id).await,
            Command::Stats => self.stats(user_id).await,
            Command::Models => Ok(self.models_text()),
            Command::Use(target) => Ok(self.switch(target)),
        }
    }

    async fn reset(&self, user_id: &str) -> Result<String, ServiceError> {
        let history = self.conversations.clear(user_id).await;
        self.attachments.clear(user_id).await;
        let todos = self.todos.delete_all(user_id).await?;
        tracing::warn!(user_id = %user_id, history, todos, "user data reset");
        Ok(format!(
            "{SYS_PREFIX}⚠️ 已重置所有数据！\n\n清除内容：\n• 对话历史：{history} 条\n• 待办事项：{todos} 个\n\n现在可以重新开始使用了！"
        ))
    }

    async fn stats(&self, user_id: &str) -> Result<String, ServiceError> {
        let history = self.conversations.read(user_id).await.len();
        let all = self.todos.list(user_id, None).await?;
        let pending = all.iter().filter(|t| t.status == TodoStatus::Pending).count();
        let completed = all.iter().filter(|t| t.status == TodoStatus::Completed).count();
        let rate = if all.is_empty() {
            0.0
        } else {
            completed as f64 / all.len() as f64 * 100.0
        };
        Ok(format!(
            "{SYS_PREFIX}📊 数据统计\n\n💬 对话数据：\n• 历史对话：{history} 条\n\n✅ 待办数据：\n• 总计：{} 个\n• 待完成：{pending} 个\n• 已完成：{completed} 个\n• 完成率：{rate:.1}%\n\n🎯 继续加油！",
            all.len()
        ))
    }

    fn models_text(&self) -> String {
        let active = self.models.active();
        let mut lines = vec![format!("{SYS_PREFIX}🤖 可用模型\n")];
        for profile in self.models.profiles() {
            let mut line = format!("• {}", profile.id);
            if !profile.aliases.is_empty() {
                line.push_str(&format!("（别名：{}）", profile.aliases.join("、")));
            }
            if profile.vision {
                line.push_str(" 📷");
            }
            if profile.search {
                line.push_str(" 🔍");
            }
            if profile.id == active.profile.id {
                line.push_str(" ← 当前");
            }
            lines.push(line);
        }
        lines.push("\n发送「use 模型名」或「切换 模型名」切换模型。".to_string());
        lines.join("\n")
    }

    fn switch(&self, target: &str) -> String {
        match self.models.switch(target) {
            Ok(profile) => format!("{SYS_PREFIX}✅ 已切换到模型：{}（{}）", profile.id, profile.model),
            Err(AgentError::ModelNotFound(name)) => {
                format!("{SYS_PREFIX}❌ 未找到模型：{name}\n发送 models 查看可用模型。")
            }
            Err(e) => format!("{SYS_PREFIX}❌ 切换模型失败：{e}"),
        }
    }
}
