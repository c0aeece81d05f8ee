//! Assistant：接入层与编排循环之间的边界
//!
//! 负责系统命令、附件会话、历史读写、提示词选择、错误转文字与回复清理；
//! 具体回合交给 Orchestrator。前端（REPL、HTTP）只与 `Assistant::handle` 打交道。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::command::{Command, CommandHandler};
use crate::config::AppConfig;
use crate::core::{AgentError, Orchestrator, TurnRequest};
use crate::llm::{default_client_factory, ModelRegistry};
use crate::memory::{
    AttachmentRef, AttachmentStats, AttachmentStore, ConversationStats, ConversationStore, Message, Role,
};
use crate::prompts::PromptBook;
use crate::services::{
    Clock, InMemoryLedgerService, InMemoryTodoService, LedgerService, SqliteStore, TodoService,
};
use crate::text::clean_markdown;
use crate::tools::{build_default_registry, ToolDispatcher};

pub const WELCOME_TEXT: &str = "欢迎关注在办小助手！\n\n我可以帮你管理待办事项，你可以：\n• 直接告诉我要做什么，我会帮你记录\n• 说\"查看待办\"来查看任务列表\n• 说\"完成XX\"来标记任务完成\n• 发送图片给我，我可以帮你分析图片内容\n• 每天早上9点我会给你发送任务规划\n\n快来试试吧！";

pub const CAPABILITY_REPLY: &str =
    "抱歉，当前配置的模型不支持图片处理功能。请切换到支持图片的模型（如 gemini）。";

/// 接入层送来的一条消息
#[derive(Clone, Debug)]
pub enum Inbound {
    Text(String),
    Attachment(AttachmentRef),
    Subscribe,
    Unsubscribe,
}

/// 处理单条消息并返回回复文本；WorkerPool 只依赖这个 trait
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn handle(&self, user_id: &str, inbound: Inbound) -> String;
}

#[derive(Clone, Debug, Serialize)]
pub struct AssistantStats {
    pub active_model: String,
    pub conversations: ConversationStats,
    pub attachments: AttachmentStats,
}

pub struct Assistant {
    conversations: Arc<ConversationStore>,
    attachments: Arc<AttachmentStore>,
    models: Arc<ModelRegistry>,
    orchestrator: Orchestrator,
    commands: CommandHandler,
    prompts: PromptBook,
    todos: Arc<dyn TodoService>,
    ledger: Arc<dyn LedgerService>,
    clock: Clock,
    strip_markdown: bool,
}

impl Assistant {
    /// 用现成的服务与模型注册表组装；工具注册表按配置构建
    pub fn new(
        cfg: &AppConfig,
        todos: Arc<dyn TodoService>,
        ledger: Arc<dyn LedgerService>,
        models: Arc<ModelRegistry>,
        prompts: PromptBook,
        clock: Clock,
    ) -> Result<Self, AgentError> {
        let registry = build_default_registry(todos.clone(), ledger.clone(), &cfg.tools)?;
        let dispatcher = Arc::new(ToolDispatcher::new(registry, cfg.tools.timeout_secs));
        let orchestrator = Orchestrator::new(dispatcher, cfg.app.max_iterations);

        let conversations = Arc::new(ConversationStore::new(
            cfg.app.history_rounds,
            Duration::from_secs(cfg.app.history_max_age_hours * 3600),
        ));
        let attachments = Arc::new(AttachmentStore::new(Duration::from_secs(
            cfg.app.attachment_idle_minutes * 60,
        )));
        let commands = CommandHandler::new(
            conversations.clone(),
            attachments.clone(),
            todos.clone(),
            models.clone(),
        );

        Ok(Self {
            conversations,
            attachments,
            models,
            orchestrator,
            commands,
            prompts,
            todos,
            ledger,
            clock,
            strip_markdown: cfg.app.strip_markdown,
        })
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn attachments(&self) -> &Arc<AttachmentStore> {
        &self.attachments
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn todos(&self) -> &Arc<dyn TodoService> {
        &self.todos
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerService> {
        &self.ledger
    }

    pub fn prompts(&self) -> &PromptBook {
        &self.prompts
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub async fn handle(&self, user_id: &str, inbound: Inbound) -> String {
        match inbound {
            Inbound::Text(text) => self.handle_text(user_id, &text).await,
            Inbound::Attachment(attachment) => {
                let count = self.attachments.add(user_id, attachment).await;
                format!("已接收到图片（共{count}张），是否继续发送图片还是根据图片提问？")
            }
            Inbound::Subscribe => WELCOME_TEXT.to_string(),
            Inbound::Unsubscribe => {
                self.conversations.clear(user_id).await;
                self.attachments.clear(user_id).await;
                tracing::info!(user_id = %user_id, "user unsubscribed");
                "success".to_string()
            }
        }
    }

    async fn handle_text(&self, user_id: &str, text: &str) -> String {
        let text = text.trim();
        if let Some(command) = Command::parse(text) {
            return self.commands.run(user_id, text, &command).await;
        }

        // 回合开始时取模型快照，期间的切换不影响本回合
        let model = self.models.active();
        let pending = self.attachments.get(user_id).await;
        if !pending.is_empty() && !model.profile.vision {
            tracing::warn!(user_id = %user_id, model = %model.profile.id, "attachments sent to non-vision model");
            return CAPABILITY_REPLY.to_string();
        }

        let history: Vec<Message> = self
            .conversations
            .read(user_id)
            .await
            .iter()
            .map(|e| e.to_message())
            .collect();
        let now = self.clock.now();
        let with_images = !pending.is_empty();
        let (system_prompt, recorded) = if with_images {
            (
                self.prompts.image_system_prompt(now),
                format!("[附带{}张图片] {text}", pending.len()),
            )
        } else {
            (self.prompts.system_prompt(now), text.to_string())
        };

        self.conversations
            .add(user_id, Role::User, recorded, pending.first().cloned())
            .await;

        let request = TurnRequest {
            user_id: user_id.to_string(),
            system_prompt,
            history,
            input: Message::user(text).with_attachments(pending),
        };
        let reply = match self.orchestrator.run_turn(&model, request).await {
            Ok(outcome) => outcome.reply,
            Err(AgentError::CapabilityMismatch(_)) => CAPABILITY_REPLY.to_string(),
            Err(e) => {
                tracing::error!(user_id = %user_id, model = %model.profile.id, error = %e, "turn failed");
                let reason = match e {
                    AgentError::UpstreamModel(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                format!("抱歉，我遇到了一些问题：{reason}")
            }
        };
        let reply = if self.strip_markdown {
            clean_markdown(&reply)
        } else {
            reply
        };

        self.conversations
            .add(user_id, Role::Assistant, reply.clone(), None)
            .await;
        if with_images {
            self.attachments.clear(user_id).await;
        }
        reply
    }

    pub async fn stats(&self) -> AssistantStats {
        AssistantStats {
            active_model: self.models.active().profile.id.clone(),
            conversations: self.conversations.stats().await,
            attachments: self.attachments.stats().await,
        }
    }

    /// 清理过期的历史与附件会话
    pub async fn cleanup_expired(&self) -> (usize, usize) {
        let users = self.conversations.cleanup_all().await;
        let sessions = self.attachments.cleanup_expired().await;
        if users > 0 || sessions > 0 {
            tracing::debug!(users, sessions, "expired state cleaned");
        }
        (users, sessions)
    }

    /// 后台定时清理，token 取消后退出
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        every: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let assistant = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        assistant.cleanup_expired().await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl TurnHandler for Assistant {
    async fn handle(&self, user_id: &str, inbound: Inbound) -> String {
        Assistant::handle(self, user_id, inbound).await
    }
}

/// 按配置构建 Assistant：设置了 sqlite_path 用 SQLite，否则用内存存储
pub fn create_assistant(cfg: &AppConfig) -> Result<Assistant, AgentError> {
    let clock = Clock::with_offset_hours(cfg.app.utc_offset_hours);
    let (todos, ledger): (Arc<dyn TodoService>, Arc<dyn LedgerService>) = match &cfg.storage.sqlite_path {
        Some(path) => {
            let store = Arc::new(SqliteStore::open(path, clock)?);
            tracing::info!(path = %path.display(), "sqlite storage opened");
            let todos: Arc<dyn TodoService> = store.clone();
            let ledger: Arc<dyn LedgerService> = store;
            (todos, ledger)
        }
        None => {
            tracing::info!("using in-memory storage");
            let todos: Arc<dyn TodoService> = Arc::new(InMemoryTodoService::new(clock));
            let ledger: Arc<dyn LedgerService> = Arc::new(InMemoryLedgerService::new(clock));
            (todos, ledger)
        }
    };
    let models = Arc::new(ModelRegistry::new(
        cfg.llm.profiles.clone(),
        &cfg.llm.active,
        default_client_factory(cfg.llm.request_timeout_secs),
    )?);
    let prompts = PromptBook::load(cfg.prompts_path.as_deref());
    Assistant::new(cfg, todos, ledger, models, prompts, clock)
}
