//! 短期记忆：按用户保存的对话历史
//!
//! 每个用户一个窗口，写入与读取时都会压缩：先丢弃超过 max_age 的消息，再保留最近 max_rounds*2 条。
//! 整个存储由一把 tokio Mutex 保护，同一用户的写入天然串行。

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::llm::ToolInvocation;
use crate::memory::AttachmentRef;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// 发给模型的单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// assistant 消息中模型请求的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    /// tool 消息对应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            attachments: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    /// 模型本轮请求了工具：content 可能为空
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content.into())
        }
    }

    /// 工具结果，按调用 id 回填
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content.into())
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<AttachmentRef>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// 历史窗口中的一条记录
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub at: Instant,
    pub attachment: Option<AttachmentRef>,
}

impl HistoryEntry {
    /// 转成发给模型的消息；历史中的附件不再重复发送
    pub fn to_message(&self) -> Message {
        Message::new(self.role, self.content.clone())
    }
}

/// 存储统计
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversationStats {
    pub total_users: usize,
    pub total_messages: usize,
    pub avg_messages_per_user: f64,
    pub max_history_rounds: usize,
    pub max_history_hours: u64,
}

/// 对话历史存储：user_id -> 有界窗口
pub struct ConversationStore {
    windows: Mutex<HashMap<String, Vec<HistoryEntry>>>,
    max_rounds: usize,
    max_age: Duration,
}

impl ConversationStore {
    pub fn new(max_rounds: usize, max_age: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_rounds,
            max_age,
        }
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// 追加一条消息并压缩该用户窗口
    pub async fn add(
        &self,
        user_id: &str,
        role: Role,
        content: impl Into<String>,
        attachment: Option<AttachmentRef>,
    ) {
        let mut windows = self.windows.lock().await;
        windows.entry(user_id.to_string()).or_default().push(HistoryEntry {
            role,
            content: content.into(),
            at: Instant::now(),
            attachment,
        });
        self.compact(&mut windows, user_id, Instant::now());
    }

    /// 读取窗口快照（先做一次惰性压缩）
    pub async fn read(&self, user_id: &str) -> Vec<HistoryEntry> {
        let mut windows = self.windows.lock().await;
        self.compact(&mut windows, user_id, Instant::now());
        windows.get(user_id).cloned().unwrap_or_default()
    }

    /// 清空用户历史，返回清除条数
    pub async fn clear(&self, user_id: &str) -> usize {
        let removed = self
            .windows
            .lock()
            .await
            .remove(user_id)
            .map(|w| w.len())
            .unwrap_or(0);
        if removed > 0 {
            tracing::info!(user_id = %user_id, removed, "conversation history cleared");
        }
        removed
    }

    /// 压缩所有用户窗口，返回发生变化的用户数（供定时清理使用）
    pub async fn cleanup_all(&self) -> usize {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let users: Vec<String> = windows.keys().cloned().collect();
        let mut changed = 0;
        for user_id in users {
            let before = windows.get(&user_id).map(|w| w.len()).unwrap_or(0);
            self.compact(&mut windows, &user_id, now);
            let after = windows.get(&user_id).map(|w| w.len()).unwrap_or(0);
            if before != after {
                changed += 1;
            }
        }
        changed
    }

    pub async fn stats(&self) -> ConversationStats {
        let windows = self.windows.lock().await;
        let total_users = windows.len();
        let total_messages: usize = windows.values().map(|w| w.len()).sum();
        let avg = total_messages as f64 / total_users.max(1) as f64;
        ConversationStats {
            total_users,
            total_messages,
            avg_messages_per_user: (avg * 100.0).round() / 100.0,
            max_history_rounds: self.max_rounds,
            max_history_hours: self.max_age.as_secs() / 3600,
        }
    }

    /// 先按时间、再按条数裁剪；窗口清空时移除 key
    fn compact(&self, windows: &mut HashMap<String, Vec<HistoryEntry>>, user_id: &str, now: Instant) {
        let Some(window) = windows.get_mut(user_id) else {
            return;
        };
        window.retain(|e| now.saturating_duration_since(e.at) <= self.max_age);
        let keep = self.max_rounds * 2;
        if window.len() > keep {
            window.drain(..window.len() - keep);
        }
        if window.is_empty() {
            windows.remove(user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(2, Duration::from_secs(24 * 3600))
    }

    #[tokio::test]
    async fn test_window_bounded_by_rounds() {
        let store = store();
        for i in 0..9 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.add("u1", role, format!("m{i}"), None).await;
            assert!(store.read("u1").await.len() <= 4);
        }
        let window = store.read("u1").await;
        let contents: Vec<_> = window.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["m5", "m6", "m7", "m8"]);
    }

    #[tokio::test]
    async fn test_clear_returns_count_and_is_idempotent() {
        let store = store();
        assert_eq!(store.clear("nobody").await, 0);
        assert_eq!(store.clear("nobody").await, 0);

        store.add("u1", Role::User, "你好", None).await;
        store.add("u1", Role::Assistant, "你好！", None).await;
        store.add("u1", Role::User, "在吗", None).await;
        assert_eq!(store.clear("u1").await, 3);
        assert!(store.read("u1").await.is_empty());
        assert_eq!(store.clear("u1").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_max_age() {
        let store = ConversationStore::new(10, Duration::from_secs(3600));
        store.add("u1", Role::User, "old", None).await;
        tokio::time::advance(Duration::from_secs(1800)).await;
        store.add("u1", Role::User, "new", None).await;

        tokio::time::advance(Duration::from_secs(1801)).await;
        let window = store.read("u1").await;
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].content, "new");

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(store.read("u1").await.is_empty());
        assert_eq!(store.stats().await.total_users, 0);
    }

    #[tokio::test]
    async fn test_read_returns_snapshot() {
        let store = store();
        store.add("u1", Role::User, "a", None).await;
        let mut snapshot = store.read("u1").await;
        snapshot.clear();
        assert_eq!(store.read("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let store = store();
        store.add("u1", Role::User, "a", None).await;
        store.add("u2", Role::User, "b", None).await;
        store.add("u2", Role::Assistant, "c", None).await;
        assert_eq!(store.clear("u1").await, 1);
        assert_eq!(store.read("u2").await.len(), 2);

        let stats = store.stats().await;
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.total_messages, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_all_counts_changed_users() {
        let store = ConversationStore::new(10, Duration::from_secs(60));
        store.add("u1", Role::User, "a", None).await;
        tokio::time::advance(Duration::from_secs(50)).await;
        store.add("u2", Role::User, "b", None).await;
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(store.cleanup_all().await, 1);
        assert_eq!(store.stats().await.total_users, 1);
    }

    #[tokio::test]
    async fn test_history_entry_drops_attachment_for_model() {
        let entry = HistoryEntry {
            role: Role::User,
            content: "[附带1张图片] 这是什么".into(),
            at: Instant::now(),
            attachment: Some(AttachmentRef::from_path("a.jpg", "image/jpeg")),
        };
        let msg = entry.to_message();
        assert_eq!(msg.role, Role::User);
        assert!(msg.attachments.is_empty());
    }
}
