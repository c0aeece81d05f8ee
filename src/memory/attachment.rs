//! 附件会话：用户先发若干张图片，再发一条文字提问
//!
//! 会话在最后一次 add 之后 idle_timeout 内有效；get / has_active 会先做惰性过期检查。
//! get 不会清空会话，消费方（Assistant）在用完附件后自行调用 clear。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// 附件来源：本地路径或内存字节
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// 附件引用：内容 + MIME 类型
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub source: AttachmentSource,
    pub mime_type: String,
}

impl AttachmentRef {
    pub fn from_path(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            source: AttachmentSource::Path(path.into()),
            mime_type: mime_type.into(),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            source: AttachmentSource::Bytes(bytes),
            mime_type: mime_type.into(),
        }
    }

    /// 读出附件字节（路径形式时读取文件）
    pub async fn load(&self) -> std::io::Result<Vec<u8>> {
        match &self.source {
            AttachmentSource::Bytes(b) => Ok(b.clone()),
            AttachmentSource::Path(p) => tokio::fs::read(p).await,
        }
    }
}

#[derive(Debug)]
struct AttachmentSession {
    refs: Vec<AttachmentRef>,
    last_touched: Instant,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttachmentStats {
    pub total_sessions: usize,
    pub total_attachments: usize,
    pub idle_timeout_secs: u64,
}

/// 附件会话存储：user_id -> 待用附件
pub struct AttachmentStore {
    sessions: Mutex<HashMap<String, AttachmentSession>>,
    idle_timeout: Duration,
}

impl AttachmentStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// 加入一个附件，返回当前会话中的附件数
    pub async fn add(&self, user_id: &str, attachment: AttachmentRef) -> usize {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        Self::expire(&mut sessions, user_id, now, self.idle_timeout);
        let session = sessions
            .entry(user_id.to_string())
            .or_insert_with(|| AttachmentSession {
                refs: Vec::new(),
                last_touched: now,
            });
        session.refs.push(attachment);
        session.last_touched = now;
        let count = session.refs.len();
        tracing::info!(user_id = %user_id, count, "attachment session updated");
        count
    }

    pub async fn get(&self, user_id: &str) -> Vec<AttachmentRef> {
        let mut sessions = self.sessions.lock().await;
        Self::expire(&mut sessions, user_id, Instant::now(), self.idle_timeout);
        sessions
            .get(user_id)
            .map(|s| s.refs.clone())
            .unwrap_or_default()
    }

    pub async fn has_active(&self, user_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        Self::expire(&mut sessions, user_id, Instant::now(), self.idle_timeout);
        sessions
            .get(user_id)
            .map(|s| !s.refs.is_empty())
            .unwrap_or(false)
    }

    /// 清空会话，返回清除的附件数
    pub async fn clear(&self, user_id: &str) -> usize {
        self.sessions
            .lock()
            .await
            .remove(user_id)
            .map(|s| s.refs.len())
            .unwrap_or(0)
    }

    /// 清理所有过期会话，返回清理数
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_duration_since(s.last_touched) <= self.idle_timeout);
        before - sessions.len()
    }

    pub async fn stats(&self) -> AttachmentStats {
        let sessions = self.sessions.lock().await;
        AttachmentStats {
            total_sessions: sessions.len(),
            total_attachments: sessions.values().map(|s| s.refs.len()).sum(),
            idle_timeout_secs: self.idle_timeout.as_secs(),
        }
    }

    fn expire(
        sessions: &mut HashMap<String, AttachmentSession>,
        user_id: &str,
        now: Instant,
        idle_timeout: Duration,
    ) {
        let expired = sessions
            .get(user_id)
            .map(|s| now.saturating_duration_since(s.last_touched) > idle_timeout)
            .unwrap_or(false);
        if expired {
            sessions.remove(user_id);
            tracing::info!(user_id = %user_id, "attachment session expired");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> AttachmentRef {
        AttachmentRef::from_path(format!("uploads/{name}"), "image/jpeg")
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_counts_then_idle_expiry() {
        let store = AttachmentStore::new(Duration::from_secs(600));
        assert_eq!(store.add("u1", image("1.jpg")).await, 1);
        assert_eq!(store.add("u1", image("2.jpg")).await, 2);
        assert_eq!(store.add("u1", image("3.jpg")).await, 3);
        assert!(store.has_active("u1").await);

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(!store.has_active("u1").await);
        assert!(store.get("u1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_refreshes_idle_timer() {
        let store = AttachmentStore::new(Duration::from_secs(600));
        store.add("u1", image("1.jpg")).await;
        tokio::time::advance(Duration::from_secs(500)).await;
        store.add("u1", image("2.jpg")).await;
        tokio::time::advance(Duration::from_secs(500)).await;
        assert_eq!(store.get("u1").await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_expiry_starts_new_session() {
        let store = AttachmentStore::new(Duration::from_secs(60));
        store.add("u1", image("1.jpg")).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.add("u1", image("2.jpg")).await, 1);
    }

    #[tokio::test]
    async fn test_get_does_not_clear() {
        let store = AttachmentStore::new(Duration::from_secs(600));
        store.add("u1", image("1.jpg")).await;
        assert_eq!(store.get("u1").await.len(), 1);
        assert_eq!(store.get("u1").await.len(), 1);
        assert_eq!(store.clear("u1").await, 1);
        assert_eq!(store.clear("u1").await, 0);
        assert!(!store.has_active("u1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let store = AttachmentStore::new(Duration::from_secs(60));
        store.add("u1", image("1.jpg")).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        store.add("u2", image("2.jpg")).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.cleanup_expired().await, 1);
        let stats = store.stats().await;
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_attachments, 1);
    }

    #[tokio::test]
    async fn test_load_bytes() {
        let a = AttachmentRef::from_bytes(vec![1, 2, 3], "image/png");
        assert_eq!(a.load().await.unwrap(), vec![1, 2, 3]);
    }
}
