//! 记忆层：对话历史（按用户、有界、随时间衰减）与附件会话

pub mod attachment;
pub mod conversation;

pub use attachment::{AttachmentRef, AttachmentSource, AttachmentStats, AttachmentStore};
pub use conversation::{ConversationStats, ConversationStore, HistoryEntry, Message, Role};
