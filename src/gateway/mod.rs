//! 网关：入站消息的排队与并发控制

mod worker_pool;

pub use worker_pool::{JobId, SubmitError, WorkerPool};
