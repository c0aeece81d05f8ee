//! 有界工作池
//!
//! 入站消息先进有界队列，再由调度循环派发到独立 tokio 任务：
//! - 队列满时 `submit` 等待、`try_submit` 立即失败（背压）
//! - 已派发但未开始的作业最多 queue_capacity 个，超出时调度循环停止取队列
//! - 同时运行的回合数不超过 max_concurrent
//! - 同一用户的消息按提交顺序串行处理；排队等前一条的作业不占运行许可，不同用户并行

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::agent::{Inbound, TurnHandler};
use crate::config::WorkersSection;

/// 作业 ID
pub type JobId = String;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker queue is full")]
    QueueFull,

    #[error("worker pool is shut down")]
    Closed,
}

struct Job {
    id: JobId,
    user_id: String,
    inbound: Inbound,
    reply: oneshot::Sender<String>,
    queued_at: Instant,
}

pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    capacity: usize,
}

impl WorkerPool {
    /// 启动调度循环；token 取消后不再派发新作业（进行中的作业继续完成）
    pub fn start(
        handler: Arc<dyn TurnHandler>,
        cfg: &WorkersSection,
        token: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let capacity = cfg.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let limits = Limits {
            admitted: Arc::new(Semaphore::new(capacity)),
            running: Arc::new(Semaphore::new(cfg.max_concurrent.max(1))),
        };
        let handle = tokio::spawn(dispatch_loop(rx, handler, limits, token));
        tracing::info!(max_concurrent = cfg.max_concurrent, queue_capacity = capacity, "worker pool started");
        (Self { tx, capacity }, handle)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前排队中的作业数
    pub fn queued(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// 提交并等待回复；队列满时等待空位
    pub async fn submit(&self, user_id: &str, inbound: Inbound) -> Result<String, SubmitError> {
        let (job, rx) = new_job(user_id, inbound);
        self.tx.send(job).await.map_err(|_| SubmitError::Closed)?;
        rx.await.map_err(|_| SubmitError::Closed)
    }

    /// 不等待队列空位；成功时返回回复的接收端
    pub fn try_submit(&self, user_id: &str, inbound: Inbound) -> Result<oneshot::Receiver<String>, SubmitError> {
        let (job, rx) = new_job(user_id, inbound);
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => {
                tracing::warn!(job_id = %job.id, user_id = %job.user_id, "worker queue full, rejecting");
                SubmitError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })?;
        Ok(rx)
    }
}

fn new_job(user_id: &str, inbound: Inbound) -> (Job, oneshot::Receiver<String>) {
    let (reply, rx) = oneshot::channel();
    let job = Job {
        id: format!("job_{}", uuid::Uuid::new_v4()),
        user_id: user_id.to_string(),
        inbound,
        reply,
        queued_at: Instant::now(),
    };
    (job, rx)
}

/// admitted：已取出、尚未开始运行的作业；running：正在运行的回合
struct Limits {
    admitted: Arc<Semaphore>,
    running: Arc<Semaphore>,
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<Job>,
    handler: Arc<dyn TurnHandler>,
    limits: Limits,
    token: CancellationToken,
) {
    // user_id -> 该用户最后一个作业的完成信号；发送端随作业结束被 drop
    let mut tails: HashMap<String, oneshot::Receiver<()>> = HashMap::new();

    loop {
        let admission = tokio::select! {
            _ = token.cancelled() => break,
            permit = limits.admitted.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let job = tokio::select! {
            _ = token.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        tails.retain(|_, done| matches!(done.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = tails.insert(job.user_id.clone(), done_rx);

        let handler = handler.clone();
        let running = limits.running.clone();
        tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let Ok(permit) = running.acquire_owned().await else {
                return;
            };
            drop(admission);

            let waited_ms = job.queued_at.elapsed().as_millis() as u64;
            tracing::debug!(job_id = %job.id, user_id = %job.user_id, waited_ms, "job started");
            let reply = handler.handle(&job.user_id, job.inbound).await;
            if job.reply.send(reply).is_err() {
                tracing::debug!(job_id = %job.id, "submitter went away before reply");
            }
            drop(permit);
            drop(done_tx);
        });
    }
    tracing::info!("worker pool dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// 记录处理顺序；文本以 "slow" 开头时睡 50ms
    struct Recorder {
        seen: Mutex<Vec<String>>,
        running: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                running: Default::default(),
                peak: Default::default(),
            })
        }
    }

    #[async_trait]
    impl TurnHandler for Recorder {
        async fn handle(&self, user_id: &str, inbound: Inbound) -> String {
            use std::sync::atomic::Ordering;
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let text = match inbound {
                Inbound::Text(t) => t,
                _ => "other".to_string(),
            };
            if text.starts_with("slow") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.seen.lock().unwrap().push(format!("{user_id}:{text}"));
            self.running.fetch_sub(1, Ordering::SeqCst);
            format!("ok {text}")
        }
    }

    fn workers(max_concurrent: usize, queue_capacity: usize) -> WorkersSection {
        WorkersSection {
            max_concurrent,
            queue_capacity,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_returns_reply() {
        let recorder = Recorder::new();
        let (pool, _h) = WorkerPool::start(recorder.clone(), &workers(2, 4), CancellationToken::new());
        let reply = pool.submit("u1", Inbound::Text("hi".into())).await.unwrap();
        assert_eq!(reply, "ok hi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_user_keeps_order() {
        let recorder = Recorder::new();
        let (pool, _h) = WorkerPool::start(recorder.clone(), &workers(4, 8), CancellationToken::new());
        let first = pool.try_submit("u1", Inbound::Text("slow first".into())).unwrap();
        let second = pool.try_submit("u1", Inbound::Text("second".into())).unwrap();
        assert_eq!(second.await.unwrap(), "ok second");
        assert_eq!(first.await.unwrap(), "ok slow first");
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["u1:slow first", "u1:second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_users_run_in_parallel_within_limit() {
        let recorder = Recorder::new();
        let (pool, _h) = WorkerPool::start(recorder.clone(), &workers(2, 8), CancellationToken::new());
        let replies: Vec<_> = (0..4)
            .map(|i| pool.try_submit(&format!("u{i}"), Inbound::Text("slow".into())).unwrap())
            .collect();
        for rx in replies {
            rx.await.unwrap();
        }
        assert_eq!(recorder.peak.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(recorder.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_of_one_user_does_not_hold_up_others() {
        let recorder = Recorder::new();
        let (pool, _h) = WorkerPool::start(recorder.clone(), &workers(2, 8), CancellationToken::new());
        let u1: Vec<_> = (0..3)
            .map(|i| pool.try_submit("u1", Inbound::Text(format!("slow {i}"))).unwrap())
            .collect();

        let started = tokio::time::Instant::now();
        let reply = pool.submit("u2", Inbound::Text("quick".into())).await.unwrap();
        assert_eq!(reply, "ok quick");
        assert!(started.elapsed() < Duration::from_millis(50));

        for rx in u1 {
            rx.await.unwrap();
        }
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["u2:quick", "u1:slow 0", "u1:slow 1", "u1:slow 2"]);
    }

    struct Gate(Arc<Notify>);

    #[async_trait]
    impl TurnHandler for Gate {
        async fn handle(&self, _user_id: &str, _inbound: Inbound) -> String {
            self.0.notified().await;
            "done".to_string()
        }
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let gate = Arc::new(Notify::new());
        let (pool, _h) = WorkerPool::start(Arc::new(Gate(gate.clone())), &workers(1, 1), CancellationToken::new());

        let mut accepted = Vec::new();
        let mut rejected = 0;
        for i in 0..10 {
            match pool.try_submit(&format!("u{i}"), Inbound::Subscribe) {
                Ok(rx) => accepted.push(rx),
                Err(SubmitError::QueueFull) => rejected += 1,
                Err(e) => panic!("unexpected {e}"),
            }
            tokio::task::yield_now().await;
        }
        assert!(rejected > 0);
        assert!(accepted.len() <= 3);
    }

    #[tokio::test]
    async fn test_cancelled_pool_reports_closed() {
        let token = CancellationToken::new();
        let (pool, handle) = WorkerPool::start(Recorder::new(), &workers(1, 1), token.clone());
        token.cancel();
        handle.await.unwrap();
        assert_eq!(
            pool.submit("u1", Inbound::Text("hi".into())).await,
            Err(SubmitError::Closed)
        );
    }
}
