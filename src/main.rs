//! 在办小助手 - 命令行 REPL
//!
//! 每行输入作为一条文本消息；`/image <路径>` 发送图片，`/quit` 退出。
//! 用法：zaiban [配置文件]；用户 ID 取环境变量 ZAIBAN_USER，默认 "cli"。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use zaiban::memory::AttachmentRef;
use zaiban::planning::{parse_plan_time, DailyPlanner, LogNotifier};
use zaiban::{create_assistant, load_config, observability, Inbound};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let assistant = Arc::new(create_assistant(&cfg).context("Failed to create assistant")?);
    let user_id = std::env::var("ZAIBAN_USER").unwrap_or_else(|_| "cli".to_string());

    let token = CancellationToken::new();
    assistant.spawn_maintenance(Duration::from_secs(300), token.clone());
    if cfg.schedule.enabled {
        match parse_plan_time(&cfg.schedule.daily_plan_time) {
            Some(at) => {
                let planner = Arc::new(DailyPlanner::from_assistant(&assistant));
                planner.spawn(at, Arc::new(LogNotifier), token.clone());
            }
            None => tracing::warn!(value = %cfg.schedule.daily_plan_time, "invalid daily_plan_time, planner disabled"),
        }
    }

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(
            format!(
                "在办小助手（模型：{}）输入 help 查看命令，/quit 退出\n",
                assistant.models().active().profile.id
            )
            .as_bytes(),
        )
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        let inbound = match line.strip_prefix("/image ") {
            Some(path) => {
                let path = Path::new(path.trim());
                Inbound::Attachment(AttachmentRef::from_path(path, mime_for(path)))
            }
            None => Inbound::Text(line.to_string()),
        };
        let reply = assistant.handle(&user_id, inbound).await;
        stdout.write_all(format!("{reply}\n").as_bytes()).await?;
    }

    token.cancel();
    Ok(())
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}
