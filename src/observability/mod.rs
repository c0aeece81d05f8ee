//! 可观测性：tracing 订阅器初始化

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// 默认 info，可通过 RUST_LOG 覆盖；重复调用时忽略
pub fn init() {
    let filter = EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
