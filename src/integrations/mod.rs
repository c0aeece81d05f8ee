//! 外部接入：HTTP（需 `--features server`）

#[cfg(feature = "server")]
pub mod http;
