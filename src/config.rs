//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ZAIBAN__*` 覆盖（双下划线表示嵌套，如 `ZAIBAN__LLM__ACTIVE=deepseek`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::ModelProfile;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub workers: WorkersSection,
    pub schedule: ScheduleSection,
    pub storage: StorageSection,
    pub server: ServerSection,
    /// 提示词文件；未设置或不存在时使用内置默认提示词
    pub prompts_path: Option<PathBuf>,
}

/// [app] 段：回合上限、历史窗口、附件会话、回复清理、时区
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 单回合最多调用模型的次数
    pub max_iterations: usize,
    /// 历史保留轮数（一轮 = 用户 + 助手两条）
    pub history_rounds: usize,
    pub history_max_age_hours: u64,
    /// 图片会话空闲超时
    pub attachment_idle_minutes: u64,
    /// 回复是否去除 Markdown 标记
    pub strip_markdown: bool,
    /// 本地时区相对 UTC 的小时数（Asia/Shanghai 为 8）
    pub utc_offset_hours: i32,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            history_rounds: 10,
            history_max_age_hours: 24,
            attachment_idle_minutes: 10,
            strip_markdown: true,
            utc_offset_hours: 8,
        }
    }
}

/// [llm] 段：当前模型与可切换的模型列表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 启动时激活的模型（id、别名或 id 子串）
    pub active: String,
    /// 单次 HTTP 请求超时（秒）
    pub request_timeout_secs: u64,
    pub profiles: Vec<ModelProfile>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            active: "gemini".to_string(),
            request_timeout_secs: 60,
            profiles: default_profiles(),
        }
    }
}

fn default_profiles() -> Vec<ModelProfile> {
    let mut deepseek = ModelProfile::new("deepseek", "https://api.deepseek.com", "deepseek-chat").with_alias("ds");
    deepseek.api_key_env = Some("DEEPSEEK_API_KEY".to_string());

    let mut gemini = ModelProfile::new("gemini", "https://hiapi.online/v1", "gemini-2.5-pro-thinking")
        .with_alias("pro")
        .with_vision(true)
        .with_search(true);
    gemini.api_key_env = Some("GEMINI_API_KEY".to_string());
    gemini.temperature = 0.7;
    gemini.thinking_budget = Some(-1);

    let mut flash = ModelProfile::new("gemini-flash", "https://hiapi.online/v1", "gemini-2.5-flash")
        .with_alias("flash")
        .with_vision(true)
        .with_search(true);
    flash.api_key_env = Some("GEMINI_API_KEY".to_string());
    flash.temperature = 0.7;

    let mock = ModelProfile::mock("mock").with_alias("离线").with_vision(true);

    vec![deepseek, gemini, flash, mock]
}

/// [tools] 段：模糊匹配阈值、工具超时、搜索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub resolver_threshold: f64,
    /// 单次工具调用超时（秒），0 表示不限
    pub timeout_secs: u64,
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            resolver_threshold: crate::tools::resolver::DEFAULT_THRESHOLD,
            timeout_secs: 0,
            search: SearchSection::default(),
        }
    }
}

/// [tools.search] 段：搜索端点、抓取超时、最大字符数、允许直接抓取的域名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: String,
    pub query_param: String,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: "https://html.duckduckgo.com/html/".to_string(),
            query_param: "q".to_string(),
            timeout_secs: 15,
            max_result_chars: 4000,
            allowed_domains: default_allowed_domains(),
        }
    }
}

fn default_allowed_domains() -> Vec<String> {
    [
        "zh.wikipedia.org",
        "en.wikipedia.org",
        "baike.baidu.com",
        "www.baidu.com",
        "www.zhihu.com",
        "zhuanlan.zhihu.com",
        "www.weather.com.cn",
        "news.sina.com.cn",
        "www.thepaper.cn",
        "github.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// [workers] 段：并发回合数与排队上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    pub max_concurrent: usize,
    pub queue_capacity: usize,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            queue_capacity: 64,
        }
    }
}

/// [schedule] 段：每日规划推送
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub enabled: bool,
    /// 本地时间 HH:MM
    pub daily_plan_time: String,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_plan_time: "09:00".to_string(),
        }
    }
}

/// [storage] 段：未设置 sqlite_path 时使用内存存储
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StorageSection {
    pub sqlite_path: Option<PathBuf>,
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 ZAIBAN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ZAIBAN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ZAIBAN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
