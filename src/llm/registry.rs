//! 模型注册表与运行时切换
//!
//! 按注册顺序保存 ModelProfile；当前模型以 `Arc<ActiveModel>` 发布，switch 时整体替换。
//! 每个回合在开始时取一次快照，切换不会影响进行中的回合。

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::LlmClient;

/// 模型后端类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI 兼容接口（DeepSeek、Gemini 代理等）
    #[default]
    OpenAi,
    /// 本地 Mock，无需 API Key
    Mock,
}

/// 一个模型配置：端点、凭据、生成参数与能力标记。注册后不可变。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
    /// 从该环境变量读取 API Key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 是否接受图片
    #[serde(default)]
    pub vision: bool,
    /// 是否开放 search_web 工具
    #[serde(default)]
    pub search: bool,
    /// 思考预算（-1 表示动态）
    #[serde(default)]
    pub thinking_budget: Option<i64>,
    #[serde(default)]
    pub include_thoughts: bool,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1000
}

impl ModelProfile {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            aliases: Vec::new(),
            provider: Provider::OpenAi,
            base_url: base_url.into(),
            model: model.into(),
            api_key_env: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            vision: false,
            search: false,
            thinking_budget: None,
            include_thoughts: false,
        }
    }

    /// Mock 配置，测试与离线演示用
    pub fn mock(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            provider: Provider::Mock,
            model: format!("mock-{id}"),
            ..Self::new(id, "", "")
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_vision(mut self, vision: bool) -> Self {
        self.vision = vision;
        self
    }

    pub fn with_search(mut self, search: bool) -> Self {
        self.search = search;
        self
    }

    /// API Key：显式配置优先，其次读环境变量
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
        })
    }
}

/// 当前生效的模型：配置 + 据此构建的客户端，作为整体发布
pub struct ActiveModel {
    pub profile: Arc<ModelProfile>,
    pub client: Arc<dyn LlmClient>,
}

/// 根据配置构建客户端
pub type ClientFactory =
    Arc<dyn Fn(&ModelProfile) -> Result<Arc<dyn LlmClient>, AgentError> + Send + Sync>;

/// 模型注册表：保持注册顺序，当前模型指针原子替换
pub struct ModelRegistry {
    profiles: RwLock<Vec<Arc<ModelProfile>>>,
    active: RwLock<Arc<ActiveModel>>,
    factory: ClientFactory,
}

impl ModelRegistry {
    /// 注册全部配置并激活 `active`（按 switch 的同一规则解析）
    pub fn new(
        profiles: Vec<ModelProfile>,
        active: &str,
        factory: ClientFactory,
    ) -> Result<Self, AgentError> {
        let mut registered: Vec<Arc<ModelProfile>> = Vec::with_capacity(profiles.len());
        for profile in profiles {
            if registered.iter().any(|p| p.id == profile.id) {
                return Err(AgentError::DuplicateModel(profile.id));
            }
            registered.push(Arc::new(profile));
        }
        if registered.is_empty() {
            return Err(AgentError::ConfigError("no model profiles configured".to_string()));
        }
        let profile = resolve_in(&registered, active)
            .ok_or_else(|| AgentError::ModelNotFound(active.to_string()))?;
        let client = factory(&profile)?;
        tracing::info!(model = %profile.id, "active model initialized");
        Ok(Self {
            profiles: RwLock::new(registered),
            active: RwLock::new(Arc::new(ActiveModel { profile, client })),
            factory,
        })
    }

    /// 追加注册；id 重复时拒绝
    pub fn register(&self, profile: ModelProfile) -> Result<(), AgentError> {
        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        if profiles.iter().any(|p| p.id == profile.id) {
            return Err(AgentError::DuplicateModel(profile.id));
        }
        profiles.push(Arc::new(profile));
        Ok(())
    }

    /// 当前模型快照
    pub fn active(&self) -> Arc<ActiveModel> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn profiles(&self) -> Vec<Arc<ModelProfile>> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn resolve(&self, identifier: &str) -> Option<Arc<ModelProfile>> {
        let profiles = self.profiles.read().unwrap_or_else(PoisonError::into_inner);
        resolve_in(&profiles, identifier)
    }

    /// 切换当前模型：别名 → id → id 子串（按注册顺序取第一个）
    pub fn switch(&self, identifier: &str) -> Result<Arc<ModelProfile>, AgentError> {
        let profile = self
            .resolve(identifier)
            .ok_or_else(|| AgentError::ModelNotFound(identifier.trim().to_string()))?;
        let client = (self.factory)(&profile)?;
        let next = Arc::new(ActiveModel {
            profile: Arc::clone(&profile),
            client,
        });
        let previous = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *active, next)
        };
        tracing::info!(from = %previous.profile.id, to = %profile.id, "active model switched");
        Ok(profile)
    }
}

fn resolve_in(profiles: &[Arc<ModelProfile>], identifier: &str) -> Option<Arc<ModelProfile>> {
    let needle = identifier.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    profiles
        .iter()
        .find(|p| p.aliases.iter().any(|a| a.trim().to_lowercase() == needle))
        .or_else(|| profiles.iter().find(|p| p.id.to_lowercase() == needle))
        .or_else(|| profiles.iter().find(|p| p.id.to_lowercase().contains(&needle)))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn factory() -> ClientFactory {
        Arc::new(|_: &ModelProfile| {
            Ok::<_, AgentError>(Arc::new(MockLlmClient::new()) as Arc<dyn LlmClient>)
        })
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new(
            vec![
                ModelProfile::mock("deepseek").with_alias("ds"),
                ModelProfile::mock("gemini-pro").with_alias("pro").with_vision(true),
                ModelProfile::mock("gemini-flash").with_alias("flash").with_vision(true),
            ],
            "deepseek",
            factory(),
        )
        .unwrap()
    }

    #[test]
    fn test_switch_by_alias() {
        let reg = registry();
        let profile = reg.switch("flash").unwrap();
        assert_eq!(profile.id, "gemini-flash");
        assert_eq!(reg.active().profile.id, "gemini-flash");
    }

    #[test]
    fn test_switch_by_id_case_insensitive() {
        let reg = registry();
        assert_eq!(reg.switch("  Gemini-Pro ").unwrap().id, "gemini-pro");
    }

    #[test]
    fn test_substring_takes_first_registered() {
        let reg = registry();
        assert_eq!(reg.switch("gemini").unwrap().id, "gemini-pro");
        assert_eq!(reg.switch("seek").unwrap().id, "deepseek");
    }

    #[test]
    fn test_alias_beats_substring() {
        let reg = registry();
        reg.register(ModelProfile::mock("propel")).unwrap();
        assert_eq!(reg.switch("pro").unwrap().id, "gemini-pro");
    }

    #[test]
    fn test_unknown_model_keeps_active() {
        let reg = registry();
        let err = reg.switch("gpt-9").unwrap_err();
        assert!(matches!(err, AgentError::ModelNotFound(ref m) if m == "gpt-9"));
        assert!(reg.switch("").is_err());
        assert_eq!(reg.active().profile.id, "deepseek");
    }

    #[test]
    fn test_snapshot_survives_switch() {
        let reg = registry();
        let snapshot = reg.active();
        reg.switch("flash").unwrap();
        assert_eq!(snapshot.profile.id, "deepseek");
        assert!(!snapshot.profile.vision);
        assert_eq!(reg.active().profile.id, "gemini-flash");
    }

    #[test]
    fn test_duplicate_profiles_rejected() {
        let reg = registry();
        assert!(matches!(
            reg.register(ModelProfile::mock("deepseek")),
            Err(AgentError::DuplicateModel(_))
        ));
        let err = ModelRegistry::new(
            vec![ModelProfile::mock("a"), ModelProfile::mock("a")],
            "a",
            factory(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_registered_profile_is_switchable() {
        let reg = registry();
        reg.register(ModelProfile::mock("qwen-max").with_alias("qwen")).unwrap();
        assert_eq!(reg.switch("qwen").unwrap().id, "qwen-max");
        assert_eq!(reg.profiles().len(), 4);
    }
}
