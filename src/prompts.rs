//! 提示词模板
//!
//! 模板来自 TOML 文件（键 → 文本），`{name}` 占位符在使用时填充；文件缺失或解析失败时回退到内置默认模板。

use std::collections::HashMap;
use std::path::Path;

use chrono::{Datelike, NaiveDateTime};

const EMBEDDED: &str = include_str!("../config/prompts.toml");

const WEEKDAYS: [&str; 7] = ["星期一", "星期二", "星期三", "星期四", "星期五", "星期六", "星期日"];

/// 提示词集合
#[derive(Debug, Clone, Default)]
pub struct PromptBook {
    templates: HashMap<String, String>,
}

impl PromptBook {
    /// 内置默认模板
    pub fn embedded() -> Self {
        Self {
            templates: parse(EMBEDDED).unwrap_or_default(),
        }
    }

    /// 以内置模板为底，用文件中的同名键覆盖
    pub fn load(path: Option<&Path>) -> Self {
        let mut book = Self::embedded();
        let Some(path) = path else {
            return book;
        };
        match std::fs::read_to_string(path) {
            Ok(text) => match parse(&text) {
                Ok(templates) => {
                    tracing::info!(path = %path.display(), count = templates.len(), "prompts loaded");
                    book.templates.extend(templates);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "invalid prompts file, using defaults"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "prompts file unreadable, using defaults"),
        }
        book
    }

    pub fn from_templates(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.templates.get(key).map(String::as_str)
    }

    /// 填充模板；键不存在时返回 None，未提供的占位符原样保留
    pub fn render(&self, key: &str, vars: &[(&str, String)]) -> Option<String> {
        let template = self.get(key)?;
        let mut out = template.trim().to_string();
        for (name, value) in vars {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        Some(out)
    }

    pub fn system_prompt(&self, now: NaiveDateTime) -> String {
        self.render("system_prompt", &time_vars(now)).unwrap_or_default()
    }

    /// 图片问答使用的系统提示词；未配置时退回 system_prompt
    pub fn image_system_prompt(&self, now: NaiveDateTime) -> String {
        self.render("image_system_prompt", &time_vars(now))
            .unwrap_or_else(|| self.system_prompt(now))
    }

    pub fn daily_planning_prompt(&self, yesterday_summary: &str, today_tasks: &str) -> Option<String> {
        self.render(
            "daily_planning_prompt",
            &[
                ("yesterday_summary", yesterday_summary.to_string()),
                ("today_tasks", today_tasks.to_string()),
            ],
        )
    }
}

fn parse(text: &str) -> Result<HashMap<String, String>, toml::de::Error> {
    toml::from_str(text)
}

/// 中文星期名
pub(crate) fn weekday_cn(date: impl Datelike) -> &'static str {
    WEEKDAYS[date.weekday().num_days_from_monday() as usize]
}

fn time_vars(now: NaiveDateTime) -> Vec<(&'static str, String)> {
    let weekday = weekday_cn(now);
    vec![
        ("current_time", now.format("%Y年%m月%d日 %H:%M:%S").to_string()),
        ("current_date", now.format("%Y年%m月%d日").to_string()),
        ("current_weekday", weekday.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::parse_due_date;

    #[test]
    fn test_embedded_defaults_present() {
        let book = PromptBook::embedded();
        assert!(book.get("system_prompt").is_some());
        assert!(book.get("image_system_prompt").is_some());
        assert!(book.get("daily_planning_prompt").is_some());
    }

    #[test]
    fn test_system_prompt_fills_time() {
        let now = parse_due_date("2024-03-04 09:05:00").unwrap();
        let prompt = PromptBook::embedded().system_prompt(now);
        assert!(prompt.contains("2024年03月04日 09:05:00"));
        assert!(prompt.contains("星期一"));
        assert!(!prompt.contains("{current_date}"));
    }

    #[test]
    fn test_render_keeps_unknown_placeholders() {
        let mut templates = HashMap::new();
        templates.insert("greet".to_string(), "你好 {name}，{other}".to_string());
        let book = PromptBook::from_templates(templates);
        assert_eq!(
            book.render("greet", &[("name", "小明".to_string())]).as_deref(),
            Some("你好 小明，{other}")
        );
        assert!(book.render("missing", &[]).is_none());
    }

    #[test]
    fn test_file_overrides_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.toml");
        std::fs::write(&path, "system_prompt = \"自定义 {current_date}\"\n").unwrap();
        let book = PromptBook::load(Some(&path));
        let now = parse_due_date("2024-03-04").unwrap();
        assert_eq!(book.system_prompt(now), "自定义 2024年03月04日");
        assert!(book.get("daily_planning_prompt").is_some());

        let fallback = PromptBook::load(Some(&dir.path().join("missing.toml")));
        assert!(fallback.get("system_prompt").is_some());
    }
}
