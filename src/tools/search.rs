//! search_web 工具：联网搜索与网页抓取
//!
//! 只有具备 search 能力的模型才会被声明此工具。给出 url 时抓取该页面（仅限白名单域名），
//! 否则请求配置的搜索端点；HTML 用 html2text 提取可读文本，超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::config::SearchSection;
use crate::core::ToolError;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolContext, ToolResult};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchArgs {
    /// 搜索关键词
    query: String,
    /// 需要直接查看的网页地址，可选
    #[serde(default)]
    url: Option<String>,
}

/// 联网搜索工具
pub struct SearchWebTool {
    client: Client,
    endpoint: String,
    query_param: String,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!") || head.starts_with("<html") || head.contains("<head") || head.contains("<body")
}

/// 从 URL 中取出 host（小写，不含端口）
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split(':').next()?;
    (!host.is_empty()).then(|| host.to_lowercase())
}

fn truncate(body: String, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

impl SearchWebTool {
    pub fn new(cfg: &SearchSection) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: cfg.endpoint.clone(),
            query_param: cfg.query_param.clone(),
            allowed_domains: cfg.allowed_domains.iter().map(|d| d.to_lowercase()).collect(),
            max_result_chars: cfg.max_result_chars,
        }
    }

    fn check_allowed(&self, url: &str) -> Result<(), ToolError> {
        let domain = extract_domain(url)
            .ok_or_else(|| ToolError::InvalidArguments(format!("invalid url: {url}")))?;
        if self.allowed_domains.contains(&domain) {
            Ok(())
        } else {
            Err(ToolError::NotAuthorized(format!("域名不在白名单内：{domain}")))
        }
    }

    fn readable(&self, mut body: String) -> String {
        if body.starts_with('\u{FEFF}') {
            body = body.trim_start_matches('\u{FEFF}').to_string();
        }
        let text = if looks_like_html(&body) {
            match from_read(body.as_bytes(), 120) {
                Ok(text) if !text.trim().is_empty() => text,
                _ => strip_html_tags(&body),
            }
        } else {
            body
        };
        truncate(text, self.max_result_chars)
    }

    async fn get_text(&self, request: reqwest::RequestBuilder) -> Result<String, ToolError> {
        let resp = request
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ToolError::Execution(format!("HTTP {}", resp.status())));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::Execution(format!("read body: {e}")))?;
        Ok(self.readable(body))
    }
}

#[async_trait]
impl Tool for SearchWebTool {
    fn name(&self) -> &str {
        "search_web"
    }

    fn category(&self) -> &str {
        "搜索工具"
    }

    fn description(&self) -> &str {
        "联网搜索最新信息（新闻、天气、百科等）。提供 query；若已知具体网页，可同时提供 url 直接查看。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<SearchArgs>()
    }

    fn requires_search(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: SearchArgs = parse_args(args)?;
        let query = args.query.trim();
        let url = args.url.as_deref().map(str::trim).filter(|u| !u.is_empty());

        let content = match url {
            Some(url) => {
                self.check_allowed(url)?;
                tracing::info!(url = %url, "search_web fetch");
                self.get_text(self.client.get(url)).await?
            }
            None => {
                if query.is_empty() {
                    return Err(ToolError::InvalidArguments("query 不能为空".to_string()));
                }
                tracing::info!(query = %query, "search_web query");
                let request = self
                    .client
                    .get(&self.endpoint)
                    .query(&[(self.query_param.as_str(), query)]);
                self.get_text(request).await?
            }
        };
        Ok(ToolResult::ok(format!("搜索完成：{query}")).with("content", content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(max_chars: usize) -> SearchWebTool {
        let cfg = SearchSection {
            max_result_chars: max_chars,
            allowed_domains: vec!["zh.Wikipedia.org".into()],
            ..SearchSection::default()
        };
        SearchWebTool::new(&cfg)
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://zh.wikipedia.org/wiki/Rust").as_deref(), Some("zh.wikipedia.org"));
        assert_eq!(extract_domain("http://Example.com:8080?q=1").as_deref(), Some("example.com"));
        assert_eq!(extract_domain("ftp://example.com"), None);
    }

    #[test]
    fn test_allowlist() {
        let t = tool(100);
        assert!(t.check_allowed("https://zh.wikipedia.org/wiki/Rust").is_ok());
        assert!(matches!(
            t.check_allowed("https://evil.example.com/"),
            Err(ToolError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_readable_strips_html_and_truncates() {
        let t = tool(10);
        let text = t.readable("<html><body><p>今天天气晴朗，气温二十五度</p></body></html>".to_string());
        assert!(!text.contains("<p>"));
        assert!(text.ends_with("...[truncated]"));
        assert_eq!(t.readable("plain".to_string()), "plain");
    }

    #[test]
    fn test_strip_html_tags_fallback() {
        assert_eq!(strip_html_tags("<b>a</b>  <i>b</i>"), "a b");
    }

    #[tokio::test]
    async fn test_disallowed_url_is_rejected_before_request() {
        let err = tool(100)
            .execute(&ToolContext::new("u"), serde_json::json!({"query": "x", "url": "https://evil.example.com"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotAuthorized(_)));
    }
}
