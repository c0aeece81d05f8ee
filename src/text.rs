//! 回复文本清理：微信消息不渲染 Markdown，去掉常见标记，保留文字

use std::sync::OnceLock;

use regex::Regex;

static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();

fn rules() -> &'static [(Regex, &'static str)] {
    RULES.get_or_init(|| {
        [
            (r"\*\*([^*]+)\*\*", "$1"),
            (r"__([^_]+)__", "$1"),
            // 斜体：星号/下划线不在行首
            (r"(^|[^\n])\*([^*\n]+)\*", "${1}${2}"),
            (r"(^|[^\n])_([^_\n]+)_", "${1}${2}"),
            (r"`([^`]+)`", "$1"),
            (r"(?m)^#{1,6}\s+", ""),
            (r"~~([^~]+)~~", "$1"),
            (r"\n{3,}", "\n\n"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// 去除加粗、斜体、行内代码、标题、删除线标记，并把 3 个以上连续换行压成 2 个
pub fn clean_markdown(text: &str) -> String {
    let mut out = text.to_string();
    for (re, replacement) in rules() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bold_and_italic() {
        assert_eq!(clean_markdown("**重要**：明天*开会*"), "重要：明天开会");
        assert_eq!(clean_markdown("__注意__ _这里_"), "注意 这里");
    }

    #[test]
    fn test_code_heading_strike() {
        assert_eq!(clean_markdown("# 今日规划\n运行 `cargo`"), "今日规划\n运行 cargo");
        assert_eq!(clean_markdown("### 小标题"), "小标题");
        assert_eq!(clean_markdown("~~取消~~了"), "取消了");
    }

    #[test]
    fn test_collapses_blank_lines_and_trims() {
        assert_eq!(clean_markdown("\n第一段\n\n\n\n第二段\n"), "第一段\n\n第二段");
    }

    #[test]
    fn test_line_leading_star_is_kept() {
        assert_eq!(clean_markdown("清单：\n* 买菜"), "清单：\n* 买菜");
        assert_eq!(clean_markdown("没有标记的文本"), "没有标记的文本");
    }
}
