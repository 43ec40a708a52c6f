//! 下游错误归类：把运行时返回的原始错误文本映射为面向用户的提示
//!
//! 按顺序匹配，先命中者生效；未命中时原样返回（若含 HTML 标签则剥离）。

use std::sync::OnceLock;

use regex::Regex;

pub const DEACTIVATED_MESSAGE: &str = "This agent is currently deactivated, so you can't converse with it. \
Activate the agent with the \"Activate Agent\" command and then start a new session.";

pub const NOT_FOUND_MESSAGE: &str = "The agent could not be found. It may have been deleted, \
or the selected client app may not have access to it. Refresh the agent list and try again.";

pub const FORBIDDEN_MESSAGE: &str = "You don't have permission to use this agent. \
Check that your user and the selected client app are allowed to access it.";

static TAG_RE: OnceLock<Regex> = OnceLock::new();
static SPACE_RE: OnceLock<Regex> = OnceLock::new();

/// 归类原始错误文本
pub fn classify(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if raw.contains("404") && lower.contains("no valid version") {
        return DEACTIVATED_MESSAGE.to_string();
    }
    if raw.contains("404") {
        return NOT_FOUND_MESSAGE.to_string();
    }
    if raw.contains("403") || raw.contains("FORBIDDEN") {
        return FORBIDDEN_MESSAGE.to_string();
    }
    strip_tags(raw)
}

/// 移除尖括号片段并合并空白；不做完整的标记解析
pub fn strip_tags(raw: &str) -> String {
    if !(raw.contains('<') && raw.contains('>')) {
        return raw.to_string();
    }
    let tag_re = TAG_RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());
    let space_re = SPACE_RE.get_or_init(|| Regex::new(r"\s+").unwrap());
    let stripped = tag_re.replace_all(raw, " ");
    space_re.replace_all(&stripped, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deactivated_agent() {
        assert_eq!(
            classify("404 NOT_FOUND No valid version available"),
            DEACTIVATED_MESSAGE
        );
        assert!(DEACTIVATED_MESSAGE.contains("Activate Agent"));
    }

    #[test]
    fn test_not_found() {
        assert_eq!(classify("Request failed with status 404"), NOT_FOUND_MESSAGE);
    }

    #[test]
    fn test_forbidden() {
        assert_eq!(classify("403 you shall not pass"), FORBIDDEN_MESSAGE);
        assert_eq!(classify("FORBIDDEN: missing permission set"), FORBIDDEN_MESSAGE);
    }

    #[test]
    fn test_passthrough() {
        assert_eq!(classify("Compilation failed at line 3"), "Compilation failed at line 3");
    }

    #[test]
    fn test_html_stripped() {
        assert_eq!(
            classify("<html><body><h1>Service   Unavailable</h1>\n<p>try later</p></body></html>"),
            "Service Unavailable try later"
        );
    }
}
