/// Extract the host portion of a URL, for log lines.
pub fn host_of(url: &str) -> anyhow::Result<String> {
    url::Url::parse(url)?
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("URL has no host"))
}

/// Shorten a string for logging, appending an ellipsis when truncated.
/// Cuts on a char boundary so multi-byte input cannot panic.
pub fn abbreviate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://example.com/path").unwrap(), "example.com");
        assert_eq!(
            host_of("http://sub.example.com:8080/x?q=1").unwrap(),
            "sub.example.com"
        );
        assert!(host_of("not a url").is_err());
    }

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate("short", 10), "short");
        assert_eq!(abbreviate("0123456789abc", 10), "0123456789...");
        assert_eq!(abbreviate("日本語テキスト", 3), "日本語...");
    }
}
