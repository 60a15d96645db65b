use url::Url;

/// Derive the per-host key used by the rate limiter and the site directory.
///
/// Lowercases the host and drops a leading `www.` so that
/// `https://WWW.Example.com/a` and `http://example.com/b` share a bucket.
pub fn host_key(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

/// Returns true if `host` is `domain` or one of its subdomains.
pub fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches("www.");
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Collapse runs of spaces and tabs, trim every line and drop blank-line runs.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = 0;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_key_strips_www_and_case() {
        assert_eq!(
            host_key("https://WWW.Example.com/a?b=1").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            host_key("http://blog.example.com:8080/").as_deref(),
            Some("blog.example.com")
        );
    }

    #[test]
    fn host_key_returns_none_for_invalid_url() {
        assert!(host_key("not a url").is_none());
        assert!(host_key("mailto:someone@example.com").is_none());
    }

    #[test]
    fn host_matches_subdomains_only_on_label_boundary() {
        assert!(host_matches("example.com", "example.com"));
        assert!(host_matches("news.example.com", "example.com"));
        assert!(host_matches("example.com", "www.example.com"));
        assert!(!host_matches("badexample.com", "example.com"));
    }

    #[test]
    fn normalize_whitespace_keeps_paragraph_breaks() {
        let text = "  One   two \n\tthree\n\n\n  four  ";
        assert_eq!(normalize_whitespace(text), "One two\nthree\n\nfour");
    }
}
