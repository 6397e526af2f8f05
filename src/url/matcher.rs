/// Checks whether a host matches a host pattern
///
/// `"example.com"` matches only that host. `"*.example.com"` matches the bare
/// domain and any subdomain at any depth. Comparison is ASCII
/// case-insensitive.
///
/// ```
/// use driftnet::url::host_matches;
///
/// assert!(host_matches("*.example.com", "example.com"));
/// assert!(host_matches("*.example.com", "api.v2.Example.com"));
/// assert!(!host_matches("*.example.com", "notexample.com"));
/// ```
pub fn host_matches(pattern: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(base) => {
            host == base
                || (host.len() > base.len()
                    && host.ends_with(base)
                    && host.as_bytes()[host.len() - base.len() - 1] == b'.')
        }
        None => host == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern() {
        assert!(host_matches("example.com", "example.com"));
        assert!(host_matches("Example.COM", "example.com"));
        assert!(!host_matches("example.com", "blog.example.com"));
        assert!(!host_matches("blog.example.com", "example.com"));
    }

    #[test]
    fn test_wildcard_pattern() {
        assert!(host_matches("*.example.com", "example.com"));
        assert!(host_matches("*.example.com", "blog.example.com"));
        assert!(host_matches("*.example.com", "a.b.c.example.com"));
    }

    #[test]
    fn test_wildcard_requires_label_boundary() {
        assert!(!host_matches("*.example.com", "badexample.com"));
        assert!(!host_matches("*.example.com", "example.com.evil.org"));
        assert!(!host_matches("*.example.com", "example.org"));
    }
}
