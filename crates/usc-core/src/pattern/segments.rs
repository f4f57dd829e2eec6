//! Pattern decomposition into scheme, host and path-and-query.

/// The sentinel pattern matching every URL with a supported scheme.
pub const ALL_URLS: &str = "<all_urls>";

/// A pattern split along `scheme://host/path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSegments {
    pub pattern: String,
    /// `*` or a scheme token.
    pub scheme: String,
    /// `*`, `*.suffix`, a literal host, or empty for `file` URLs.
    pub raw_host: String,
    /// Always starts with `/`.
    pub raw_path_and_query: String,
}

impl PatternSegments {
    /// Split a pattern, `None` if it does not follow the grammar.
    ///
    /// Grammar: `(\*|\w+)://(\*|[^/#]*)(/[^\r\n#]*)`, anchored on both ends.
    pub fn parse(pattern: &str) -> Option<Self> {
        if pattern == ALL_URLS {
            return Some(Self {
                pattern: pattern.to_string(),
                scheme: "*".to_string(),
                raw_host: "*".to_string(),
                raw_path_and_query: "/*".to_string(),
            });
        }

        let (scheme, rest) = pattern.split_once("://")?;
        let scheme_ok = scheme == "*"
            || (!scheme.is_empty() && scheme.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
        if !scheme_ok {
            return None;
        }

        let path_start = rest.find('/')?;
        let (host, path) = rest.split_at(path_start);
        if host.contains('#') || path.contains(['\r', '\n', '#']) {
            return None;
        }

        Some(Self {
            pattern: pattern.to_string(),
            scheme: scheme.to_string(),
            raw_host: host.to_string(),
            raw_path_and_query: path.to_string(),
        })
    }
}
