//! Match Pattern Engine
//!
//! Compiles browser-extension match patterns into URL predicates.
//!
//! ```text
//! <all_urls>
//! <scheme>://<host><path-and-query>
//!   scheme := "*" | literal
//!   host   := "*" | "*." suffix | literal | "" (file only)
//! ```

mod examples;
mod host;
mod segments;

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::config::MatchOptions;
use crate::normalize::normalize_url_fragment;
use crate::regex_builder::{build_pattern, Part};

pub use segments::{PatternSegments, ALL_URLS};

/// Upper bound on generated example URLs.
pub const MAX_EXAMPLES: usize = 100;

/// Schemes that are recognized but cannot be expressed as match patterns.
const UNSUPPORTED_SCHEMES: [&str; 2] = ["urn", "data"];

/// Error type for pattern validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatternError {
    #[error("Match patterns do not support scheme \"{0}\"")]
    UnsupportedScheme(String),
    #[error("Pattern cannot contain a hash: \"{pattern}\" contains hash \"{hash}\"")]
    ContainsHash { pattern: String, hash: String },
    #[error("Pattern \"{0}\" does not contain a path. Use \"{0}/*\" to match any paths with that origin or \"{0}/\" to match that URL alone")]
    MissingPath(String),
    #[error("Pattern \"{0}\" is invalid")]
    InvalidPattern(String),
    #[error("Scheme \"{0}\" is not supported")]
    SchemeNotSupported(String),
    #[error("Host is optional only if the scheme is \"file\"")]
    MissingHost,
    #[error("Host \"{0}\" can contain only one wildcard at the start, in the form \"*.<host segments>\"")]
    WildcardPlacement(String),
    #[error("Pattern \"{0}\" cannot be used to construct a valid URL")]
    UnconstructableUrl(String),
    #[error("Host \"{0}\" cannot include a port number. All ports are matched by default")]
    PortNotAllowed(String),
    #[error("Host \"{0}\" contains invalid characters")]
    InvalidHostCharacters(String),
    #[error("Path \"{0}\" contains a malformed percent-encoding")]
    MalformedEncoding(String),
    #[error("Failed to build matcher: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Clone)]
enum Predicate {
    AllUrls {
        schemes: Vec<String>,
    },
    Pattern {
        scheme: Regex,
        host: Regex,
        path_and_query: Regex,
    },
}

/// One compiled pattern.
#[derive(Debug, Clone)]
struct PatternMatcher {
    segments: PatternSegments,
    predicate: Predicate,
}

impl PatternMatcher {
    fn compile(pattern: &str, options: &MatchOptions) -> Result<Self, PatternError> {
        if pattern == ALL_URLS {
            return Ok(Self {
                segments: PatternSegments::parse(ALL_URLS).ok_or_else(|| PatternError::InvalidPattern(pattern.to_string()))?,
                predicate: Predicate::AllUrls {
                    schemes: options.supported_schemes.clone(),
                },
            });
        }

        if let Some((scheme, _)) = pattern.split_once(':') {
            if UNSUPPORTED_SCHEMES.contains(&scheme) {
                return Err(PatternError::UnsupportedScheme(scheme.to_string()));
            }
        }

        let segments = PatternSegments::parse(pattern).ok_or_else(|| diagnose_unparsed(pattern))?;

        if segments.scheme != "*" && !options.supports_scheme(&segments.scheme) {
            return Err(PatternError::SchemeNotSupported(segments.scheme.clone()));
        }

        let scheme_source = if segments.scheme == "*" {
            let mut schemes = vec![Part::raw("https?")];
            if options.scheme_star_matches_ws {
                schemes.push(Part::raw("wss?"));
            }
            build_pattern(&[Part::raw("^"), Part::Alternation(schemes), Part::raw(":$")])
        } else {
            build_pattern(&[Part::raw("^"), Part::literal(segments.scheme.as_str()), Part::raw(":$")])
        };
        let scheme = Regex::new(&scheme_source)?;

        let host = host::host_regex(&segments)?;

        // Loose mode ignores the written path entirely.
        let template = if options.strict {
            normalize_url_fragment(&segments.raw_path_and_query)
                .map_err(|_| PatternError::MalformedEncoding(segments.raw_path_and_query.clone()))?
        } else {
            "/*".to_string()
        };

        let mut parts = vec![Part::raw("^")];
        for (i, literal) in template.split('*').enumerate() {
            if i > 0 {
                parts.push(Part::raw(".*"));
            }
            parts.push(Part::literal(literal));
        }
        parts.push(Part::raw("$"));
        let path_and_query = Regex::new(&build_pattern(&parts))?;

        Ok(Self {
            segments,
            predicate: Predicate::Pattern {
                scheme,
                host,
                path_and_query,
            },
        })
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(normalized) = normalize_for_match(url) else {
            return false;
        };

        match &self.predicate {
            Predicate::AllUrls { schemes } => schemes.iter().any(|s| s == normalized.scheme()),
            Predicate::Pattern {
                scheme,
                host,
                path_and_query,
            } => {
                scheme.is_match(&format!("{}:", normalized.scheme()))
                    && host.is_match(normalized.host_str().unwrap_or(""))
                    && path_and_query.is_match(&path_and_query_of(&normalized))
            }
        }
    }

    fn examples(&self, options: &MatchOptions) -> Vec<String> {
        examples::candidate_urls(&self.segments, options)
            .into_iter()
            .filter(|href| Url::parse(href).is_ok_and(|url| self.matches(&url)))
            .take(MAX_EXAMPLES)
            .collect()
    }
}

/// Explain why a pattern failed the grammar.
fn diagnose_unparsed(pattern: &str) -> PatternError {
    if let Ok(url) = Url::parse(pattern) {
        if let Some(fragment) = url.fragment() {
            return PatternError::ContainsHash {
                pattern: pattern.to_string(),
                hash: format!("#{}", fragment),
            };
        }

        let origin = url.origin();
        if origin.is_tuple() {
            let serialized = origin.ascii_serialization();
            let after_origin = pattern.get(serialized.len()..).unwrap_or("");
            if !after_origin.starts_with('/') {
                return PatternError::MissingPath(pattern.to_string());
            }
        }
    }

    PatternError::InvalidPattern(pattern.to_string())
}

/// Re-encode pathname and query so equivalent encodings compare equal.
fn normalize_for_match(url: &Url) -> Option<Url> {
    let pathname = normalize_url_fragment(url.path()).ok()?;
    let search = match url.query() {
        Some(query) if !query.is_empty() => Some(normalize_url_fragment(&format!("?{}", query)).ok()?),
        _ => None,
    };

    let mut normalized = url.clone();
    normalized.set_path(&pathname);
    if let Some(search) = search {
        normalized.set_query(Some(search.strip_prefix('?').unwrap_or(&search)));
    }
    Some(normalized)
}

/// Pathname plus search, keeping a bare trailing `?`.
fn path_and_query_of(url: &Url) -> String {
    match url.query() {
        Some("") if url.fragment().is_none() => format!("{}?", url.path()),
        Some("") | None => url.path().to_string(),
        Some(query) => format!("{}?{}", url.path(), query),
    }
}

/// A predicate compiled from one or more match patterns.
///
/// Invalid patterns produce an invalid matcher rather than an error; it
/// matches nothing and [`CompiledMatcher::assert_valid`] surfaces the error.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    patterns: Vec<String>,
    options: MatchOptions,
    compiled: Result<Vec<PatternMatcher>, PatternError>,
    examples: OnceLock<Vec<String>>,
}

impl CompiledMatcher {
    pub fn is_valid(&self) -> bool {
        self.compiled.is_ok()
    }

    pub fn error(&self) -> Option<&PatternError> {
        self.compiled.as_ref().err()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    /// Return the matcher if valid, the stored error otherwise.
    pub fn assert_valid(self) -> Result<Self, PatternError> {
        match &self.compiled {
            Ok(_) => Ok(self),
            Err(e) => Err(e.clone()),
        }
    }

    /// Test a URL string. Unparseable URLs never match.
    pub fn matches(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(url) => self.matches_url(&url),
            Err(_) => false,
        }
    }

    pub fn matches_url(&self, url: &Url) -> bool {
        match &self.compiled {
            Ok(matchers) => matchers.iter().any(|m| m.matches(url)),
            Err(_) => false,
        }
    }

    /// Concrete URLs accepted by this matcher, at most [`MAX_EXAMPLES`].
    ///
    /// Generated on first call and cached. Empty for invalid matchers.
    pub fn examples(&self) -> &[String] {
        self.examples.get_or_init(|| {
            let Ok(matchers) = &self.compiled else {
                return Vec::new();
            };

            let mut seen = HashSet::new();
            matchers
                .iter()
                .flat_map(|m| m.examples(&self.options))
                .filter(|href| seen.insert(href.clone()))
                .take(MAX_EXAMPLES)
                .collect()
        })
    }
}

/// Compile a single pattern.
pub fn match_pattern(pattern: &str, options: MatchOptions) -> CompiledMatcher {
    match_patterns([pattern], options)
}

/// Compile a set of patterns into one OR-ed matcher.
///
/// Duplicate patterns are dropped, keeping first occurrence order. The set is
/// invalid if any member is, carrying the first member error.
pub fn match_patterns<I, S>(patterns: I, options: MatchOptions) -> CompiledMatcher
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let patterns: Vec<String> = patterns
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .filter(|p| seen.insert(p.clone()))
        .collect();

    let compiled = patterns
        .iter()
        .map(|p| PatternMatcher::compile(p, &options))
        .collect::<Result<Vec<_>, _>>();

    CompiledMatcher {
        patterns,
        options,
        compiled,
        examples: OnceLock::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;

    fn compile(pattern: &str) -> CompiledMatcher {
        match_pattern(pattern, MatchOptions::default())
    }

    #[test]
    fn test_subdomain_pattern() {
        let m = compile("https://*.example.com/*");
        assert!(m.is_valid());
        assert!(m.matches("https://foo.bar.example.com/x"));
        assert!(m.matches("https://example.com/"));
        assert!(!m.matches("https://example.org/x"));
        assert!(!m.matches("http://example.com/x"));
    }

    #[test]
    fn test_strict_exact_path() {
        let m = compile("https://example.com/path");
        assert!(m.matches("https://example.com/path"));
        assert!(!m.matches("https://example.com/path/more"));
        assert!(!m.matches("https://example.com/path?q=1"));
        assert!(m.matches("https://example.com/path#frag"));
    }

    #[test]
    fn test_trailing_wildcard_prefix() {
        let m = compile("https://example.com/path*");
        assert!(m.matches("https://example.com/path"));
        assert!(m.matches("https://example.com/path-two"));
        assert!(m.matches("https://example.com/path/x?y=z"));
        assert!(!m.matches("https://example.com/other"));
    }

    #[test]
    fn test_query_in_pattern() {
        let m = compile("https://example.com/search?q=*");
        assert!(m.matches("https://example.com/search?q=rust"));
        assert!(!m.matches("https://example.com/search"));
    }

    #[test]
    fn test_bare_question_mark() {
        let m = compile("https://example.com/a?");
        assert!(m.matches("https://example.com/a?"));
        assert!(!m.matches("https://example.com/a"));
    }

    #[test]
    fn test_loose_mode_ignores_path() {
        let m = match_pattern("https://example.com/only", MatchOptions::default().with_strict(false));
        assert!(m.matches("https://example.com/anything/else"));
        assert!(!m.matches("https://other.com/only"));
    }

    #[test]
    fn test_percent_encoding_equivalence() {
        let m = compile("https://example.com/~user/*");
        assert!(m.matches("https://example.com/%7Euser/page"));
        let m = compile("https://example.com/caf%C3%A9");
        assert!(m.matches("https://example.com/café"));
    }

    #[test]
    fn test_malformed_encoding_fails_closed() {
        let m = compile("https://example.com/*");
        assert!(!m.matches("https://example.com/%E0%A4%A"));
        assert!(!m.matches("https://example.com/ok?bad=%ZZ"));
    }

    #[test]
    fn test_malformed_pattern_path() {
        let m = compile("https://example.com/%E0%A4%A");
        assert!(matches!(m.error(), Some(PatternError::MalformedEncoding(_))));
    }

    #[test]
    fn test_scheme_star() {
        let chrome = compile("*://example.com/*");
        assert!(chrome.matches("http://example.com/"));
        assert!(chrome.matches("https://example.com/"));
        assert!(!chrome.matches("wss://example.com/"));

        let firefox = match_pattern("*://example.com/*", Preset::Firefox.options());
        assert!(firefox.matches("wss://example.com/"));
        assert!(firefox.matches("ws://example.com/"));
        assert!(!firefox.matches("ftp://example.com/"));
    }

    #[test]
    fn test_all_urls() {
        let m = compile(ALL_URLS);
        assert!(m.matches("https://example.com/"));
        assert!(m.matches("file:///etc/hosts"));
        assert!(m.matches("ftp://example.com/x"));
        assert!(!m.matches("ws://example.com/"));
        assert!(!m.matches("chrome://settings"));
    }

    #[test]
    fn test_file_pattern() {
        let m = compile("file:///home/*");
        assert!(m.matches("file:///home/user/notes.txt"));
        assert!(!m.matches("file:///etc/passwd"));
    }

    #[test]
    fn test_ports_always_match() {
        let m = compile("https://example.com/*");
        assert!(m.matches("https://example.com:8443/x"));
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(compile("data:text/html,hi").error(), Some(PatternError::UnsupportedScheme(s)) if s == "data"));
        assert!(matches!(compile("urn:isbn:123").error(), Some(PatternError::UnsupportedScheme(_))));
        assert!(matches!(compile("https://example.com/#top").error(), Some(PatternError::ContainsHash { .. })));
        assert!(matches!(compile("https://example.com").error(), Some(PatternError::MissingPath(_))));
        assert!(matches!(compile("not a pattern").error(), Some(PatternError::InvalidPattern(_))));
        assert!(matches!(compile("ws://example.com/*").error(), Some(PatternError::SchemeNotSupported(_))));
        assert!(matches!(compile("https://ex*ample.com/*").error(), Some(PatternError::WildcardPlacement(_))));
    }

    #[test]
    fn test_invalid_never_matches() {
        let m = compile("https://ex*ample.com/*");
        assert!(!m.is_valid());
        assert!(!m.matches("https://example.com/"));
        assert!(m.examples().is_empty());
        assert!(m.assert_valid().is_err());
    }

    #[test]
    fn test_error_message_names_fragment() {
        let err = compile("https://example.com:8080/*").assert_valid().unwrap_err();
        assert!(err.to_string().contains("example.com:8080"));
    }

    #[test]
    fn test_multi_pattern_or() {
        let m = match_patterns(["https://a.com/*", "https://b.com/*", "https://a.com/*"], MatchOptions::default());
        assert!(m.is_valid());
        assert_eq!(m.patterns().len(), 2);
        assert!(m.matches("https://a.com/x"));
        assert!(m.matches("https://b.com/y"));
        assert!(!m.matches("https://c.com/"));
    }

    #[test]
    fn test_multi_pattern_first_error() {
        let m = match_patterns(
            ["https://a.com/*", "https://ex*ample.com/*", "ws://b.com/*"],
            MatchOptions::default(),
        );
        assert!(!m.is_valid());
        assert!(matches!(m.error(), Some(PatternError::WildcardPlacement(_))));
        assert!(!m.matches("https://a.com/x"));
    }

    #[test]
    fn test_examples_self_consistent() {
        let m = compile("https://*.example.com/*");
        let examples = m.examples();
        assert!(!examples.is_empty());
        assert!(examples.contains(&"https://www.example.com/foo".to_string()));
        for url in examples {
            assert!(m.matches(url), "{url}");
        }
    }

    #[test]
    fn test_examples_cap_and_unique() {
        let m = match_patterns((0..20).map(|i| format!("*://*.site{i}.com/*")), MatchOptions::default());
        let examples = m.examples();
        assert_eq!(examples.len(), MAX_EXAMPLES);
        let unique: HashSet<_> = examples.iter().collect();
        assert_eq!(unique.len(), examples.len());
        for url in examples {
            assert!(m.matches(url), "{url}");
        }
    }

    #[test]
    fn test_matching_is_deterministic() {
        let m = compile("https://*.example.com/a*b");
        let url = "https://x.example.com/a-and-b";
        let first = m.matches(url);
        for _ in 0..10 {
            assert_eq!(m.matches(url), first);
        }
        assert!(first);
    }
}
