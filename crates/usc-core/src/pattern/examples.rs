//! Dummy URL construction and example URL generation.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use super::segments::PatternSegments;
use crate::config::MatchOptions;
use crate::static_regex;

const SUBDOMAINS: [&str; 3] = ["", "www", "foo.bar"];
const ROOT_DOMAINS: [&str; 1] = ["example.com"];
const PATH_AND_QUERY_REPLACERS: [&str; 3] = ["", "foo", "/bar/baz/"];

static DASHES_BEFORE_DELIM: OnceLock<Option<Regex>> = OnceLock::new();
static DASHES_AFTER_DELIM: OnceLock<Option<Regex>> = OnceLock::new();
static REPEATED_SLASHES: OnceLock<Option<Regex>> = OnceLock::new();

/// Substitutions used to turn a pattern into a concrete URL.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Replacements<'a> {
    pub default_scheme: &'a str,
    pub subdomain: &'a str,
    pub path_and_query_replacer: &'a str,
    pub root_domain: &'a str,
    pub strict: bool,
}

impl Default for Replacements<'_> {
    fn default() -> Self {
        Self {
            default_scheme: "https",
            subdomain: "",
            path_and_query_replacer: "",
            root_domain: "example.com",
            strict: true,
        }
    }
}

/// Build a URL the pattern would plausibly match, `None` if it does not parse.
pub(crate) fn dummy_url(segments: &PatternSegments, replacements: &Replacements<'_>) -> Option<Url> {
    let scheme = if segments.scheme == "*" {
        replacements.default_scheme
    } else {
        segments.scheme.as_str()
    };

    let host = if scheme == "file" {
        String::new()
    } else if segments.raw_host == "*" {
        [replacements.subdomain, replacements.root_domain]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(".")
    } else {
        replace_leading_wildcard(&segments.raw_host, replacements.subdomain)
    };

    let template = if replacements.strict {
        segments.raw_path_and_query.as_str()
    } else {
        "/*"
    };
    let path_and_query = fill_path_template(template, replacements.path_and_query_replacer);

    Url::parse(&format!("{}://{}{}", scheme, host, path_and_query)).ok()
}

/// Replaces a leading `*` and the character after it.
fn replace_leading_wildcard(raw_host: &str, subdomain: &str) -> String {
    let mut chars = raw_host.chars();
    if chars.next() != Some('*') || chars.next().is_none() {
        return raw_host.to_string();
    }
    let rest = chars.as_str();
    if subdomain.is_empty() {
        rest.to_string()
    } else {
        format!("{}.{}", subdomain, rest)
    }
}

fn fill_path_template(template: &str, replacer: &str) -> String {
    let mut path = template.replace('*', &format!("-{}-", replacer));

    if let Some(re) = static_regex(&DASHES_BEFORE_DELIM, r"-+(^|$|[/?=&\-])") {
        path = re.replace_all(&path, "$1").into_owned();
    }
    if let Some(re) = static_regex(&DASHES_AFTER_DELIM, r"(^|$|[/?=&\-])-+") {
        path = re.replace_all(&path, "$1").into_owned();
    }
    if let Some(re) = static_regex(&REPEATED_SLASHES, r"/+") {
        path = re.replace_all(&path, "/").into_owned();
    }

    path
}

/// Candidate example URLs, deduplicated in generation order.
///
/// The caller filters these through the compiled matcher.
pub(crate) fn candidate_urls(segments: &PatternSegments, options: &MatchOptions) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for default_scheme in &options.supported_schemes {
        for subdomain in SUBDOMAINS {
            for root_domain in ROOT_DOMAINS {
                for replacer in PATH_AND_QUERY_REPLACERS {
                    let replacements = Replacements {
                        default_scheme,
                        subdomain,
                        path_and_query_replacer: replacer,
                        root_domain,
                        strict: options.strict,
                    };
                    if let Some(url) = dummy_url(segments, &replacements) {
                        let href = url.to_string();
                        if seen.insert(href.clone()) {
                            urls.push(href);
                        }
                    }
                }
            }
        }
    }

    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(pattern: &str) -> PatternSegments {
        PatternSegments::parse(pattern).unwrap()
    }

    #[test]
    fn test_fill_path_template() {
        assert_eq!(fill_path_template("/*", ""), "/");
        assert_eq!(fill_path_template("/*", "foo"), "/foo");
        assert_eq!(fill_path_template("/*", "/bar/baz/"), "/bar/baz/");
        assert_eq!(fill_path_template("/a/*/b?c=*", "foo"), "/a/foo/b?c=foo");
        assert_eq!(fill_path_template("/file-*.js", "foo"), "/file-foo-.js");
    }

    #[test]
    fn test_dummy_url_subdomain() {
        let s = segments("https://*.example.com/*");
        let plain = dummy_url(&s, &Replacements::default()).unwrap();
        assert_eq!(plain.as_str(), "https://example.com/");

        let www = Replacements { subdomain: "www", ..Replacements::default() };
        assert_eq!(dummy_url(&s, &www).unwrap().as_str(), "https://www.example.com/");
    }

    #[test]
    fn test_dummy_url_star_host_and_scheme() {
        let s = segments("*://*/*");
        let r = Replacements { default_scheme: "http", subdomain: "foo.bar", ..Replacements::default() };
        assert_eq!(dummy_url(&s, &r).unwrap().as_str(), "http://foo.bar.example.com/");
    }

    #[test]
    fn test_dummy_url_file() {
        let s = segments("file:///home/*");
        let r = Replacements { path_and_query_replacer: "foo", ..Replacements::default() };
        assert_eq!(dummy_url(&s, &r).unwrap().as_str(), "file:///home/foo");
    }

    #[test]
    fn test_candidate_urls_are_unique() {
        let urls = candidate_urls(&segments("https://example.com/"), &MatchOptions::default());
        assert_eq!(urls, vec!["https://example.com/".to_string()]);
    }
}
