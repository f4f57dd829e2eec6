use usc_core::{match_pattern, match_patterns, MatchOptions, Manifest, PatternError, Preset, ALL_URLS};

#[test]
fn test_public_api_subdomain_matching() {
    let m = match_pattern("https://*.example.com/*", MatchOptions::default());
    assert!(m.is_valid());
    assert!(m.matches("https://foo.bar.example.com/x"));
    assert!(m.matches("https://example.com/"));
    assert!(!m.matches("https://example.org/x"));
}

#[test]
fn test_public_api_validity_is_a_value() {
    let m = match_pattern("https://example.com:8080/*", MatchOptions::default());
    assert!(!m.is_valid());
    assert!(!m.matches("https://example.com:8080/"));
    match m.assert_valid() {
        Err(PatternError::PortNotAllowed(host)) => assert_eq!(host, "example.com:8080"),
        other => panic!("unexpected result: {:?}", other.map(|m| m.patterns().to_vec())),
    }
}

#[test]
fn test_unparseable_urls_never_match() {
    let m = match_pattern(ALL_URLS, MatchOptions::default());
    assert!(!m.matches(""));
    assert!(!m.matches("not a url"));
    assert!(!m.matches("//example.com/"));
}

#[test]
fn test_examples_match_their_matcher() {
    for pattern in [
        "https://example.com/*",
        "*://*/*",
        "https://*.example.com/foo*bar",
        "http://example.com/search?q=*",
        "file:///*",
    ] {
        let m = match_pattern(pattern, Preset::Firefox.options());
        assert!(m.is_valid(), "{pattern}");
        assert!(!m.examples().is_empty(), "{pattern}");
        for url in m.examples() {
            assert!(m.matches(url), "{pattern} -> {url}");
        }
    }
}

#[test]
fn test_options_from_json() {
    let options: MatchOptions =
        serde_json::from_str(r#"{ "supportedSchemes": ["https"], "strict": false }"#).unwrap();
    assert!(!options.strict);
    let m = match_patterns(["http://example.com/*"], options);
    assert!(matches!(m.error(), Some(PatternError::SchemeNotSupported(_))));
}

#[test]
fn test_manifest_selection_end_to_end() {
    let manifest = Manifest::from_json(
        r#"[
            { "displayName": "wiki", "matches": ["https://*.wikipedia.org/*"] },
            { "displayName": "any-example", "includes": ["example\\.(com|org)"] }
        ]"#,
    )
    .unwrap();

    let selected: Vec<_> = manifest
        .select("https://en.wikipedia.org/wiki/Rust", &MatchOptions::default())
        .unwrap()
        .into_iter()
        .filter(|s| s.matched)
        .map(|s| s.display_name)
        .collect();
    assert_eq!(selected, vec!["wiki".to_string()]);
}
