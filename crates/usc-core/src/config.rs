//! Matcher configuration
//!
//! Options mirror what the target browser accepts in `@match` metadata.
//! The defaults follow Chrome with strict path matching.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Browser whose match-pattern rules the matcher follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Chrome,
    Firefox,
}

impl Preset {
    /// Options for this browser, strict path matching enabled.
    pub fn options(self) -> MatchOptions {
        match self {
            Self::Chrome => MatchOptions {
                supported_schemes: ["http", "https", "file", "ftp"].map(String::from).to_vec(),
                scheme_star_matches_ws: false,
                strict: true,
            },
            Self::Firefox => MatchOptions {
                supported_schemes: ["http", "https", "ws", "wss", "ftp", "file"].map(String::from).to_vec(),
                scheme_star_matches_ws: true,
                strict: true,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chrome" => Ok(Self::Chrome),
            "firefox" => Ok(Self::Firefox),
            other => Err(format!("Unknown preset '{}' (expected chrome or firefox)", other)),
        }
    }
}

/// Options controlling how patterns are compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchOptions {
    /// Schemes a literal pattern scheme may name; `<all_urls>` matches exactly these.
    pub supported_schemes: Vec<String>,
    /// Whether the `*` scheme also matches `ws` and `wss`.
    pub scheme_star_matches_ws: bool,
    /// Strict mode honors the pattern's path; loose mode matches any path.
    pub strict: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Preset::Chrome.options()
    }
}

impl MatchOptions {
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn supports_scheme(&self, scheme: &str) -> bool {
        self.supported_schemes.iter().any(|s| s == scheme)
    }
}

impl From<Preset> for MatchOptions {
    fn from(preset: Preset) -> Self {
        preset.options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_strict_chrome() {
        let options = MatchOptions::default();
        assert!(options.strict);
        assert!(!options.scheme_star_matches_ws);
        assert!(options.supports_scheme("ftp"));
        assert!(!options.supports_scheme("ws"));
    }

    #[test]
    fn test_firefox_preset() {
        let options = Preset::Firefox.options();
        assert!(options.scheme_star_matches_ws);
        assert!(options.supports_scheme("wss"));
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("Firefox".parse::<Preset>(), Ok(Preset::Firefox));
        assert!("safari".parse::<Preset>().is_err());
    }

    #[test]
    fn test_partial_json_options() {
        let options: MatchOptions = serde_json::from_str(r#"{"strict": false}"#).unwrap();
        assert!(!options.strict);
        assert_eq!(options.supported_schemes, MatchOptions::default().supported_schemes);
    }
}
