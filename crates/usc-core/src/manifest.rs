//! Userscript manifest and per-page script selection.
//!
//! A manifest lists the bundled scripts in bundle order. Each script targets
//! pages either through match patterns or through `includes` regexes.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::MatchOptions;
use crate::pattern::{match_patterns, PatternError};

/// Error type for manifest handling.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Invalid manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Script '{script}' has an invalid match pattern: {source}")]
    Pattern {
        script: String,
        #[source]
        source: PatternError,
    },
    #[error("Script '{script}' has an invalid include regex: {source}")]
    Include {
        script: String,
        #[source]
        source: regex::Error,
    },
}

/// How a script declares the pages it runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptTarget {
    /// Match patterns, e.g. `https://example.com/*`.
    Matches(Vec<String>),
    /// Regex sources tested against `/<href>/`.
    Includes(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Userscript {
    pub display_name: String,
    #[serde(flatten)]
    pub target: ScriptTarget,
}

impl Userscript {
    /// Whether this script should run on `href`.
    pub fn is_match(&self, href: &str, options: &MatchOptions) -> Result<bool, ManifestError> {
        match &self.target {
            ScriptTarget::Matches(patterns) => {
                let matcher = match_patterns(patterns, options.clone())
                    .assert_valid()
                    .map_err(|source| ManifestError::Pattern {
                        script: self.display_name.clone(),
                        source,
                    })?;
                Ok(matcher.matches(href))
            }
            ScriptTarget::Includes(sources) => {
                let subject = format!("/{}/", href);
                for source in sources {
                    let re = Regex::new(source).map_err(|source| ManifestError::Include {
                        script: self.display_name.clone(),
                        source,
                    })?;
                    if re.is_match(&subject) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Ordered list of bundled scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub scripts: Vec<Userscript>,
}

/// Selection outcome for one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub index: usize,
    pub display_name: String,
    pub matched: bool,
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Evaluate every script against `href`, in manifest order.
    ///
    /// An invalid pattern in any script fails the whole selection.
    pub fn select(&self, href: &str, options: &MatchOptions) -> Result<Vec<Selection>, ManifestError> {
        let selections = self
            .scripts
            .iter()
            .enumerate()
            .map(|(index, script)| {
                Ok(Selection {
                    index,
                    display_name: script.display_name.clone(),
                    matched: script.is_match(href, options)?,
                })
            })
            .collect::<Result<Vec<_>, ManifestError>>()?;

        log::debug!("\n{}", render_status(&selections));
        Ok(selections)
    }

    /// Configuration tree, one branch per script.
    pub fn render_tree(&self) -> String {
        let mut out = String::from("🐒 Userscript Configuration:\n");
        let count = self.scripts.len();

        for (index, script) in self.scripts.iter().enumerate() {
            let is_last = index + 1 == count;
            let tree_prefix = if is_last { "└── " } else { "├── " };
            let child_prefix = if is_last { "    " } else { "│   " };

            out.push_str(&format!("{}⚡ {}\n", tree_prefix, script.display_name));

            let entries = match &script.target {
                ScriptTarget::Matches(entries) | ScriptTarget::Includes(entries) => entries,
            };
            for (entry_index, entry) in entries.iter().enumerate() {
                let entry_prefix = if entry_index + 1 == entries.len() { "└── " } else { "├── " };
                out.push_str(&format!("{}{} {}\n", child_prefix, entry_prefix, entry));
            }

            if !is_last {
                out.push_str("│\n");
            }
        }

        out
    }
}

/// One `🟢`/`🔴` line per script.
pub fn render_status(selections: &[Selection]) -> String {
    selections
        .iter()
        .map(|s| format!("{} {}", if s.matched { "🟢" } else { "🔴" }, s.display_name))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"[
        { "displayName": "ml-vid-shortcut", "matches": ["https://motherless.com/*"] },
        { "displayName": "docs-helper", "includes": ["docs\\.rs/.*/latest"] },
        { "displayName": "wiki", "matches": ["https://*.wikipedia.org/wiki/*", "https://wikipedia.org/*"] }
    ]"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        assert_eq!(manifest.scripts.len(), 3);
        assert_eq!(
            manifest.scripts[1].target,
            ScriptTarget::Includes(vec![r"docs\.rs/.*/latest".to_string()])
        );
    }

    #[test]
    fn test_select_preserves_order() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let selections = manifest
            .select("https://motherless.com/ABCDEF", &MatchOptions::default())
            .unwrap();
        let matched: Vec<bool> = selections.iter().map(|s| s.matched).collect();
        assert_eq!(matched, vec![true, false, false]);
        assert_eq!(selections[2].index, 2);
    }

    #[test]
    fn test_includes() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let selections = manifest
            .select("https://docs.rs/regex/latest/regex/", &MatchOptions::default())
            .unwrap();
        assert!(selections[1].matched);
        assert!(!selections[0].matched);
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        let manifest = Manifest::from_json(r#"[{ "displayName": "bad", "matches": ["https://ex*ample.com/*"] }]"#).unwrap();
        let err = manifest.select("https://example.com/", &MatchOptions::default()).unwrap_err();
        assert!(matches!(err, ManifestError::Pattern { ref script, .. } if script == "bad"));
    }

    #[test]
    fn test_render_status() {
        let selections = vec![
            Selection { index: 0, display_name: "a".into(), matched: true },
            Selection { index: 1, display_name: "b".into(), matched: false },
        ];
        assert_eq!(render_status(&selections), "🟢 a\n🔴 b");
    }

    #[test]
    fn test_render_tree() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let tree = manifest.render_tree();
        assert!(tree.starts_with("🐒 Userscript Configuration:\n├── ⚡ ml-vid-shortcut\n│   └──  https://motherless.com/*\n│\n"));
        assert!(tree.ends_with("└── ⚡ wiki\n    ├──  https://*.wikipedia.org/wiki/*\n    └──  https://wikipedia.org/*\n"));
    }
}
