//! Host pattern validation and compilation.

use regex::Regex;

use super::examples::{dummy_url, Replacements};
use super::segments::PatternSegments;
use super::PatternError;
use crate::regex_builder::{build_pattern, Part};

/// Compile the host segment into a regex tested against `Url::host_str`.
pub(crate) fn host_regex(segments: &PatternSegments) -> Result<Regex, PatternError> {
    let raw_host = segments.raw_host.as_str();

    if raw_host.is_empty() && segments.scheme != "file" {
        return Err(PatternError::MissingHost);
    }

    let is_star_host = raw_host.contains('*');
    if is_star_host && raw_host.len() > 1 {
        let parts: Vec<&str> = raw_host.split("*.").collect();
        let well_placed = parts.len() == 2 && parts[0].is_empty() && !parts[1].is_empty() && !parts[1].contains('*');
        if !well_placed {
            return Err(PatternError::WildcardPlacement(raw_host.to_string()));
        }
    }

    let dummy = dummy_url(segments, &Replacements::default())
        .ok_or_else(|| PatternError::UnconstructableUrl(segments.pattern.clone()))?;

    if dummy.port().is_some() {
        return Err(PatternError::PortNotAllowed(raw_host.to_string()));
    }

    let dummy_host = dummy.host_str().unwrap_or("");
    if !dummy_host
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return Err(PatternError::InvalidHostCharacters(raw_host.to_string()));
    }

    let source = if raw_host == "*" {
        ".+".to_string()
    } else if is_star_host {
        // Any number of dot-terminated labels in front of the suffix.
        build_pattern(&[Part::raw(r"^(?:[^.]+\.)*"), Part::literal(dummy_host), Part::raw("$")])
    } else {
        build_pattern(&[Part::raw("^"), Part::literal(dummy_host), Part::raw("$")])
    };

    Ok(Regex::new(&source)?)
}
