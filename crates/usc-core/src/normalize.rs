//! URL fragment normalization
//!
//! Paths and queries are compared after a decode/re-encode pass with the
//! semantics of ECMAScript `decodeURI` and `encodeURI`, so equivalent
//! percent-encodings of the same text compare equal.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters `encodeURI` leaves untouched besides ASCII alphanumerics.
const ENCODE_URI: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

/// Escapes `decodeURI` keeps encoded.
const DECODE_URI_RESERVED: &[u8] = b";/?:@&=+$,#";

/// A percent-encoding that cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("URI malformed: {0}")]
pub struct MalformedUri(pub String);

/// Percent-encode like `encodeURI`.
pub fn encode_uri(input: &str) -> String {
    utf8_percent_encode(input, ENCODE_URI).to_string()
}

/// Percent-decode like `decodeURI`.
///
/// Escapes of reserved characters are kept as written. Truncated escapes,
/// stray continuation bytes and invalid UTF-8 sequences are errors.
pub fn decode_uri(input: &str) -> Result<String, MalformedUri> {
    let bytes = input.as_bytes();
    let malformed = || MalformedUri(input.to_string());
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            let next = input[i..].find('%').map_or(input.len(), |offset| i + offset);
            out.push_str(&input[i..next]);
            i = next;
            continue;
        }

        let start = i;
        let lead = hex_byte(bytes, i).ok_or_else(malformed)?;
        i += 3;

        if lead < 0x80 {
            if DECODE_URI_RESERVED.contains(&lead) {
                out.push_str(&input[start..i]);
            } else {
                out.push(char::from(lead));
            }
            continue;
        }

        let width = match lead {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return Err(malformed()),
        };

        let mut sequence = Vec::with_capacity(width);
        sequence.push(lead);
        for _ in 1..width {
            let continuation = hex_byte(bytes, i).ok_or_else(malformed)?;
            if continuation & 0xC0 != 0x80 {
                return Err(malformed());
            }
            sequence.push(continuation);
            i += 3;
        }

        // from_utf8 rejects overlong forms and surrogate code points.
        let decoded = std::str::from_utf8(&sequence).map_err(|_| malformed())?;
        out.push_str(decoded);
    }

    Ok(out)
}

/// `encodeURI(decodeURI(fragment))`.
pub fn normalize_url_fragment(fragment: &str) -> Result<String, MalformedUri> {
    decode_uri(fragment).map(|decoded| encode_uri(&decoded))
}

fn hex_byte(bytes: &[u8], at: usize) -> Option<u8> {
    if bytes.get(at) != Some(&b'%') {
        return None;
    }
    let hi = hex_value(*bytes.get(at + 1)?)?;
    let lo = hex_value(*bytes.get(at + 2)?)?;
    Some(hi << 4 | lo)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uri_keeps_reserved() {
        assert_eq!(encode_uri("/a b/c?d=e&f#g"), "/a%20b/c?d=e&f#g");
        assert_eq!(encode_uri("/é"), "/%C3%A9");
        assert_eq!(encode_uri("100%"), "100%25");
    }

    #[test]
    fn test_decode_uri() {
        assert_eq!(decode_uri("/a%20b").unwrap(), "/a b");
        assert_eq!(decode_uri("/%C3%A9").unwrap(), "/é");
        assert_eq!(decode_uri("/%c3%a9").unwrap(), "/é");
    }

    #[test]
    fn test_decode_uri_preserves_reserved_escapes() {
        assert_eq!(decode_uri("/a%2Fb%3f").unwrap(), "/a%2Fb%3f");
    }

    #[test]
    fn test_decode_uri_malformed() {
        assert!(decode_uri("/%").is_err());
        assert!(decode_uri("/%zz").is_err());
        assert!(decode_uri("/%E0%A4%A").is_err());
        assert!(decode_uri("/%80").is_err());
        assert!(decode_uri("/%C3%28").is_err());
        // Encoded surrogate half.
        assert!(decode_uri("/%ED%A0%80").is_err());
    }

    #[test]
    fn test_normalize_canonicalizes_equivalent_encodings() {
        assert_eq!(normalize_url_fragment("/%7Euser").unwrap(), "/~user");
        assert_eq!(normalize_url_fragment("/~user").unwrap(), "/~user");
        assert_eq!(normalize_url_fragment("/%c3%a9").unwrap(), normalize_url_fragment("/é").unwrap());
    }
}
