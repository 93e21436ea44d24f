//! Pattern matcher for the LIKE operator
//!
//! The compiler rewrites LIKE patterns before they reach the bytecode:
//! the SQL `%` and `_` wildcards (minus escaped occurrences) are replaced
//! with the reserved bytes below, so the matcher never needs to know the
//! escape character.

/// Matches any run of bytes, including an empty one
pub const WILDCARD_MANY: u8 = 0xFF;

/// Matches exactly one byte
pub const WILDCARD_ONE: u8 = 0xFE;

/// Match `text` against a rewritten LIKE pattern.
///
/// Greedy two-pointer scan with backtracking: a multi-byte wildcard
/// records a resume point and retries from it, consuming one more text
/// byte each time the tail fails to match.
pub fn like_match(pattern: &[u8], text: &[u8]) -> bool {
    let mut p = 0;
    let mut t = 0;
    // (pattern index after the wildcard, text index it was seen at)
    let mut resume: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == WILDCARD_ONE || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == WILDCARD_MANY {
            resume = Some((p + 1, t));
            p += 1;
        } else if let Some((rp, rt)) = resume {
            p = rp;
            t = rt + 1;
            resume = Some((rp, rt + 1));
        } else {
            return false;
        }
    }
    // trailing multi-wildcards match the empty remainder
    while p < pattern.len() && pattern[p] == WILDCARD_MANY {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(spec: &str) -> Vec<u8> {
        // '%' and '_' stand in for the rewritten wildcard bytes in tests
        spec.bytes()
            .map(|b| match b {
                b'%' => WILDCARD_MANY,
                b'_' => WILDCARD_ONE,
                b => b,
            })
            .collect()
    }

    #[test]
    fn test_literal() {
        assert!(like_match(&pat("hello"), b"hello"));
        assert!(!like_match(&pat("hello"), b"hell"));
        assert!(!like_match(&pat("hello"), b"hellos"));
        assert!(like_match(&pat(""), b""));
        assert!(!like_match(&pat(""), b"x"));
    }

    #[test]
    fn test_single_wildcard() {
        assert!(like_match(&pat("h_llo"), b"hello"));
        assert!(like_match(&pat("h_llo"), b"hallo"));
        assert!(!like_match(&pat("h_llo"), b"hllo"));
        assert!(!like_match(&pat("_"), b""));
    }

    #[test]
    fn test_multi_wildcard() {
        assert!(like_match(&pat("%"), b""));
        assert!(like_match(&pat("%"), b"anything"));
        assert!(like_match(&pat("he%o"), b"hello"));
        assert!(like_match(&pat("he%o"), b"heo"));
        assert!(like_match(&pat("%lo"), b"hello"));
        assert!(!like_match(&pat("%lo"), b"hellos"));
        assert!(like_match(&pat("h%"), b"h"));
    }

    #[test]
    fn test_backtracking() {
        // first '%' must give back bytes so the tail can match
        assert!(like_match(&pat("%ab%ab"), b"xxabyyabzzab"));
        assert!(like_match(&pat("a%a%a"), b"aaa"));
        assert!(!like_match(&pat("a%a%a"), b"aa"));
        assert!(like_match(&pat("%_%"), b"x"));
        assert!(!like_match(&pat("%_%"), b""));
    }

    #[test]
    fn test_wildcard_bytes_in_text_are_plain() {
        // reserved bytes appearing in the text are ordinary bytes
        assert!(!like_match(&pat("a"), &[0xFF]));
        assert!(like_match(&pat("_"), &[0xFF]));
    }
}
