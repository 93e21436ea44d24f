//! Compiled MQTT topic-filter patterns
//!
//! A `SubscriptionPattern` records where the wildcards of a topic filter sit:
//! the 1-based level indices of each `+`, the level index of a trailing `#`
//! (0 when absent), and the total level count. Patterns are immutable once
//! parsed and order/compare by their wildcard structure, which is what the
//! SCF wire codec serializes.
//!
//! Wildcard rules match the broker's topic-filter validation: `+` must occupy
//! an entire level, `#` must be the last character of the filter.

use std::fmt;

use smallvec::SmallVec;

/// Errors raised when parsing or applying a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternError {
    /// The topic filter (or the operation's argument) is not valid
    ArgNotValid,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArgNotValid => write!(f, "topic filter is not valid"),
        }
    }
}

impl std::error::Error for PatternError {}

/// Scanner states for `parse`
enum ParseState {
    StartOfLevel,
    MidRegularLevel,
    AfterPlus,
    AfterHash,
}

/// Compiled topic-filter descriptor
///
/// Field order drives the derived ordering: plus-level sequence first, then
/// hash level, then total level count.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionPattern {
    plus_levels: SmallVec<[u16; 8]>,
    hash_level: u16,
    last_level: u16,
}

impl SubscriptionPattern {
    /// The canonical empty pattern: no wildcards, zero levels. Used on the
    /// wire to mark a removed/absent entry.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Construct from raw fields, validating the structural invariants:
    /// plus levels strictly increasing and within the level count, hash
    /// level equal to the level count when present.
    pub fn from_parts(
        plus_levels: &[u16],
        hash_level: u16,
        last_level: u16,
    ) -> Result<Self, PatternError> {
        let mut prev = 0u16;
        for &level in plus_levels {
            if level == 0 || level <= prev || level > last_level {
                return Err(PatternError::ArgNotValid);
            }
            if hash_level != 0 && level >= hash_level {
                return Err(PatternError::ArgNotValid);
            }
            prev = level;
        }
        if hash_level != 0 && hash_level != last_level {
            return Err(PatternError::ArgNotValid);
        }
        Ok(Self {
            plus_levels: SmallVec::from_slice(plus_levels),
            hash_level,
            last_level,
        })
    }

    /// Compile a topic filter in a single pass.
    ///
    /// A level is regular unless its first character is `+` (the level must
    /// then be exactly `+`) or `#` (which must end the filter). A `+` or `#`
    /// appearing mid-level is an error.
    pub fn parse(filter: &str) -> Result<Self, PatternError> {
        if filter.is_empty() {
            return Err(PatternError::ArgNotValid);
        }

        let mut plus_levels: SmallVec<[u16; 8]> = SmallVec::new();
        let mut hash_level = 0u16;
        let mut level = 1u16;
        let mut state = ParseState::StartOfLevel;

        for ch in filter.chars() {
            state = match state {
                ParseState::StartOfLevel => match ch {
                    '+' => {
                        plus_levels.push(level);
                        ParseState::AfterPlus
                    }
                    '#' => {
                        hash_level = level;
                        ParseState::AfterHash
                    }
                    '/' => {
                        level = level.checked_add(1).ok_or(PatternError::ArgNotValid)?;
                        ParseState::StartOfLevel
                    }
                    _ => ParseState::MidRegularLevel,
                },
                ParseState::MidRegularLevel => match ch {
                    '/' => {
                        level = level.checked_add(1).ok_or(PatternError::ArgNotValid)?;
                        ParseState::StartOfLevel
                    }
                    '+' | '#' => return Err(PatternError::ArgNotValid),
                    _ => ParseState::MidRegularLevel,
                },
                ParseState::AfterPlus => match ch {
                    '/' => {
                        level = level.checked_add(1).ok_or(PatternError::ArgNotValid)?;
                        ParseState::StartOfLevel
                    }
                    _ => return Err(PatternError::ArgNotValid),
                },
                // Nothing may follow a hash
                ParseState::AfterHash => return Err(PatternError::ArgNotValid),
            };
        }

        Ok(Self {
            plus_levels,
            hash_level,
            last_level: level,
        })
    }

    /// 1-based level indices of `+` wildcards, strictly increasing
    pub fn plus_levels(&self) -> &[u16] {
        &self.plus_levels
    }

    /// Level index of the trailing `#`, 0 when absent
    pub fn hash_level(&self) -> u16 {
        self.hash_level
    }

    /// Total level count of the filter
    pub fn last_level(&self) -> u16 {
        self.last_level
    }

    /// True when the pattern carries at least one wildcard
    pub fn is_wildcard(&self) -> bool {
        self.hash_level != 0 || !self.plus_levels.is_empty()
    }

    /// True for the canonical empty (removed/absent) pattern
    pub fn is_empty(&self) -> bool {
        self.last_level == 0 && self.hash_level == 0 && self.plus_levels.is_empty()
    }

    /// Whether this pattern applies to a concrete topic: the topic must have
    /// at least `last_level` levels when a trailing `#` absorbs the rest,
    /// exactly `last_level` otherwise. Literal text is not retained by the
    /// pattern, so this is a shape check; `format_topic` returns `Some` for
    /// exactly the topics this accepts.
    pub fn applies_to(&self, topic: &str) -> bool {
        if self.is_empty() {
            return false;
        }
        let mut level = 0u16;
        for _part in topic.split('/') {
            level += 1;
            if self.hash_level != 0 && level >= self.hash_level {
                return true;
            }
            if level > self.last_level {
                return false;
            }
        }
        level == self.last_level && self.hash_level == 0
    }

    /// Rewrite a concrete topic into this pattern's canonical string by
    /// substituting `+`/`#` at the wildcard levels and copying literal
    /// levels from the topic.
    ///
    /// Returns `None` when the pattern does not apply: the topic has fewer
    /// levels than `last_level`, or extra levels with no trailing `#` to
    /// absorb them. Calling this on a non-wildcard pattern is an error.
    pub fn format_topic(&self, topic: &str) -> Result<Option<String>, PatternError> {
        if !self.is_wildcard() {
            return Err(PatternError::ArgNotValid);
        }

        let mut out = String::with_capacity(topic.len());
        let mut level = 0u16;
        let mut plus_iter = self.plus_levels.iter().peekable();

        for part in topic.split('/') {
            level += 1;
            if level > self.last_level {
                // Extra topic levels are only legal under a trailing hash
                return if self.hash_level != 0 {
                    Ok(Some(out))
                } else {
                    Ok(None)
                };
            }
            if level > 1 {
                out.push('/');
            }
            if level == self.hash_level {
                out.push('#');
                return Ok(Some(out));
            }
            if plus_iter.peek() == Some(&&level) {
                plus_iter.next();
                out.push('+');
            } else {
                out.push_str(part);
            }
        }

        if level < self.last_level {
            return Ok(None);
        }
        Ok(Some(out))
    }
}

/// Renders the wildcard skeleton: `+`/`#` at wildcard levels and `*` at
/// literal levels (literal text is not retained by the pattern). Re-parsing
/// the rendered string yields an equal pattern.
impl fmt::Display for SubscriptionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut plus_iter = self.plus_levels.iter().peekable();
        for level in 1..=self.last_level {
            if level > 1 {
                f.write_str("/")?;
            }
            if level == self.hash_level {
                f.write_str("#")?;
            } else if plus_iter.peek() == Some(&&level) {
                plus_iter.next();
                f.write_str("+")?;
            } else {
                f.write_str("*")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_plain_filter() {
        let p = SubscriptionPattern::parse("sport/tennis/score").unwrap();
        assert!(p.plus_levels().is_empty());
        assert_eq!(p.hash_level(), 0);
        assert_eq!(p.last_level(), 3);
        assert!(!p.is_wildcard());
    }

    #[test]
    fn test_parse_wildcards() {
        let p = SubscriptionPattern::parse("sport/+/score/#").unwrap();
        assert_eq!(p.plus_levels(), &[2]);
        assert_eq!(p.hash_level(), 4);
        assert_eq!(p.last_level(), 4);
        assert!(p.is_wildcard());

        let p = SubscriptionPattern::parse("+/+/c").unwrap();
        assert_eq!(p.plus_levels(), &[1, 2]);
        assert_eq!(p.hash_level(), 0);
        assert_eq!(p.last_level(), 3);

        let p = SubscriptionPattern::parse("#").unwrap();
        assert_eq!(p.hash_level(), 1);
        assert_eq!(p.last_level(), 1);
    }

    #[test]
    fn test_parse_empty_levels_are_regular() {
        let p = SubscriptionPattern::parse("/a/").unwrap();
        assert_eq!(p.last_level(), 3);
        assert!(!p.is_wildcard());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "", "a+", "+a", "a/b+c", "a/#/b", "#a", "a#", "a/+#", "sport/ten#nis",
        ] {
            assert_eq!(
                SubscriptionPattern::parse(bad),
                Err(PatternError::ArgNotValid),
                "filter {:?} should not parse",
                bad
            );
        }
    }

    #[test]
    fn test_parse_rejects_filter_beyond_level_range() {
        // 65536 separators would wrap the u16 level counter
        let deep = "a/".repeat(u16::MAX as usize + 1) + "a";
        assert_eq!(
            SubscriptionPattern::parse(&deep),
            Err(PatternError::ArgNotValid)
        );

        // the deepest representable filter still parses
        let max = "a/".repeat(u16::MAX as usize - 1) + "a";
        let p = SubscriptionPattern::parse(&max).unwrap();
        assert_eq!(p.last_level(), u16::MAX);
    }

    #[test]
    fn test_from_parts_invariants() {
        assert!(SubscriptionPattern::from_parts(&[1, 3], 0, 4).is_ok());
        assert!(SubscriptionPattern::from_parts(&[2], 4, 4).is_ok());
        // plus indices must be strictly increasing
        assert!(SubscriptionPattern::from_parts(&[2, 2], 0, 4).is_err());
        // hash must sit on the last level
        assert!(SubscriptionPattern::from_parts(&[], 3, 4).is_err());
        // plus must precede the hash
        assert!(SubscriptionPattern::from_parts(&[4], 4, 4).is_err());
        // plus outside the filter
        assert!(SubscriptionPattern::from_parts(&[5], 0, 4).is_err());
    }

    #[test]
    fn test_ordering() {
        let a = SubscriptionPattern::parse("+/b").unwrap();
        let b = SubscriptionPattern::parse("a/+").unwrap();
        let c = SubscriptionPattern::parse("a/+/c").unwrap();
        assert!(a < b); // plus sequence [1] < [2]
        assert!(b < c); // equal plus prefix, shorter filter first
        assert_eq!(a, SubscriptionPattern::parse("+/x").unwrap());
    }

    #[test]
    fn test_applies_to() {
        let p = SubscriptionPattern::parse("sport/+/score/#").unwrap();
        assert!(p.applies_to("sport/tennis/score/wimbledon"));
        assert!(p.applies_to("sport/tennis/score/a/b"));
        assert!(!p.applies_to("sport/tennis/score"));

        let q = SubscriptionPattern::parse("a/+").unwrap();
        assert!(q.applies_to("a/b"));
        assert!(!q.applies_to("a/b/c"));
        assert!(!q.applies_to("a"));
    }

    #[test]
    fn test_format_topic() {
        let p = SubscriptionPattern::parse("sport/+/score/#").unwrap();
        assert_eq!(
            p.format_topic("sport/tennis/score/wimbledon/set1")
                .unwrap()
                .as_deref(),
            Some("sport/+/score/#")
        );
        // Too few levels for the pattern
        assert_eq!(p.format_topic("sport/tennis/score").unwrap(), None);

        let q = SubscriptionPattern::parse("a/+/c").unwrap();
        assert_eq!(q.format_topic("a/b/c").unwrap().as_deref(), Some("a/+/c"));
        // Extra level with nothing to absorb it
        assert_eq!(q.format_topic("a/b/c/d").unwrap(), None);

        let plain = SubscriptionPattern::parse("a/b").unwrap();
        assert_eq!(plain.format_topic("a/b"), Err(PatternError::ArgNotValid));
    }

    #[test]
    fn test_display_reparses_equal() {
        for filter in ["sport/+/score/#", "+/+/c", "#", "a/b/c", "+"] {
            let p = SubscriptionPattern::parse(filter).unwrap();
            let rendered = p.to_string();
            assert_eq!(SubscriptionPattern::parse(&rendered).unwrap(), p);
        }
    }

    proptest! {
        #[test]
        fn prop_display_round_trip(levels in proptest::collection::vec(0u8..3, 1..8)) {
            // Build a filter from level kinds: 0=literal, 1=plus, 2=hash(final only)
            let mut parts: Vec<String> = Vec::new();
            let n = levels.len();
            for (i, kind) in levels.iter().enumerate() {
                let part = match kind {
                    1 => "+".to_string(),
                    2 if i == n - 1 => "#".to_string(),
                    _ => format!("lvl{}", i),
                };
                parts.push(part);
            }
            let filter = parts.join("/");
            let p = SubscriptionPattern::parse(&filter).unwrap();
            let reparsed = SubscriptionPattern::parse(&p.to_string()).unwrap();
            prop_assert_eq!(p, reparsed);
        }
    }
}
