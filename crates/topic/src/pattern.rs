//! Pattern compiler and topic matcher
//!
//! A pattern is compiled once into an anchored regex. Each wildcard segment
//! becomes one capture group, so capture `i + 1` always belongs to slot `i`.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::PatternError;

/// Path separator between topic levels
pub const SEPARATOR: char = '/';

/// Single-level wildcard token
pub const SINGLE_WILDCARD: &str = "+";

/// Multi-level wildcard token (final segment only)
pub const MULTI_WILDCARD: &str = "#";

/// First character of broker-internal topics
pub const HIDDEN_PREFIX: char = '$';

/// Root segment of broker status topics
pub const SYSTEM_ROOT: &str = "$SYS";

const SINGLE_CAPTURE: &str = "([^/]+)";
const MULTI_CAPTURE: &str = "(.*)";
const MULTI_CAPTURE_TAIL: &str = "(?:/(.*))?";

/// Wildcard flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WildcardKind {
    /// `+`: exactly one non-empty segment
    Single,
    /// `#`: zero or more trailing segments
    Multi,
}

/// A wildcard segment of a compiled pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WildcardSlot {
    /// 0-based segment index in the pattern
    pub position: usize,
    /// Wildcard flavour
    pub kind: WildcardKind,
}

/// Literal value a wildcard captured for one concrete topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Index into [`CompiledPattern::slots`]
    pub slot: usize,
    /// Segment index of the wildcard in the pattern
    pub position: usize,
    /// Wildcard flavour
    pub kind: WildcardKind,
    /// Captured text; empty when `#` matched zero segments
    pub value: String,
}

/// Subscription pattern compiled into a reusable matcher
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: String,
    tokens: Vec<String>,
    slots: Vec<WildcardSlot>,
    hidden: bool,
    system: bool,
    matcher: Regex,
}

impl CompiledPattern {
    /// Original pattern string
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Pattern segments as written
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Wildcard slots in pattern order
    pub fn slots(&self) -> &[WildcardSlot] {
        &self.slots
    }

    /// Whether the pattern addresses broker-internal (`$`-prefixed) topics
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Whether the pattern is rooted at `$SYS`
    pub fn is_system(&self) -> bool {
        self.system
    }

    /// Whether the pattern contains any wildcard
    pub fn has_wildcards(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Test a concrete topic and extract bindings in pattern order
    ///
    /// Returns `None` when the topic does not match. Topics starting with `$`
    /// never match a pattern that is not itself hidden.
    pub fn matches(&self, topic: &str) -> Option<Vec<Binding>> {
        if !self.hidden && topic.starts_with(HIDDEN_PREFIX) {
            return None;
        }

        let captures = self.matcher.captures(topic)?;

        let bindings = self
            .slots
            .iter()
            .enumerate()
            .map(|(slot, wildcard)| Binding {
                slot,
                position: wildcard.position,
                kind: wildcard.kind,
                value: captures
                    .get(slot + 1)
                    .map_or_else(String::new, |m| m.as_str().to_string()),
            })
            .collect();

        Some(bindings)
    }

    /// Test a concrete topic without extracting bindings
    pub fn is_match(&self, topic: &str) -> bool {
        if !self.hidden && topic.starts_with(HIDDEN_PREFIX) {
            return false;
        }
        self.matcher.is_match(topic)
    }
}

impl fmt::Display for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl FromStr for CompiledPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        compile(s)
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for CompiledPattern {}

/// Compile a subscription pattern
///
/// # Errors
/// - [`PatternError::Empty`] for an empty pattern
/// - [`PatternError::MisplacedMultiWildcard`] when `#` is not the last segment
pub fn compile(pattern: &str) -> Result<CompiledPattern, PatternError> {
    if pattern.is_empty() {
        return Err(PatternError::Empty);
    }

    let tokens: Vec<String> = pattern.split(SEPARATOR).map(str::to_string).collect();
    let last = tokens.len() - 1;

    let mut source = String::from("(?s)^");
    let mut slots = Vec::new();

    for (position, token) in tokens.iter().enumerate() {
        match token.as_str() {
            MULTI_WILDCARD => {
                if position != last {
                    return Err(PatternError::MisplacedMultiWildcard {
                        pattern: pattern.to_string(),
                        position,
                    });
                }
                // "a/#" also matches "a", so the separator is optional with the tail
                source.push_str(if position == 0 {
                    MULTI_CAPTURE
                } else {
                    MULTI_CAPTURE_TAIL
                });
                slots.push(WildcardSlot {
                    position,
                    kind: WildcardKind::Multi,
                });
            }
            SINGLE_WILDCARD => {
                if position > 0 {
                    source.push(SEPARATOR);
                }
                source.push_str(SINGLE_CAPTURE);
                slots.push(WildcardSlot {
                    position,
                    kind: WildcardKind::Single,
                });
            }
            literal => {
                if position > 0 {
                    source.push(SEPARATOR);
                }
                source.push_str(&regex::escape(literal));
            }
        }
    }

    source.push('$');

    let matcher = Regex::new(&source).map_err(|e| PatternError::Matcher {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    Ok(CompiledPattern {
        pattern: pattern.to_string(),
        hidden: pattern.starts_with(HIDDEN_PREFIX),
        system: tokens[0] == SYSTEM_ROOT,
        tokens,
        slots,
        matcher,
    })
}

/// Test `topic` against `pattern`, see [`CompiledPattern::matches`]
pub fn matches(pattern: &CompiledPattern, topic: &str) -> Option<Vec<Binding>> {
    pattern.matches(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(bindings: &[Binding]) -> Vec<&str> {
        bindings.iter().map(|b| b.value.as_str()).collect()
    }

    #[test]
    fn test_compile_empty() {
        assert_eq!(compile("").unwrap_err(), PatternError::Empty);
    }

    #[test]
    fn test_multi_wildcard_must_be_last() {
        for pattern in ["#", "a/#", "a/+/#", "$SYS/#"] {
            assert!(compile(pattern).is_ok(), "{pattern} should compile");
        }

        for pattern in ["#/a", "a/#/b", "a/#/#"] {
            assert!(
                matches!(
                    compile(pattern),
                    Err(PatternError::MisplacedMultiWildcard { .. })
                ),
                "{pattern} should be rejected"
            );
        }
    }

    #[test]
    fn test_misplaced_multi_reports_position() {
        let err = compile("a/#/b").unwrap_err();
        assert_eq!(
            err,
            PatternError::MisplacedMultiWildcard {
                pattern: "a/#/b".to_string(),
                position: 1
            }
        );
    }

    #[test]
    fn test_single_wildcard() {
        let p = compile("a/+/c").unwrap();
        assert_eq!(values(&p.matches("a/b/c").unwrap()), vec!["b"]);
        assert!(p.matches("a/b/x/c").is_none());
        assert!(p.matches("a//c").is_none());
        assert!(p.matches("a/b/c/d").is_none());
    }

    #[test]
    fn test_multi_wildcard_zero_and_many_segments() {
        let p = compile("a/#").unwrap();
        assert_eq!(values(&p.matches("a").unwrap()), vec![""]);
        assert_eq!(values(&p.matches("a/b/c").unwrap()), vec!["b/c"]);
        assert!(p.matches("ab").is_none());
        assert!(p.matches("b/a").is_none());
    }

    #[test]
    fn test_bindings_in_pattern_order() {
        let p = compile("home/+/sensors/+/#").unwrap();
        let bindings = p.matches("home/kitchen/sensors/temp/raw/1").unwrap();

        assert_eq!(values(&bindings), vec!["kitchen", "temp", "raw/1"]);
        assert_eq!(bindings[0].position, 1);
        assert_eq!(bindings[1].position, 3);
        assert_eq!(bindings[2].position, 4);
        assert_eq!(bindings[2].kind, WildcardKind::Multi);
        assert_eq!(bindings[2].slot, 2);
    }

    #[test]
    fn test_literal_segments_are_escaped() {
        let p = compile("a.b/(c)/+").unwrap();
        assert!(p.is_match("a.b/(c)/x"));
        assert!(!p.is_match("aXb/(c)/x"));
        assert!(!p.is_match("a.b/c/x"));
    }

    #[test]
    fn test_embedded_wildcard_chars_are_literal() {
        let p = compile("a+b/c#").unwrap();
        assert!(!p.has_wildcards());
        assert!(p.is_match("a+b/c#"));
        assert!(!p.is_match("ab/c"));
    }

    #[test]
    fn test_hidden_topics_need_hidden_pattern() {
        let all = compile("#").unwrap();
        assert!(!all.is_hidden());
        assert!(all.matches("$SYS/broker/uptime").is_none());
        assert!(all.matches("plain/topic").is_some());

        let single = compile("+/broker/uptime").unwrap();
        assert!(single.matches("$SYS/broker/uptime").is_none());

        let sys = compile("$SYS/#").unwrap();
        assert!(sys.is_hidden());
        assert!(sys.is_system());
        assert_eq!(
            values(&sys.matches("$SYS/broker/uptime").unwrap()),
            vec!["broker/uptime"]
        );
    }

    #[test]
    fn test_literal_pattern_without_wildcards() {
        let p = compile("broadcast/client").unwrap();
        assert_eq!(p.matches("broadcast/client"), Some(vec![]));
        assert!(p.matches("broadcast/client/x").is_none());
    }

    #[test]
    fn test_compile_is_idempotent() {
        let first = compile("a/+/c/#").unwrap();
        let second = compile("a/+/c/#").unwrap();
        assert_eq!(first, second);

        for topic in ["a/b/c", "a/b/c/d/e", "a/b", "x/b/c", "a//c", "$a/b/c"] {
            assert_eq!(first.matches(topic), second.matches(topic), "{topic}");
        }
    }

    #[test]
    fn test_from_str_and_display() {
        let p: CompiledPattern = "sensors/+/temp".parse().unwrap();
        assert_eq!(p.to_string(), "sensors/+/temp");
        assert_eq!(p.tokens(), &["sensors", "+", "temp"]);
        assert_eq!(
            p.slots(),
            &[WildcardSlot {
                position: 1,
                kind: WildcardKind::Single
            }]
        );
    }
}
