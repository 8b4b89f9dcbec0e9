//! Host pattern grammar.
//!
//! Patterns are resolved the way the engine resolves them, so that a pattern
//! that selects N hosts here selects the same N hosts when it is handed to
//! the engine for dispatch:
//!
//! - `web,db` or `web:db` - union (`:` inside brackets does not split)
//! - `web:&prod` - intersection
//! - `web:!web3` - exclusion
//! - `web*`, `db?`, `rack[12]` - fnmatch style globs, anchored at both ends
//! - `~web\d+` - regular expression, anchored at the start only
//! - `web[0]`, `web[-1]`, `web[1:3]`, `web[1-]` - subscripts; ranges are
//!   inclusive and an empty end means "to the last host"

use once_cell::sync::Lazy;
use regex::Regex;

use super::{InventoryError, InventoryResult};

static SUBSCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+)\[(?:(-?[0-9]+)|([0-9]+)([:-])([0-9]*))\]$")
        .expect("subscript regex is valid")
});

/// Characters that make a pattern a glob or regex candidate for host names.
const WILDCARD_CHARS: &[char] = &['.', '?', '*', '['];

/// Split a pattern string into its terms.
///
/// Commas always split. Without a comma, colons outside brackets split too,
/// unless the whole string is a single address (an IPv6 literal or
/// `host:port`).
pub fn split_host_pattern(pattern: &str) -> Vec<String> {
    let pattern = pattern.trim();

    let parts: Vec<&str> = if pattern.contains(',') {
        pattern.split(',').collect()
    } else if is_single_address(pattern) {
        vec![pattern]
    } else {
        split_outside_brackets(pattern)
    };

    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_single_address(pattern: &str) -> bool {
    let colons = pattern.matches(':').count();
    if colons == 0 {
        return true;
    }
    if colons >= 2 {
        return pattern
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.');
    }
    // host:port
    pattern
        .split_once(':')
        .map(|(host, port)| {
            !host.is_empty()
                && !host.starts_with(['!', '&', '~'])
                && !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
        })
        .unwrap_or(false)
}

/// Split pattern by : but not inside brackets
fn split_outside_brackets(pattern: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut bracket_depth: usize = 0;

    for (i, ch) in pattern.char_indices() {
        match ch {
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            ':' if bracket_depth == 0 => {
                parts.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    parts.push(&pattern[start..]);
    parts
}

/// Order terms for evaluation: plain terms, then `&` terms, then `!` terms.
/// A pattern made only of restrictions is applied to `all`.
pub fn order_patterns(terms: Vec<String>) -> Vec<String> {
    let mut regular = Vec::new();
    let mut intersections = Vec::new();
    let mut exclusions = Vec::new();

    for term in terms {
        if term.starts_with('!') {
            exclusions.push(term);
        } else if term.starts_with('&') {
            intersections.push(term);
        } else {
            regular.push(term);
        }
    }

    if regular.is_empty() {
        regular.push("all".to_string());
    }

    regular.extend(intersections);
    regular.extend(exclusions);
    regular
}

/// A trailing `[...]` selector on a pattern term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscript {
    /// `[i]`, negative counts from the end
    Index(i64),
    /// `[start:end]` / `[start-end]`, inclusive; `None` runs to the last host
    Range(i64, Option<i64>),
    /// A bound too large to represent; selects nothing
    Unbounded,
}

impl Subscript {
    /// Apply the selector to an ordered host list.
    ///
    /// An index past either end is an error, matching the engine's
    /// "No hosts matched the subscripted pattern" failure.
    pub fn apply<T: Clone>(self, items: &[T]) -> Option<Vec<T>> {
        let len = items.len() as i64;
        match self {
            Subscript::Index(i) => {
                let idx = if i < 0 { len.checked_add(i)? } else { i };
                if idx < 0 || idx >= len {
                    return None;
                }
                Some(vec![items[idx as usize].clone()])
            }
            Subscript::Range(start, end) => {
                let end = end.unwrap_or(len - 1);
                let stop = end.saturating_add(1).clamp(0, len);
                let start = start.clamp(0, len);
                if start >= stop {
                    return Some(Vec::new());
                }
                Some(items[start as usize..stop as usize].to_vec())
            }
            Subscript::Unbounded => None,
        }
    }
}

/// Separate a trailing subscript from a pattern term. Regex terms never carry
/// one.
pub fn split_subscript(pattern: &str) -> (&str, Option<Subscript>) {
    if pattern.starts_with('~') {
        return (pattern, None);
    }

    let Some(caps) = SUBSCRIPT_RE.captures(pattern) else {
        return (pattern, None);
    };
    let Some(base) = caps.get(1) else {
        return (pattern, None);
    };
    let number = |m: regex::Match<'_>| m.as_str().parse::<i64>().ok();

    let subscript = if let Some(index) = caps.get(2) {
        number(index).map_or(Subscript::Unbounded, Subscript::Index)
    } else {
        let start = caps.get(3).and_then(number);
        let end = caps.get(5).map_or("", |m| m.as_str());
        match start {
            None => Subscript::Unbounded,
            Some(start) if end.is_empty() => Subscript::Range(start, None),
            // An end of zero reads as "no end" upstream and selects one host.
            Some(start) => match end.parse::<i64>() {
                Ok(0) => Subscript::Index(start),
                Ok(end) => Subscript::Range(start, Some(end)),
                Err(_) => Subscript::Unbounded,
            },
        }
    };

    (base.as_str(), Some(subscript))
}

/// Whether host names are searched in addition to group names.
pub fn matches_host_names(expr: &str) -> bool {
    expr.starts_with('~') || expr.contains(WILDCARD_CHARS)
}

/// A compiled name matcher for one pattern term.
#[derive(Debug, Clone)]
pub enum NameMatcher {
    /// fnmatch-style glob, anchored at both ends
    Glob(Regex),
    /// `~regex`, anchored at the start
    Regex(Regex),
}

impl NameMatcher {
    /// Compile a term (without subscript).
    pub fn compile(expr: &str) -> InventoryResult<Self> {
        if let Some(raw) = expr.strip_prefix('~') {
            let regex = Regex::new(&format!("^(?:{})", raw))
                .map_err(|e| InventoryError::InvalidPattern(format!("{}: {}", expr, e)))?;
            Ok(NameMatcher::Regex(regex))
        } else {
            let regex = Regex::new(&fnmatch_to_regex(expr))
                .map_err(|e| InventoryError::InvalidPattern(format!("{}: {}", expr, e)))?;
            Ok(NameMatcher::Glob(regex))
        }
    }

    /// Test one host or group name.
    pub fn is_match(&self, name: &str) -> bool {
        match self {
            NameMatcher::Glob(re) | NameMatcher::Regex(re) => re.is_match(name),
        }
    }
}

/// Convert an fnmatch pattern to an anchored regex.
///
/// `*` and `?` are wildcards, `[seq]` and `[!seq]` are character classes and
/// an unterminated `[` is literal.
pub fn fnmatch_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut regex = String::from("^(?s:");
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        i += 1;
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    regex.push_str("\\[");
                } else {
                    let mut class: String = chars[i..j].iter().collect();
                    class = class.replace('\\', "\\\\");
                    if let Some(rest) = class.strip_prefix('!') {
                        class = format!("^{}", rest);
                    } else if class.starts_with('^') {
                        class = format!("\\{}", class);
                    }
                    regex.push('[');
                    regex.push_str(&class);
                    regex.push(']');
                    i = j + 1;
                }
            }
            _ => regex.push_str(&regex::escape(&ch.to_string())),
        }
    }

    regex.push_str(")$");
    regex
}
