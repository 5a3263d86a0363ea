//! micromatch-flavoured globs.
//!
//! Supported syntax: `*`, `?`, `**` as a whole path segment, `[...]` classes
//! (`!` or `^` negates), `{a,b}` alternation, bare `(a|b)` groups, and the
//! extglobs `?(..)`, `*(..)`, `+(..)`, `@(..)`. A leading `!` negates the
//! whole glob. `!(..)` needs lookaround and is rejected.
//!
//! `*` also matches names starting with a dot.

use crate::error::GlobError;
use regex::Regex;

#[derive(Clone, Debug)]
pub struct Glob {
    source: String,
    negated: bool,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        let (negated, body) = match pattern.strip_prefix('!') {
            Some(rest) if !rest.starts_with('(') => (true, rest),
            _ => (false, pattern),
        };
        let body = body.strip_prefix("./").unwrap_or(body);

        let translated = translate(pattern, body)?;
        let regex = Regex::new(&format!("^{translated}$")).map_err(|source| GlobError::Regex {
            glob: pattern.to_owned(),
            source,
        })?;

        Ok(Self {
            source: pattern.to_owned(),
            negated,
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Whether `path` satisfies this glob, honoring a leading `!`.
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path) != self.negated
    }
}

/// An ordered list of globs evaluated together.
#[derive(Clone, Debug, Default)]
pub struct GlobSet {
    globs: Vec<Glob>,
}

impl GlobSet {
    pub fn new<I, S>(patterns: I) -> Result<Self, GlobError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let globs = patterns
            .into_iter()
            .map(|p| Glob::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { globs })
    }

    pub fn is_empty(&self) -> bool {
        self.globs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.globs.len()
    }

    /// Combined include/exclude semantics.
    ///
    /// A matching positive glob keeps the path, a matching negated glob
    /// drops it, and later globs override earlier ones. When every glob is
    /// negated the path is kept unless some glob dropped it. An empty set
    /// matches nothing.
    pub fn is_match(&self, path: &str) -> bool {
        if self.globs.is_empty() {
            return false;
        }

        let mut kept = None;
        let mut negatives = 0;
        for glob in &self.globs {
            let matched = glob.is_match(path);
            if glob.negated {
                negatives += 1;
                if !matched {
                    kept = Some(false);
                }
            } else if matched {
                kept = Some(true);
            }
        }

        if negatives == self.globs.len() {
            kept != Some(false)
        } else {
            kept == Some(true)
        }
    }

    /// True when any single glob matches `path` on its own.
    pub fn matches_any(&self, path: &str) -> bool {
        self.globs.iter().any(|glob| glob.is_match(path))
    }
}

enum Group {
    /// Parenthesized group, closed with the stored regex suffix.
    Paren(&'static str),
    Brace,
}

fn translate(glob: &str, body: &str) -> Result<String, GlobError> {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len() * 2);
    let mut stack: Vec<Group> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\\' => {
                match next {
                    Some(escaped) => push_literal(&mut out, escaped),
                    None => out.push_str(r"\\"),
                }
                i += 2;
                continue;
            }
            '*' if next == Some('*') => {
                let start = i;
                while chars.get(i) == Some(&'*') {
                    i += 1;
                }
                let segment_start = start == 0 || chars[start - 1] == '/';
                let segment_end = i == chars.len() || chars[i] == '/';
                if segment_start && segment_end {
                    if i < chars.len() {
                        out.push_str("(?:.*/)?");
                        i += 1;
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
                continue;
            }
            '*' | '?' | '+' | '@' if next == Some('(') => {
                stack.push(Group::Paren(match c {
                    '*' => ")*",
                    '?' => ")?",
                    '+' => ")+",
                    _ => ")",
                }));
                out.push_str("(?:");
                i += 2;
                continue;
            }
            '!' if next == Some('(') => {
                return Err(GlobError::Unsupported {
                    glob: glob.to_owned(),
                    construct: "!(...)",
                });
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '(' => {
                stack.push(Group::Paren(")"));
                out.push_str("(?:");
            }
            ')' => match stack.last() {
                Some(Group::Paren(close)) => {
                    out.push_str(close);
                    stack.pop();
                }
                _ => push_literal(&mut out, c),
            },
            '{' => {
                stack.push(Group::Brace);
                out.push_str("(?:");
            }
            '}' => match stack.last() {
                Some(Group::Brace) => {
                    out.push(')');
                    stack.pop();
                }
                _ => push_literal(&mut out, c),
            },
            ',' if matches!(stack.last(), Some(Group::Brace)) => out.push('|'),
            '|' if !stack.is_empty() => out.push('|'),
            '[' => match parse_class(&chars, i) {
                Some((class, end)) => {
                    out.push_str(&class);
                    i = end + 1;
                    continue;
                }
                None => push_literal(&mut out, c),
            },
            '/' => out.push('/'),
            _ => push_literal(&mut out, c),
        }
        i += 1;
    }

    if !stack.is_empty() {
        return Err(GlobError::Unclosed {
            glob: glob.to_owned(),
        });
    }
    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

/// Parses the class starting at `chars[start] == '['`, returning the regex
/// class and the index of the closing `]`.
fn parse_class(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start + 1;
    let mut out = String::from("[");
    if matches!(chars.get(i), Some('!') | Some('^')) {
        out.push_str("^/");
        i += 1;
    }
    // A `]` right after the opening bracket is literal.
    if chars.get(i) == Some(&']') {
        out.push_str(r"\]");
        i += 1;
    }

    while i < chars.len() {
        let c = chars[i];
        match c {
            ']' => {
                out.push(']');
                return Some((out, i));
            }
            '[' if chars.get(i + 1) == Some(&':') => {
                // POSIX class such as `[:alpha:]`, copied through verbatim.
                let close = (i + 2..chars.len().saturating_sub(1))
                    .find(|&j| chars[j] == ':' && chars[j + 1] == ']')?;
                out.extend(&chars[i..=close + 1]);
                i = close + 2;
                continue;
            }
            '\\' => {
                let escaped = *chars.get(i + 1)?;
                out.push('\\');
                out.push(escaped);
                i += 2;
                continue;
            }
            '[' | '&' | '~' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
        i += 1;
    }
    None
}
