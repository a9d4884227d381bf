//! Node filter expressions.
//!
//! An expression is a whitespace separated list of terms:
//!
//! * `key:value` selects nodes whose attribute `key` equals `value`
//! * `key:a,b` selects nodes matching any of the values
//! * `tags:a+b` selects nodes carrying every listed tag
//! * `!term` excludes the nodes the term matches
//! * a bare token is a node name, so `web-01,web-02` lists nodes by name
//!
//! Values holding regex metacharacters are anchored patterns (`name:web-.*`),
//! anything else is compared exactly. Quote values that contain spaces or
//! separators: `description:"db primary"`.

use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const NAME_KEY: &str = "nodename";
const TAGS_KEY: &str = "tags";
const PATTERN_CHARS: &[char] = &['*', '?', '[', ']', '(', ')', '{', '}', '|', '^', '$', '\\'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("filter expression is empty")]
    Empty,
    #[error("missing attribute name before ':' at offset {0}")]
    EmptyKey(usize),
    #[error("missing value for attribute `{0}`")]
    EmptyValue(String),
    #[error("'!' at offset {0} is not followed by a term")]
    DanglingNegation(usize),
    #[error("unterminated quote starting at offset {0}")]
    UnterminatedQuote(usize),
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("cannot mix ',' and '+' in the values of `{0}`")]
    MixedOperators(String),
    #[error("expected whitespace between terms at offset {0}")]
    MissingSeparator(usize),
}

/// What a selector needs to know about a node.
pub trait NodeAttributes {
    /// Looks up a named attribute. `nodename`/`name`, `hostname` and
    /// `username` are expected to resolve alongside free-form attributes.
    fn attribute(&self, key: &str) -> Option<Cow<'_, str>>;

    fn tags(&self) -> &[String];
}

#[derive(Debug, Clone)]
enum ValueMatcher {
    Exact(String),
    Pattern(Regex),
}

impl ValueMatcher {
    fn compile(raw: &str, plus_is_separator: bool) -> Result<Self, SelectorError> {
        let is_pattern = raw.contains(PATTERN_CHARS) || (!plus_is_separator && raw.contains('+'));
        if !is_pattern {
            return Ok(ValueMatcher::Exact(raw.to_string()));
        }
        Regex::new(&format!("^(?:{raw})$"))
            .map(ValueMatcher::Pattern)
            .map_err(|e| SelectorError::InvalidPattern {
                pattern: raw.to_string(),
                reason: e.to_string(),
            })
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            ValueMatcher::Exact(expected) => expected == candidate,
            ValueMatcher::Pattern(regex) => regex.is_match(candidate),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Any,
    All,
}

#[derive(Debug, Clone)]
struct Term {
    key: String,
    values: Vec<ValueMatcher>,
    combinator: Combinator,
}

impl Term {
    fn matches<N: NodeAttributes + ?Sized>(&self, node: &N) -> bool {
        if self.key == TAGS_KEY {
            let tags = node.tags();
            let has = |value: &ValueMatcher| tags.iter().any(|tag| value.matches(tag));
            return match self.combinator {
                Combinator::Any => self.values.iter().any(has),
                Combinator::All => self.values.iter().all(has),
            };
        }
        let Some(actual) = node.attribute(&self.key) else {
            return false;
        };
        match self.combinator {
            Combinator::Any => self.values.iter().any(|v| v.matches(&actual)),
            Combinator::All => self.values.iter().all(|v| v.matches(&actual)),
        }
    }
}

/// A parsed node filter.
#[derive(Debug, Clone)]
pub struct NodeSelector {
    expression: String,
    includes: Vec<Term>,
    excludes: Vec<Term>,
}

impl NodeSelector {
    pub fn parse(expression: &str) -> Result<Self, SelectorError> {
        let mut scanner = Scanner::new(expression);
        let mut includes = Vec::new();
        let mut excludes = Vec::new();

        loop {
            scanner.skip_whitespace();
            if scanner.is_done() {
                break;
            }
            let offset = scanner.pos;
            let negated = scanner.eat('!');
            if negated && scanner.at_term_boundary() {
                return Err(SelectorError::DanglingNegation(offset));
            }
            let term = parse_term(&mut scanner)?;
            if !scanner.at_term_boundary() {
                return Err(SelectorError::MissingSeparator(scanner.pos));
            }
            if negated {
                excludes.push(term);
            } else {
                includes.push(term);
            }
        }

        if includes.is_empty() && excludes.is_empty() {
            return Err(SelectorError::Empty);
        }
        Ok(Self {
            expression: expression.trim().to_string(),
            includes,
            excludes,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// All include terms match and no exclude term does. An expression made
    /// only of exclusions starts from every node.
    pub fn matches<N: NodeAttributes + ?Sized>(&self, node: &N) -> bool {
        self.includes.iter().all(|term| term.matches(node))
            && !self.excludes.iter().any(|term| term.matches(node))
    }
}

impl FromStr for NodeSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeSelector::parse(s)
    }
}

impl fmt::Display for NodeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_term(scanner: &mut Scanner<'_>) -> Result<Term, SelectorError> {
    let start = scanner.pos;

    if scanner.peek() == Some('"') {
        let name = scanner.read_value(false)?;
        if name.is_empty() {
            return Err(SelectorError::EmptyValue(NAME_KEY.to_string()));
        }
        return Ok(Term {
            key: NAME_KEY.to_string(),
            values: vec![ValueMatcher::compile(&name, false)?],
            combinator: Combinator::Any,
        });
    }

    let head = scanner.read_while(|c| c != ':' && !c.is_whitespace());
    if !scanner.eat(':') {
        // Bare node names, optionally comma separated.
        let values = head
            .split(',')
            .map(|name| {
                if name.is_empty() {
                    Err(SelectorError::EmptyValue(NAME_KEY.to_string()))
                } else {
                    ValueMatcher::compile(name, false)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Term {
            key: NAME_KEY.to_string(),
            values,
            combinator: Combinator::Any,
        });
    }

    if head.is_empty() {
        return Err(SelectorError::EmptyKey(start));
    }
    let key = match head {
        "name" => NAME_KEY.to_string(),
        other => other.to_string(),
    };
    let plus_is_separator = key == TAGS_KEY;

    scanner.skip_whitespace();
    let mut values = Vec::new();
    let mut combinator = None;
    loop {
        let value = scanner.read_value(plus_is_separator)?;
        if value.is_empty() {
            return Err(SelectorError::EmptyValue(key));
        }
        values.push(ValueMatcher::compile(&value, plus_is_separator)?);

        let next = if scanner.eat(',') {
            Combinator::Any
        } else if plus_is_separator && scanner.eat('+') {
            Combinator::All
        } else {
            break;
        };
        match combinator {
            Some(existing) if existing != next => return Err(SelectorError::MixedOperators(key)),
            _ => combinator = Some(next),
        }
    }

    Ok(Term {
        key,
        values,
        combinator: combinator.unwrap_or(Combinator::Any),
    })
}

struct Scanner<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn at_term_boundary(&self) -> bool {
        self.peek().is_none_or(char::is_whitespace)
    }

    fn skip_whitespace(&mut self) {
        self.read_while(char::is_whitespace);
    }

    fn read_while(&mut self, keep: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !keep(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.source[start..self.pos]
    }

    /// Reads one value: a quoted string, or a token ending at whitespace,
    /// `,` or (for tag lists) `+`.
    fn read_value(&mut self, plus_is_separator: bool) -> Result<String, SelectorError> {
        if self.peek() == Some('"') {
            let open = self.pos;
            self.bump();
            let inner = self.read_while(|c| c != '"');
            if !self.eat('"') {
                return Err(SelectorError::UnterminatedQuote(open));
            }
            return Ok(inner.to_string());
        }
        let token = self.read_while(|c| {
            !c.is_whitespace() && c != ',' && !(plus_is_separator && c == '+')
        });
        Ok(token.to_string())
    }
}
