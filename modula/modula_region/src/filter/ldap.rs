//! LDAP-style filter expressions over typed attribute maps.
//!
//! Supported syntax:
//!
//! ```text
//! (&(f1)(f2)...)   conjunction
//! (|(f1)(f2)...)   disjunction
//! (!(f))           negation
//! (attr=value)     equality; `*` in the value makes it a substring match
//! (attr=*)         presence
//! (attr~=value)    approximate (case and whitespace insensitive)
//! (attr>=value)    ordering
//! (attr<=value)
//! ```
//!
//! Attribute names are case-insensitive. Values may escape `(`, `)`, `*`
//! and `\` with a backslash.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use modula_core::error::FilterError;
use modula_core::Version;
use serde::{Deserialize, Serialize};

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrValue {
    /// A string
    String(String),

    /// A signed integer
    Integer(i64),

    /// A boolean
    Boolean(bool),

    /// A version, compared with version ordering
    Version(Version),

    /// A multi-valued attribute; matches when any element matches
    List(Vec<AttrValue>),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Version> for AttrValue {
    fn from(value: Version) -> Self {
        Self::Version(value)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values.into_iter().map(AttrValue::String).collect())
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Version(v) => write!(f, "{}", v),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(|item| item.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Attributes describing an object for filter evaluation.
///
/// Keys are stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    /// Create an empty attribute map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attribute, replacing any previous value.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<AttrValue>) {
        self.0.insert(key.as_ref().to_lowercase(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<AttrValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up an attribute.
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(&key.to_lowercase())
    }

    /// Whether the attribute is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterate over attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.0.iter()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        attr: String,
        op: Op,
        value: String,
    },
    Present(String),
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
}

/// A parsed filter expression.
///
/// Filters keep the text they were parsed from, which is what they display
/// and serialize as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Filter {
    text: String,
    expr: Expr,
}

impl Filter {
    /// Parse a filter string.
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let mut parser = Parser::new(text);
        parser.skip_whitespace();
        let expr = parser.parse_filter()?;
        parser.skip_whitespace();
        if parser.pos < parser.chars.len() {
            return Err(parser.error("unexpected trailing characters"));
        }
        Ok(Self {
            text: text.trim().to_string(),
            expr,
        })
    }

    /// The filter text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Evaluate the filter against `attributes`.
    pub fn matches(&self, attributes: &Attributes) -> bool {
        evaluate(&self.expr, attributes)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Filter {
    type Error = FilterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Filter> for String {
    fn from(filter: Filter) -> Self {
        filter.text
    }
}

struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: &str) -> FilterError {
        FilterError::Syntax {
            filter: self.text.to_string(),
            position: self.pos,
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected)))
        }
    }

    fn parse_filter(&mut self) -> Result<Expr, FilterError> {
        self.expect('(')?;
        self.skip_whitespace();
        let expr = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Expr::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Expr::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_whitespace();
                Expr::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_whitespace();
        self.expect(')')?;
        Ok(expr)
    }

    fn parse_list(&mut self) -> Result<Vec<Expr>, FilterError> {
        let mut list = Vec::new();
        self.skip_whitespace();
        while self.peek() == Some('(') {
            list.push(self.parse_filter()?);
            self.skip_whitespace();
        }
        if list.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(list)
    }

    fn parse_item(&mut self) -> Result<Expr, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect();
        let attr = attr.trim().to_lowercase();
        if attr.is_empty() {
            return Err(self.error("missing attribute name"));
        }

        let op = match (self.peek(), self.chars.get(self.pos + 1).copied()) {
            (Some('='), _) => {
                self.pos += 1;
                Op::Equal
            }
            (Some('~'), Some('=')) => {
                self.pos += 2;
                Op::Approx
            }
            (Some('>'), Some('=')) => {
                self.pos += 2;
                Op::GreaterEq
            }
            (Some('<'), Some('=')) => {
                self.pos += 2;
                Op::LessEq
            }
            _ => return Err(self.error("invalid operator")),
        };

        let parts = self.parse_value()?;
        if op != Op::Equal || parts.len() == 1 {
            if parts.len() > 1 {
                return Err(self.error("wildcard only allowed with '='"));
            }
            let value = parts.into_iter().next().unwrap_or_default();
            return Ok(Expr::Compare { attr, op, value });
        }

        if parts.len() == 2 && parts.iter().all(String::is_empty) {
            return Ok(Expr::Present(attr));
        }

        let last_index = parts.len() - 1;
        let mut initial = None;
        let mut any = Vec::new();
        let mut last = None;
        for (index, part) in parts.into_iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            if index == 0 {
                initial = Some(part);
            } else if index == last_index {
                last = Some(part);
            } else {
                any.push(part);
            }
        }
        Ok(Expr::Substring {
            attr,
            initial,
            any,
            last,
        })
    }

    /// Read a value up to the closing parenthesis, split on unescaped `*`.
    fn parse_value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    if let Some(current) = parts.last_mut() {
                        current.push(escaped);
                    }
                    self.pos += 1;
                }
                Some('*') => {
                    parts.push(String::new());
                    self.pos += 1;
                }
                Some(c) => {
                    if let Some(current) = parts.last_mut() {
                        current.push(c);
                    }
                    self.pos += 1;
                }
            }
        }
        Ok(parts)
    }
}

fn evaluate(expr: &Expr, attributes: &Attributes) -> bool {
    match expr {
        Expr::And(list) => list.iter().all(|e| evaluate(e, attributes)),
        Expr::Or(list) => list.iter().any(|e| evaluate(e, attributes)),
        Expr::Not(inner) => !evaluate(inner, attributes),
        Expr::Present(attr) => attributes.contains_key(attr),
        Expr::Compare { attr, op, value } => attributes
            .get(attr)
            .map_or(false, |actual| compare(actual, *op, value)),
        Expr::Substring {
            attr,
            initial,
            any,
            last,
        } => attributes.get(attr).map_or(false, |actual| {
            substring(actual, initial.as_deref(), any, last.as_deref())
        }),
    }
}

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn compare(actual: &AttrValue, op: Op, operand: &str) -> bool {
    match actual {
        AttrValue::String(s) => match op {
            Op::Equal => s == operand,
            Op::Approx => normalize(s) == normalize(operand),
            Op::GreaterEq => s.as_str() >= operand,
            Op::LessEq => s.as_str() <= operand,
        },
        AttrValue::Integer(i) => match operand.trim().parse::<i64>() {
            Ok(other) => match op {
                Op::Equal | Op::Approx => *i == other,
                Op::GreaterEq => *i >= other,
                Op::LessEq => *i <= other,
            },
            Err(_) => false,
        },
        AttrValue::Boolean(b) => match operand.trim().to_lowercase().as_str() {
            "true" => matches!(op, Op::Equal | Op::Approx) && *b,
            "false" => matches!(op, Op::Equal | Op::Approx) && !*b,
            _ => false,
        },
        AttrValue::Version(v) => match operand.trim().parse::<Version>() {
            Ok(other) => match op {
                Op::Equal | Op::Approx => *v == other,
                Op::GreaterEq => *v >= other,
                Op::LessEq => *v <= other,
            },
            Err(_) => false,
        },
        AttrValue::List(items) => items.iter().any(|item| compare(item, op, operand)),
    }
}

fn substring(actual: &AttrValue, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    if let AttrValue::List(items) = actual {
        return items.iter().any(|item| substring(item, initial, any, last));
    }

    let text = actual.to_string();
    let mut rest = text.as_str();

    if let Some(prefix) = initial {
        match rest.strip_prefix(prefix) {
            Some(remaining) => rest = remaining,
            None => return false,
        }
    }

    let mut end = rest.len();
    if let Some(suffix) = last {
        if !rest.ends_with(suffix) {
            return false;
        }
        end -= suffix.len();
    }
    let mut middle = &rest[..end];

    for piece in any {
        match middle.find(piece.as_str()) {
            Some(index) => middle = &middle[index + piece.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> Attributes {
        Attributes::new()
            .with("bundle-symbolic-name", "org.example.app")
            .with("bundle-version", Version::new(1, 4, 0))
            .with("ranking", 10i64)
            .with("exported", true)
            .with(
                "objectClass",
                vec!["org.example.Service".to_string(), "org.example.Other".to_string()],
            )
    }

    #[test]
    fn test_equality_and_presence() {
        let a = attrs();
        assert!(Filter::parse("(bundle-symbolic-name=org.example.app)").unwrap().matches(&a));
        assert!(!Filter::parse("(bundle-symbolic-name=org.other)").unwrap().matches(&a));
        assert!(Filter::parse("(ranking=*)").unwrap().matches(&a));
        assert!(!Filter::parse("(missing=*)").unwrap().matches(&a));
        assert!(Filter::parse("(exported=true)").unwrap().matches(&a));
    }

    #[test]
    fn test_attribute_names_are_case_insensitive() {
        let a = attrs();
        assert!(Filter::parse("(Bundle-SymbolicName=x)").is_ok());
        assert!(Filter::parse("(OBJECTCLASS=org.example.Service)").unwrap().matches(&a));
    }

    #[test]
    fn test_ordering_by_type() {
        let a = attrs();
        assert!(Filter::parse("(bundle-version>=1.2)").unwrap().matches(&a));
        assert!(!Filter::parse("(bundle-version>=1.10)").unwrap().matches(&a));
        assert!(Filter::parse("(ranking<=10)").unwrap().matches(&a));
        assert!(!Filter::parse("(ranking>=11)").unwrap().matches(&a));
    }

    #[test]
    fn test_composites() {
        let a = attrs();
        let f = Filter::parse("(&(bundle-symbolic-name=org.example.*)(!(ranking<=5)))").unwrap();
        assert!(f.matches(&a));
        let f = Filter::parse("(|(ranking=1)(objectClass=org.example.Other))").unwrap();
        assert!(f.matches(&a));
        let f = Filter::parse("(|(!(all=*))(all=*))").unwrap();
        assert!(f.matches(&Attributes::new()));
    }

    #[test]
    fn test_substring_and_approx() {
        let a = attrs();
        assert!(Filter::parse("(bundle-symbolic-name=*example*)").unwrap().matches(&a));
        assert!(Filter::parse("(bundle-symbolic-name=org*app)").unwrap().matches(&a));
        assert!(!Filter::parse("(bundle-symbolic-name=*core)").unwrap().matches(&a));
        assert!(Filter::parse("(bundle-symbolic-name~=ORG.Example.App )").unwrap().matches(&a));
    }

    #[test]
    fn test_escaped_values() {
        let a = Attributes::new().with("name", "a*b(c)");
        assert!(Filter::parse(r"(name=a\*b\(c\))").unwrap().matches(&a));
    }

    #[test]
    fn test_syntax_errors() {
        for bad in [
            "",
            "name=x",
            "(name=x",
            "(=x)",
            "(&)",
            "(name>x)",
            "(name=x))",
            "(name=a(b)",
            "(name>=a*)",
        ] {
            assert!(
                matches!(Filter::parse(bad), Err(FilterError::Syntax { .. })),
                "expected syntax error for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_serializes_as_text() {
        let filter = Filter::parse("(a=b)").unwrap();
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, "\"(a=b)\"");
        let back: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }
}
