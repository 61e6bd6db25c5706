//! Binding paths.
//!
//! A [`BindingPath`] is an immutable, ordered list of segments that identify a
//! value reachable from a root object: `User.Address.City`, `Items[0].Name`,
//! `Map["key"]`. The empty path denotes the root itself.
//!
//! Paths are interned: parsing the same text twice returns the same
//! `Arc<BindingPath>`, so callers can compare paths with [`Arc::ptr_eq`].
//!
//! # Grammar
//!
//! ```text
//! path     := "" | segment ( "." member | indexer )*
//! segment  := member | indexer
//! member   := ["#"] ident
//! indexer  := "[" arg ( "," arg )* "]"
//! arg      := integer | float | "true" | "false" | "null" | quoted | word
//! ```

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::error::{BindingError, Result};
use crate::provider::MemberProvider;
use crate::value::Value;

/// Member name under which indexers are registered.
pub const INDEXER_MEMBER: &str = "[]";

/// A literal indexer argument.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexArg {
    /// An integer literal.
    Int(i64),
    /// A floating point literal.
    Float(f64),
    /// A quoted string, or a bare word.
    Str(String),
    /// `true` or `false`.
    Bool(bool),
    /// `null`.
    Null,
}

impl IndexArg {
    /// The argument as a binding value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(v) => Value::new(*v),
            Self::Float(v) => Value::new(*v),
            Self::Str(v) => Value::new(v.clone()),
            Self::Bool(v) => Value::new(*v),
            Self::Null => Value::Null,
        }
    }

    /// The argument as an index, if it is a non-negative integer.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Int(v) => usize::try_from(*v).ok(),
            _ => None,
        }
    }

    /// The argument as a string key.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for IndexArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Self::Str(v) => {
                f.write_char('"')?;
                for c in v.chars() {
                    if c == '"' || c == '\\' {
                        f.write_char('\\')?;
                    }
                    f.write_char(c)?;
                }
                f.write_char('"')
            }
            Self::Bool(v) => write!(f, "{v}"),
            Self::Null => f.write_str("null"),
        }
    }
}

/// One step of a binding path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// A named member.
    Member(String),
    /// An indexer with literal arguments.
    Indexer(Vec<IndexArg>),
}

impl PathSegment {
    /// The member name used to resolve this segment.
    pub fn member_name(&self) -> &str {
        match self {
            Self::Member(name) => name,
            Self::Indexer(_) => INDEXER_MEMBER,
        }
    }

    /// Indexer arguments as values; empty for plain members.
    pub fn args(&self) -> Vec<Value> {
        match self {
            Self::Member(_) => Vec::new(),
            Self::Indexer(args) => args.iter().map(IndexArg::to_value).collect(),
        }
    }

    /// Whether this segment is an indexer.
    pub fn is_indexer(&self) -> bool {
        matches!(self, Self::Indexer(_))
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member(name) => f.write_str(name),
            Self::Indexer(args) => {
                f.write_char('[')?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_char(']')
            }
        }
    }
}

/// An immutable, interned member path.
#[derive(Debug, PartialEq)]
pub struct BindingPath {
    text: String,
    segments: Vec<PathSegment>,
    parts: Vec<String>,
}

static EMPTY_PATH: LazyLock<Arc<BindingPath>> = LazyLock::new(|| {
    Arc::new(BindingPath {
        text: String::new(),
        segments: Vec::new(),
        parts: Vec::new(),
    })
});

static PATH_CACHE: LazyLock<RwLock<HashMap<String, Arc<BindingPath>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

impl BindingPath {
    /// Parse and intern a path.
    ///
    /// Equal input strings yield the same instance; inputs that differ only
    /// in formatting share the instance of their canonical form.
    pub fn parse(text: &str) -> Result<Arc<BindingPath>> {
        if text.trim().is_empty() {
            return Ok(Self::empty());
        }
        if let Some(path) = PATH_CACHE.read().get(text) {
            return Ok(path.clone());
        }

        let segments = Parser::new(text).parse()?;
        let parts: Vec<String> = segments.iter().map(ToString::to_string).collect();
        let canonical = join_parts(&parts);

        let mut cache = PATH_CACHE.write();
        let path = match cache.get(&canonical) {
            Some(existing) => existing.clone(),
            None => {
                let path = Arc::new(BindingPath {
                    text: canonical.clone(),
                    segments,
                    parts,
                });
                cache.insert(canonical, path.clone());
                tracing::trace!(target: "trellis_core::path", path = %path.text, "path interned");
                path
            }
        };
        cache.entry(text.to_string()).or_insert_with(|| path.clone());
        Ok(path)
    }

    /// The empty path, shared by every caller.
    pub fn empty() -> Arc<BindingPath> {
        EMPTY_PATH.clone()
    }

    /// The canonical text of the path.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The segments of the path.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// The canonical text of each segment (`"Items"`, `"[0]"`).
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the empty path.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether the path has exactly one segment.
    pub fn is_single(&self) -> bool {
        self.segments.len() == 1
    }

    /// The last segment, if any.
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }
}

impl fmt::Display for BindingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn join_parts(parts: &[String]) -> String {
    parts
        .iter()
        .fold(String::new(), |acc, part| merge_path(&acc, part))
}

/// Concatenate two path fragments.
///
/// Inserts `.` unless `right` starts with `[`; an empty side yields the other.
pub fn merge_path(left: &str, right: &str) -> String {
    if right.is_empty() {
        return left.to_string();
    }
    if left.is_empty() {
        return right.to_string();
    }
    if right.starts_with('[') {
        format!("{left}{right}")
    } else {
        format!("{left}.{right}")
    }
}

/// Concatenate any number of path fragments with [`merge_path`].
pub fn merge_paths<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .fold(String::new(), |acc, item| merge_path(&acc, item.as_ref()))
}

/// Evaluate a path once against `root`, without subscribing to anything.
///
/// Returns [`Value::Null`] as soon as an intermediate value is null or unset.
/// Unknown members are configuration errors.
pub fn get_value_from_path(provider: &MemberProvider, root: &Value, path: &str) -> Result<Value> {
    let path = BindingPath::parse(path)?;
    let mut current = root.clone();
    for segment in path.segments() {
        let Some(type_id) = current.object_type_id() else {
            return Ok(Value::Null);
        };
        let member = provider.try_get_member(type_id, segment.member_name(), false)?;
        current = member.get_value(&current, &segment.args())?;
    }
    Ok(current)
}

/// Recursive-descent parser over a path string.
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

    fn error(&self, message: impl Into<String>) -> BindingError {
        BindingError::invalid_path(self.text, self.pos, message)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> Result<Vec<PathSegment>> {
        let mut segments = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some('[') {
            segments.push(self.indexer()?);
        } else {
            segments.push(self.member()?);
        }

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some('.') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    segments.push(self.member()?);
                }
                Some('[') => segments.push(self.indexer()?),
                Some(c) => return Err(self.error(format!("unexpected character '{c}'"))),
            }
        }
        Ok(segments)
    }

    fn member(&mut self) -> Result<PathSegment> {
        let start = self.pos;
        if self.peek() == Some('#') {
            self.pos += 1;
        }
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => {}
            Some('.') | None => return Err(self.error("empty member name")),
            Some(c) => return Err(self.error(format!("illegal character '{c}' in member name"))),
        }
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        Ok(PathSegment::Member(self.chars[start..self.pos].iter().collect()))
    }

    fn indexer(&mut self) -> Result<PathSegment> {
        // Consume '['.
        self.pos += 1;
        let mut args = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(self.error("unterminated indexer")),
                Some(']') if args.is_empty() => return Err(self.error("empty indexer")),
                _ => args.push(self.argument()?),
            }
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(PathSegment::Indexer(args));
                }
                None => return Err(self.error("unterminated indexer")),
                Some(c) => return Err(self.error(format!("unexpected character '{c}' in indexer"))),
            }
        }
    }

    fn argument(&mut self) -> Result<IndexArg> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => self.quoted(quote),
            Some(',') | Some(']') => Err(self.error("empty indexer argument")),
            _ => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c != ',' && c != ']' && !c.is_whitespace())
                {
                    self.pos += 1;
                }
                let word: String = self.chars[start..self.pos].iter().collect();
                Ok(literal(&word))
            }
        }
    }

    fn quoted(&mut self, quote: char) -> Result<IndexArg> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    self.pos = start;
                    return Err(self.error("unterminated string literal"));
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => value.push(c),
                        None => return Err(self.error("unterminated escape sequence")),
                    }
                    self.pos += 1;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(IndexArg::Str(value));
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
    }
}

fn literal(word: &str) -> IndexArg {
    match word {
        "true" => IndexArg::Bool(true),
        "false" => IndexArg::Bool(false),
        "null" => IndexArg::Null,
        _ => {
            if let Ok(v) = word.parse::<i64>() {
                IndexArg::Int(v)
            } else if let Ok(v) = word.parse::<f64>() {
                IndexArg::Float(v)
            } else {
                IndexArg::Str(word.to_string())
            }
        }
    }
}

static_assertions::assert_impl_all!(BindingPath: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_members() {
        let path = BindingPath::parse("User.Address.City").unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.parts(), &["User", "Address", "City"]);
        assert_eq!(path.to_string(), "User.Address.City");
        assert!(!path.is_single());
    }

    #[test]
    fn test_parse_indexers() {
        let path = BindingPath::parse("Items[0].Map[\"key\", 2]").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Member("Items".into()),
                PathSegment::Indexer(vec![IndexArg::Int(0)]),
                PathSegment::Member("Map".into()),
                PathSegment::Indexer(vec![IndexArg::Str("key".into()), IndexArg::Int(2)]),
            ]
        );
        assert_eq!(path.as_str(), "Items[0].Map[\"key\",2]");
        assert_eq!(path.segments()[1].member_name(), INDEXER_MEMBER);
    }

    #[test]
    fn test_leading_indexer_and_literals() {
        let path = BindingPath::parse("[1.5, true, null, 'a\\'b', word]").unwrap();
        assert_eq!(
            path.segments(),
            &[PathSegment::Indexer(vec![
                IndexArg::Float(1.5),
                IndexArg::Bool(true),
                IndexArg::Null,
                IndexArg::Str("a'b".into()),
                IndexArg::Str("word".into()),
            ])]
        );
        assert!(path.is_single());
    }

    #[test]
    fn test_parse_is_interned() {
        let a = BindingPath::parse("Interned.Path").unwrap();
        let b = BindingPath::parse("Interned.Path").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let spaced = BindingPath::parse("Interned . Path").unwrap();
        assert!(Arc::ptr_eq(&a, &spaced));
    }

    #[test]
    fn test_parse_idempotence() {
        for text in ["A", "A.B", "A[0]", "A[ \"x\" ,1].B", "[2]", "#Parent.Name", "M[1.0]"] {
            let first = BindingPath::parse(text).unwrap();
            let second = BindingPath::parse(&first.to_string()).unwrap();
            assert_eq!(first.to_string(), second.to_string());
            assert!(Arc::ptr_eq(&first, &second));
        }
    }

    #[test]
    fn test_empty_path() {
        let empty = BindingPath::parse("").unwrap();
        assert!(empty.is_empty());
        assert!(Arc::ptr_eq(&empty, &BindingPath::empty()));
        assert!(Arc::ptr_eq(&BindingPath::parse("  ").unwrap(), &empty));
        assert_eq!(empty.to_string(), "");
    }

    #[test]
    fn test_parse_errors() {
        for text in ["A..B", ".A", "A.", "A[", "A[]", "A[1,]", "A[\"x]", "A.1B", "A B"] {
            let err = BindingPath::parse(text).unwrap_err();
            assert!(
                matches!(err, BindingError::InvalidPath { .. }),
                "expected InvalidPath for {text:?}, got {err:?}"
            );
            assert!(err.is_configuration());
        }
    }

    #[test]
    fn test_merge_path() {
        assert_eq!(merge_path("", "Foo"), "Foo");
        assert_eq!(merge_path("Foo", ""), "Foo");
        assert_eq!(merge_path("Foo", "Bar"), "Foo.Bar");
        assert_eq!(merge_path("Foo", "[0]"), "Foo[0]");
        assert_eq!(merge_paths(&["DataContext", "Items", "[1]", "Name"]), "DataContext.Items[1].Name");
        assert_eq!(merge_paths::<&str>(&[]), "");
    }

    #[test]
    fn test_index_arg_values() {
        assert_eq!(IndexArg::Int(3).to_value().get::<i64>(), Some(3));
        assert_eq!(IndexArg::Int(3).as_index(), Some(3));
        assert_eq!(IndexArg::Int(-1).as_index(), None);
        assert!(IndexArg::Null.to_value().is_null());
        assert_eq!(IndexArg::Str("k".into()).as_key(), Some("k"));
    }
}
