use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Segment that matches every child when used in a write.
pub const WILDCARD: &str = "*";

/// Key is a single segment of a keypath: a list position or a mapping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Key {
    /// Position inside an ordered collection.
    Index(usize),
    /// Key inside a keyed mapping.
    Name(String),
}

impl Key {
    /// Parse an unescaped segment.
    ///
    /// Only canonical decimals (`0`, or digits without a leading zero) become
    /// [`Key::Index`], so `"007"` stays a name.
    pub fn parse(segment: &str) -> Self {
        let canonical = segment == "0"
            || (!segment.starts_with('0')
                && !segment.is_empty()
                && segment.bytes().all(|b| b.is_ascii_digit()));
        if canonical {
            if let Ok(index) = segment.parse() {
                return Key::Index(index);
            }
        }
        Key::Name(segment.to_string())
    }

    /// Returns the position if this is an index key.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(index) => Some(*index),
            Key::Name(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{}", index),
            Key::Name(name) => f.write_str(name),
        }
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

/// Keypath is the stable identity of a location in the value graph.
///
/// Segments are joined with `.`; the empty keypath is the root. Inside a
/// segment a backslash escapes `.`, itself and a lone `*`. Cloning is cheap.
///
/// # Examples
///
/// ```
/// # use render_flow::{Key, Keypath};
/// let items = Keypath::parse("todos.items");
/// let first = items.join(&Key::Index(0));
/// assert_eq!(first.as_str(), "todos.items.0");
/// assert_eq!(first.parent(), Some(items.clone()));
/// assert!(items.is_ancestor_of(&first));
/// assert_eq!(items.relative_child(&first), Some(Key::Index(0)));
///
/// let dotted = items.join(&Key::from("a.b"));
/// assert_eq!(dotted.as_str(), "todos.items.a\\.b");
/// assert_eq!(dotted.last_key(), Some(Key::from("a.b")));
/// assert_eq!(Keypath::parse("todos.items[0]"), first);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Keypath(Arc<str>);

impl Keypath {
    /// The root keypath.
    pub fn root() -> Self {
        Keypath(Arc::from(""))
    }

    /// Parse a dotted keypath.
    ///
    /// Empty segments are dropped and `[n]` is read as `.n`.
    pub fn parse(path: &str) -> Self {
        let path = normalize_brackets(path);
        let normalized: Vec<Cow<'_, str>> = split_segments(&path)
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == WILDCARD {
                    Cow::Borrowed(s)
                } else {
                    Cow::Owned(escape(&unescape(s)))
                }
            })
            .collect();
        Keypath(Arc::from(normalized.join(".")))
    }

    /// Get the dotted representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the root keypath.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the segments of this keypath.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.raw_segments()
            .into_iter()
            .map(|s| Key::parse(&unescape(s)))
    }

    /// Segments as written, escapes included.
    pub(crate) fn raw_segments(&self) -> Vec<&str> {
        if self.is_root() {
            return Vec::new();
        }
        split_segments(&self.0)
    }

    /// Returns true if any segment is the [`WILDCARD`].
    pub fn is_pattern(&self) -> bool {
        self.raw_segments().contains(&WILDCARD)
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.raw_segments().len()
    }

    /// Get the child keypath for `key`.
    pub fn join(&self, key: &Key) -> Self {
        let segment = escape(&key.to_string());
        if self.is_root() {
            Keypath(Arc::from(segment))
        } else {
            Keypath(Arc::from(format!("{}.{}", self.0, segment)))
        }
    }

    /// Get the parent keypath. The root has no parent.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let last = self.raw_segments().last().map_or(0, |s| s.len());
        match self.0.len().checked_sub(last + 1) {
            Some(at) => Some(Keypath(Arc::from(&self.0[..at]))),
            None => Some(Self::root()),
        }
    }

    /// First segment, if any.
    pub fn first_key(&self) -> Option<Key> {
        self.keys().next()
    }

    /// Last segment, if any.
    pub fn last_key(&self) -> Option<Key> {
        self.keys().last()
    }

    /// Returns true if `other` lies strictly below this keypath.
    pub fn is_ancestor_of(&self, other: &Keypath) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&*self.0)
            && other.0.as_bytes()[self.0.len()] == b'.'
    }

    /// Returns true if the two keypaths are equal or one contains the other.
    pub fn overlaps(&self, other: &Keypath) -> bool {
        self == other || self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Get the segment directly below this keypath on the way to `descendant`.
    pub fn relative_child(&self, descendant: &Keypath) -> Option<Key> {
        if !self.is_ancestor_of(descendant) {
            return None;
        }
        let rest = if self.is_root() {
            &descendant.0[..]
        } else {
            &descendant.0[self.0.len() + 1..]
        };
        split_segments(rest)
            .first()
            .map(|s| Key::parse(&unescape(s)))
    }

    /// Iterate over the strict ancestors of this keypath, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = Keypath> {
        std::iter::successors(self.parent(), |p| p.parent())
    }
}

/// Split on dots that are not escaped.
fn split_segments(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (at, byte) in path.bytes().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' => escaped = true,
            b'.' => {
                segments.push(&path[start..at]);
                start = at + 1;
            }
            _ => {}
        }
    }
    segments.push(&path[start..]);
    segments
}

fn escape(name: &str) -> String {
    if name == WILDCARD {
        return format!("\\{}", WILDCARD);
    }
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '.' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape(segment: &str) -> Cow<'_, str> {
    if !segment.contains('\\') {
        return Cow::Borrowed(segment);
    }
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Rewrite `[n]` as `.n`. Brackets holding anything but digits are kept.
fn normalize_brackets(path: &str) -> Cow<'_, str> {
    if !path.contains('[') {
        return Cow::Borrowed(path);
    }
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let index = after.find(']').and_then(|close| {
            let inner = after[..close].trim();
            let digits = !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit());
            digits.then_some((inner, close))
        });
        match index {
            Some((inner, close)) => {
                out.push('.');
                out.push_str(inner);
                rest = &after[close + 1..];
            }
            None => {
                out.push('[');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

impl fmt::Debug for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypath({:?})", &*self.0)
    }
}

impl fmt::Display for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Keypath {
    fn from(path: &str) -> Self {
        Keypath::parse(path)
    }
}

impl From<String> for Keypath {
    fn from(path: String) -> Self {
        Keypath::parse(&path)
    }
}

impl From<&Keypath> for Keypath {
    fn from(path: &Keypath) -> Self {
        path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_empty_segments() {
        assert_eq!(Keypath::parse("a..b.").as_str(), "a.b");
        assert!(Keypath::parse("").is_root());
        assert_eq!(Keypath::parse("a.b.c").depth(), 3);
    }

    #[test]
    fn test_key_parse() {
        assert_eq!(Key::parse("12"), Key::Index(12));
        assert_eq!(Key::parse("0"), Key::Index(0));
        assert_eq!(Key::parse("x1"), Key::Name("x1".into()));
        assert_eq!(Key::parse(""), Key::Name(String::new()));
        assert_eq!(Key::parse("007"), Key::Name("007".into()));
        assert_eq!(Key::parse("00"), Key::Name("00".into()));
        assert_eq!(
            Key::parse("99999999999999999999999999"),
            Key::Name("99999999999999999999999999".into())
        );
    }

    #[test]
    fn test_dotted_names_are_escaped() {
        let map = Keypath::parse("m");
        let dotted = map.join(&Key::from("a.b"));
        assert_eq!(dotted.as_str(), "m.a\\.b");
        assert_eq!(dotted.depth(), 2);
        assert_eq!(
            dotted.keys().collect::<Vec<_>>(),
            vec![Key::from("m"), Key::from("a.b")]
        );
        assert_eq!(dotted.parent(), Some(map.clone()));
        assert_eq!(dotted.last_key(), Some(Key::from("a.b")));
        assert_eq!(map.relative_child(&dotted.join(&Key::Index(1))), Some(Key::from("a.b")));
        assert_eq!(Keypath::parse(dotted.as_str()), dotted);

        let slashed = map.join(&Key::from("x\\"));
        assert_eq!(slashed.last_key(), Some(Key::from("x\\")));
        let below = slashed.join(&Key::from("y"));
        assert_eq!(below.parent(), Some(slashed.clone()));
        assert!(slashed.is_ancestor_of(&below));
    }

    #[test]
    fn test_numeric_looking_names_round_trip() {
        let path = Keypath::parse("m").join(&Key::from("007"));
        assert_eq!(path.last_key(), Some(Key::from("007")));
        assert_eq!(Keypath::parse("m.7").last_key(), Some(Key::Index(7)));
    }

    #[test]
    fn test_brackets_and_wildcards() {
        assert_eq!(Keypath::parse("items[0].name").as_str(), "items.0.name");
        assert_eq!(Keypath::parse("grid[ 2 ][3]").as_str(), "grid.2.3");
        assert_eq!(Keypath::parse("a[x]").as_str(), "a[x]");
        assert!(Keypath::parse("items.*.done").is_pattern());
        assert!(!Keypath::parse("items.\\*.done").is_pattern());
        let star = Keypath::parse("m").join(&Key::from("*"));
        assert!(!star.is_pattern());
        assert_eq!(star.last_key(), Some(Key::from("*")));
    }

    #[test]
    fn test_ancestry() {
        let a = Keypath::parse("items");
        let b = Keypath::parse("items.3.name");
        let c = Keypath::parse("itemsx.3");
        assert!(a.is_ancestor_of(&b));
        assert!(!a.is_ancestor_of(&c));
        assert!(!a.is_ancestor_of(&a));
        assert!(Keypath::root().is_ancestor_of(&a));
        assert!(a.overlaps(&b) && b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert_eq!(a.relative_child(&b), Some(Key::Index(3)));
        assert_eq!(Keypath::root().relative_child(&b), Some(Key::Name("items".into())));
    }

    #[test]
    fn test_ancestors_end_with_root() {
        let ancestors: Vec<_> = Keypath::parse("a.b.c").ancestors().collect();
        assert_eq!(
            ancestors,
            vec![Keypath::parse("a.b"), Keypath::parse("a"), Keypath::root()]
        );
        assert_eq!(Keypath::parse("a.b").last_key(), Some(Key::Name("b".into())));
    }
}
