//! Dynamic values stored in the value graph.

use indexmap::IndexMap;

use crate::keypath::Key;

/// How many nulls a single write may append to a list to reach its index.
pub const MAX_LIST_GROWTH: usize = 1024;

pub(crate) fn exceeds_list_growth(len: usize, index: usize) -> bool {
    index.saturating_sub(len) >= MAX_LIST_GROWTH
}

/// A value held at a keypath.
///
/// Equality is structural, so `==` is the deep-equality check used for
/// dependency snapshots.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    /// Explicit null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// String.
    String(String),
    /// Ordered collection.
    List(Vec<Value>),
    /// Keyed mapping, enumerated in insertion order.
    Map(IndexMap<String, Value>),
}

/// Shape is the classification a repeated section branches on.
///
/// It is decided once per update pass from the bound value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// An ordered collection of the given length.
    Ordered(usize),
    /// A keyed mapping with keys in enumeration order.
    Keyed(Vec<String>),
    /// Anything else, including an absent value.
    Scalar,
}

impl Shape {
    /// Classify an optional value.
    pub fn of(value: Option<&Value>) -> Self {
        match value {
            Some(Value::List(items)) => Shape::Ordered(items.len()),
            Some(Value::Map(map)) => Shape::Keyed(map.keys().cloned().collect()),
            _ => Shape::Scalar,
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        match self {
            Shape::Ordered(len) => *len,
            Shape::Keyed(keys) => keys.len(),
            Shape::Scalar => 0,
        }
    }

    /// Returns true if there are no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if both shapes have the same tag.
    pub fn same_kind(&self, other: &Shape) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Value {
    /// Build a list value.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a mapping value, preserving the iteration order of `entries`.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the number if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the number truncated to an integer if this is a number.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|n| n as i64)
    }

    /// Returns the string slice if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the items if this is a list.
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the entries if this is a mapping.
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns true for lists and mappings.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// Get a direct child.
    pub fn child(&self, key: &Key) -> Option<&Value> {
        match (self, key) {
            (Value::List(items), Key::Index(index)) => items.get(*index),
            (Value::Map(map), Key::Index(index)) => map.get(&index.to_string()),
            (Value::Map(map), Key::Name(name)) => map.get(name),
            _ => None,
        }
    }

    /// Get a direct child for writing, creating it as [`Value::Null`] when missing.
    ///
    /// Lists grow with nulls to reach an index; anything that is not a
    /// container is replaced by an empty mapping first. Returns whether the
    /// structure of `self` changed. When the index lies more than
    /// [`MAX_LIST_GROWTH`] past the end of a list, `self` is left untouched and
    /// the list length is returned as the error.
    pub(crate) fn child_mut_or_insert(&mut self, key: &Key) -> Result<(&mut Value, bool), usize> {
        if let (Value::List(items), Key::Index(index)) = (&*self, key) {
            if exceeds_list_growth(items.len(), *index) {
                return Err(items.len());
            }
        }
        let mut structural = false;
        let fits_list = matches!((&*self, key), (Value::List(_), Key::Index(_)));
        if !fits_list && !matches!(self, Value::Map(_)) {
            *self = Value::Map(IndexMap::new());
            structural = true;
        }
        match (self, key) {
            (Value::List(items), Key::Index(index)) => {
                if *index >= items.len() {
                    let len = items.len();
                    items.resize(index.checked_add(1).ok_or(len)?, Value::Null);
                    structural = true;
                }
                Ok((&mut items[*index], structural))
            }
            (Value::Map(map), key) => {
                let name = key.to_string();
                if !map.contains_key(&name) {
                    structural = true;
                }
                Ok((map.entry(name).or_insert(Value::Null), structural))
            }
            _ => Err(0),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Map(map)
    }
}
