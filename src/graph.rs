//! The value graph: values addressed by keypath plus dependency registrations.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::computation::ComputationId;
use crate::error::{FlowError, Result};
use crate::keypath::{Key, Keypath, WILDCARD};
use crate::section::SectionId;
use crate::value::{exceeds_list_growth, Shape, Value};

/// Dependent is anything that can be registered on a keypath and notified when it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependent {
    /// A computation.
    Computation(ComputationId),
    /// A repeated section.
    Section(SectionId),
}

/// A dependent reached by a change, with how the change relates to its registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affected {
    /// The dependent to notify.
    pub dependent: Dependent,
    /// The keypath the dependent registered on.
    pub registered_at: Keypath,
    /// Set when the change happened strictly below `registered_at`: the child
    /// segment through which it happened. `None` means the registered value was
    /// replaced outright.
    pub touched: Option<Key>,
}

/// Outcome of a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutcome {
    /// The write created or removed locations, so unresolved keypaths may now resolve.
    pub structural: bool,
    /// The stored value differs from the previous one.
    pub changed: bool,
}

/// ValueGraph owns the state tree and the dependency registration table.
///
/// Registrations are adjacency sets keyed by keypath identity; sets keep
/// registration order so notifications are deterministic.
#[derive(Debug)]
pub struct ValueGraph {
    root: Value,
    dependents: HashMap<Keypath, IndexSet<Dependent>>,
}

impl Default for ValueGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueGraph {
    /// Create an empty graph whose root is an empty mapping.
    pub fn new() -> Self {
        Self {
            root: Value::Map(IndexMap::new()),
            dependents: HashMap::new(),
        }
    }

    /// Read the value at `keypath`.
    pub fn get(&self, keypath: &Keypath) -> Option<&Value> {
        let mut current = &self.root;
        for key in keypath.keys() {
            current = current.child(&key)?;
        }
        Some(current)
    }

    /// Expand every [`WILDCARD`] segment of `pattern` against the children that
    /// currently exist. A keypath without wildcards expands to itself.
    pub fn matching_keypaths(&self, pattern: &Keypath) -> Vec<Keypath> {
        let mut matches = vec![Keypath::root()];
        for (segment, key) in pattern.raw_segments().into_iter().zip(pattern.keys()) {
            if segment != WILDCARD {
                matches = matches.into_iter().map(|base| base.join(&key)).collect();
                continue;
            }
            matches = matches
                .into_iter()
                .flat_map(|base| {
                    let children: Vec<Key> = match self.get(&base) {
                        Some(Value::List(items)) => (0..items.len()).map(Key::Index).collect(),
                        Some(Value::Map(map)) => map.keys().cloned().map(Key::Name).collect(),
                        _ => Vec::new(),
                    };
                    children.into_iter().map(move |child| base.join(&child))
                })
                .collect();
        }
        matches
    }

    /// Returns true if `keypath` addresses a location that currently exists or
    /// could be read without an absent parent.
    ///
    /// Top-level keys always resolve; deeper keypaths resolve when their parent
    /// currently holds a container.
    pub fn resolves(&self, keypath: &Keypath) -> bool {
        match keypath.parent() {
            None => true,
            Some(parent) if parent.is_root() => true,
            Some(parent) => self.get(&parent).is_some_and(Value::is_container),
        }
    }

    /// Write `value` at `keypath`, creating missing intermediate locations.
    pub fn set(&mut self, keypath: &Keypath, value: Value) -> Result<SetOutcome> {
        if keypath.is_root() {
            if !matches!(value, Value::Map(_)) {
                return Err(FlowError::InvalidRoot);
            }
            let structural = is_structural(Some(&self.root), &value);
            let changed = self.root != value;
            self.root = value;
            return Ok(SetOutcome {
                structural,
                changed,
            });
        }

        let keys: Vec<Key> = keypath.keys().collect();
        let (last, parents) = keys.split_last().ok_or(FlowError::InvalidRoot)?;
        self.check_reach(&keys)?;
        let out_of_range = |at: &Keypath, key: &Key, len: usize| FlowError::IndexOutOfRange {
            keypath: at.clone(),
            index: key.as_index().unwrap_or_default(),
            len,
        };
        let mut structural = false;
        let mut at = Keypath::root();
        let mut current = &mut self.root;
        for key in parents {
            let (child, created) = current
                .child_mut_or_insert(key)
                .map_err(|len| out_of_range(&at, key, len))?;
            structural |= created;
            current = child;
            at = at.join(key);
        }
        let existed = current.child(last).is_some();
        let (slot, created) = current
            .child_mut_or_insert(last)
            .map_err(|len| out_of_range(&at, last, len))?;
        structural |= created;
        let previous = existed.then(|| std::mem::take(slot));
        structural |= is_structural(previous.as_ref(), &value);
        let changed = previous.as_ref() != Some(&value);
        *slot = value;
        Ok(SetOutcome {
            structural,
            changed,
        })
    }

    /// Fail before any mutation if a write along `keys` would grow a list too far.
    fn check_reach(&self, keys: &[Key]) -> Result<()> {
        let mut at = Keypath::root();
        let mut current = Some(&self.root);
        for key in keys {
            let Some(value) = current else {
                break;
            };
            if let (Value::List(items), Key::Index(index)) = (value, key) {
                if exceeds_list_growth(items.len(), *index) {
                    return Err(FlowError::IndexOutOfRange {
                        keypath: at,
                        index: *index,
                        len: items.len(),
                    });
                }
            }
            at = at.join(key);
            current = value.child(key);
        }
        Ok(())
    }

    /// Register `dependent` on `keypath`. Returns false if it was already registered.
    pub fn register(&mut self, keypath: &Keypath, dependent: Dependent) -> bool {
        self.dependents
            .entry(keypath.clone())
            .or_default()
            .insert(dependent)
    }

    /// Unregister `dependent` from `keypath`. Returns false if it was not registered.
    pub fn unregister(&mut self, keypath: &Keypath, dependent: Dependent) -> bool {
        let Some(set) = self.dependents.get_mut(keypath) else {
            return false;
        };
        let removed = set.shift_remove(&dependent);
        if set.is_empty() {
            self.dependents.remove(keypath);
        }
        removed
    }

    /// Returns true if `dependent` is registered on `keypath`.
    pub fn is_registered(&self, keypath: &Keypath, dependent: Dependent) -> bool {
        self.dependents
            .get(keypath)
            .is_some_and(|set| set.contains(&dependent))
    }

    /// Dependents registered on `keypath` itself.
    pub fn dependents_of(&self, keypath: &Keypath) -> Vec<Dependent> {
        self.dependents
            .get(keypath)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every dependent whose registered value changes when `changed` is written.
    ///
    /// This covers registrations on `changed` itself, on its ancestors (their
    /// value changed underneath) and on its descendants (their value was replaced).
    pub fn dependents_affected_by(&self, changed: &Keypath) -> Vec<Affected> {
        let mut affected = Vec::new();
        for (registered_at, set) in &self.dependents {
            let touched = if registered_at.is_ancestor_of(changed) {
                registered_at.relative_child(changed)
            } else if registered_at == changed || changed.is_ancestor_of(registered_at) {
                None
            } else {
                continue;
            };
            for dependent in set {
                affected.push(Affected {
                    dependent: *dependent,
                    registered_at: registered_at.clone(),
                    touched: touched.clone(),
                });
            }
        }
        // HashMap iteration order is arbitrary; make delivery order stable.
        affected.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        affected
    }

    /// Remove every registration of `dependent`.
    pub fn unregister_all(&mut self, dependent: Dependent) {
        self.dependents.retain(|_, set| {
            set.shift_remove(&dependent);
            !set.is_empty()
        });
    }
}

fn is_structural(previous: Option<&Value>, next: &Value) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    let before = Shape::of(Some(previous));
    let after = Shape::of(Some(next));
    match (&before, &after) {
        (Shape::Scalar, Shape::Scalar) => false,
        _ => before != after,
    }
}
